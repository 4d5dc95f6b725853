//! Genome - fixed-length normalized behaviour vector
//!
//! A genome is exactly [`GENOME_LEN`] floats, each held in `[0.0, 1.0]`.
//! Every constructor and mutator clamps, so downstream decoders may assume
//! the invariant without re-checking.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of genes in every genome
pub const GENOME_LEN: usize = 8;

/// Clamp a gene value into the unit interval. NaN collapses to 0.0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Normalized parameter vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; GENOME_LEN]", into = "[f64; GENOME_LEN]")]
pub struct Genome([f64; GENOME_LEN]);

impl Genome {
    /// Create a genome, clamping every gene into `[0, 1]`
    pub fn new(genes: [f64; GENOME_LEN]) -> Self {
        let mut genome = Self(genes);
        genome.clamp();
        genome
    }

    /// Genome with every gene at the same value (clamped)
    pub fn uniform(value: f64) -> Self {
        Self::new([value; GENOME_LEN])
    }

    /// Draw every gene uniformly from `[0, 1]`
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut genes = [0.0; GENOME_LEN];
        for gene in genes.iter_mut() {
            *gene = rng.gen_range(0.0..=1.0);
        }
        Self(genes)
    }

    /// Build from a slice, padding missing genes with 0.5 and ignoring extras
    pub fn from_slice_padded(values: &[f64]) -> Self {
        let mut genes = [0.5; GENOME_LEN];
        for (gene, value) in genes.iter_mut().zip(values.iter()) {
            *gene = *value;
        }
        Self::new(genes)
    }

    /// Read-only view of the genes
    pub fn genes(&self) -> &[f64; GENOME_LEN] {
        &self.0
    }

    /// Mutable access for genetic operators. Callers must [`Genome::clamp`]
    /// before the genome is observed again.
    pub fn genes_mut(&mut self) -> &mut [f64; GENOME_LEN] {
        &mut self.0
    }

    /// Gene at `index`
    pub fn gene(&self, index: usize) -> f64 {
        self.0[index]
    }

    /// Force every gene back into `[0, 1]`
    pub fn clamp(&mut self) {
        for gene in self.0.iter_mut() {
            *gene = clamp_unit(*gene);
        }
    }

    /// True when every gene lies in `[0, 1]`
    pub fn is_normalized(&self) -> bool {
        self.0.iter().all(|g| (0.0..=1.0).contains(g))
    }

    /// Genes as an owned vector
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }
}

impl From<[f64; GENOME_LEN]> for Genome {
    fn from(genes: [f64; GENOME_LEN]) -> Self {
        Self::new(genes)
    }
}

impl From<Genome> for [f64; GENOME_LEN] {
    fn from(genome: Genome) -> Self {
        genome.0
    }
}

impl std::fmt::Display for Genome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let genes: Vec<String> = self.0.iter().map(|g| format!("{:.3}", g)).collect();
        write!(f, "Genome[{}]", genes.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_clamps_out_of_range() {
        let genome = Genome::new([2.0, -1.0, 0.5, 1.0, 0.0, 1.5, -0.2, f64::NAN]);
        assert!(genome.is_normalized());
        assert_eq!(genome.gene(0), 1.0);
        assert_eq!(genome.gene(1), 0.0);
        assert_eq!(genome.gene(2), 0.5);
        assert_eq!(genome.gene(7), 0.0);
    }

    #[test]
    fn test_random_is_normalized() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(Genome::random(&mut rng).is_normalized());
        }
    }

    #[test]
    fn test_padding() {
        let genome = Genome::from_slice_padded(&[0.1, 0.2]);
        assert_eq!(genome.gene(0), 0.1);
        assert_eq!(genome.gene(1), 0.2);
        assert!(genome.genes()[2..].iter().all(|g| *g == 0.5));
    }

    #[test]
    fn test_serde_as_plain_array() {
        let genome = Genome::uniform(0.25);
        let json = serde_json::to_string(&genome).unwrap();
        assert_eq!(json, "[0.25,0.25,0.25,0.25,0.25,0.25,0.25,0.25]");

        let parsed: Genome = serde_json::from_str("[3,0,0,0,0,0,0,-3]").unwrap();
        assert_eq!(parsed.gene(0), 1.0);
        assert_eq!(parsed.gene(7), 0.0);
    }
}
