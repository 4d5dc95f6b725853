//! Genetic operators
//!
//! Individuals are plain values (genome plus optional fitness) and every
//! operator is a free function over them. Operators that can push a gene
//! outside the unit interval clamp before returning.

use nexus_common::{Genome, GENOME_LEN};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::warn;

/// A genome and its fitness, absent until evaluated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Individual {
    pub genome: Genome,
    pub fitness: Option<f64>,
}

impl Individual {
    pub fn new(genome: Genome) -> Self {
        Self { genome, fitness: None }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(Genome::random(rng))
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }

    /// Drop the fitness after the genome changed
    pub fn invalidate(&mut self) {
        self.fitness = None;
    }

    /// Fitness for ranking; unevaluated individuals rank last
    pub fn rank_score(&self) -> f64 {
        self.fitness.unwrap_or(f64::NEG_INFINITY)
    }
}

/// `n` random, unevaluated individuals
pub fn init_population<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<Individual> {
    (0..n).map(|_| Individual::random(rng)).collect()
}

/// Select `k` individuals, each the fittest of `tournament_size` aspirants
/// drawn uniformly with replacement
pub fn tournament_select<R: Rng + ?Sized>(
    population: &[Individual],
    k: usize,
    tournament_size: usize,
    rng: &mut R,
) -> Vec<Individual> {
    if population.is_empty() {
        return Vec::new();
    }
    let tournament_size = tournament_size.max(1);

    (0..k)
        .map(|_| {
            let mut best = population[rng.gen_range(0..population.len())];
            for _ in 1..tournament_size {
                let aspirant = population[rng.gen_range(0..population.len())];
                if aspirant.rank_score() > best.rank_score() {
                    best = aspirant;
                }
            }
            best
        })
        .collect()
}

/// Blend crossover (BLX-alpha) applied gene by gene, in place. Both
/// children are clamped to `[0, 1]` afterwards since the blend can
/// overshoot either parent.
pub fn blend_crossover<R: Rng + ?Sized>(a: &mut Genome, b: &mut Genome, alpha: f64, rng: &mut R) {
    let (ga, gb) = (a.genes_mut(), b.genes_mut());
    for i in 0..GENOME_LEN {
        let gamma = (1.0 + 2.0 * alpha) * rng.gen::<f64>() - alpha;
        let (x1, x2) = (ga[i], gb[i]);
        ga[i] = (1.0 - gamma) * x1 + gamma * x2;
        gb[i] = gamma * x1 + (1.0 - gamma) * x2;
    }
    a.clamp();
    b.clamp();
}

/// Gaussian mutation: each gene independently, with probability `indpb`,
/// receives `N(mu, sigma)` noise. The genome is clamped afterwards.
///
/// An invalid `sigma` (negative or NaN) leaves the genes unmutated.
pub fn gaussian_mutation<R: Rng + ?Sized>(genome: &mut Genome, mu: f64, sigma: f64, indpb: f64, rng: &mut R) {
    match Normal::new(mu, sigma) {
        Ok(noise) => {
            for gene in genome.genes_mut().iter_mut() {
                if rng.gen::<f64>() < indpb {
                    *gene += noise.sample(rng);
                }
            }
        }
        Err(e) => warn!(mu, sigma, error = %e, "Invalid mutation distribution; genome left unmutated"),
    }
    genome.clamp();
}

/// Max and mean fitness over evaluated individuals
pub fn fitness_stats(population: &[Individual]) -> (f64, f64) {
    let scores: Vec<f64> = population.iter().filter_map(|i| i.fitness).collect();
    if scores.is_empty() {
        return (0.0, 0.0);
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    (max, avg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn out_of_range() -> Genome {
        let mut genome = Genome::uniform(0.5);
        let genes = genome.genes_mut();
        genes[0] = 2.0;
        genes[1] = -1.0;
        genes[2] = 1.5;
        genes[3] = -0.5;
        genome
    }

    #[test]
    fn test_crossover_clamps_out_of_range_parents() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let mut a = out_of_range();
            let mut b = out_of_range();
            b.genes_mut()[4] = 3.0;
            blend_crossover(&mut a, &mut b, 0.5, &mut rng);
            assert!(a.is_normalized());
            assert!(b.is_normalized());
        }
    }

    #[test]
    fn test_crossover_of_extremes_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..500 {
            let mut a = Genome::uniform(0.0);
            let mut b = Genome::uniform(1.0);
            blend_crossover(&mut a, &mut b, 0.5, &mut rng);
            assert!(a.is_normalized() && b.is_normalized());
        }
    }

    #[test]
    fn test_mutation_clamps() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let mut genome = out_of_range();
            gaussian_mutation(&mut genome, 0.0, 0.15, 0.3, &mut rng);
            assert!(genome.is_normalized());

            // Large sigma with certain application
            let mut genome = Genome::uniform(0.99);
            gaussian_mutation(&mut genome, 0.0, 5.0, 1.0, &mut rng);
            assert!(genome.is_normalized());
        }
    }

    #[test]
    fn test_mutation_zero_probability_is_noop() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut genome = Genome::uniform(0.42);
        gaussian_mutation(&mut genome, 0.0, 0.15, 0.0, &mut rng);
        assert_eq!(genome, Genome::uniform(0.42));
    }

    #[test]
    fn test_mutation_noise_moments() {
        let mut rng = StdRng::seed_from_u64(5);
        let deltas: Vec<f64> = (0..5_000)
            .flat_map(|_| {
                let mut genome = Genome::uniform(0.5);
                gaussian_mutation(&mut genome, 0.0, 0.05, 1.0, &mut rng);
                genome.to_vec().into_iter().map(|g| g - 0.5).collect::<Vec<_>>()
            })
            .collect();
        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        let sd = (deltas.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / deltas.len() as f64).sqrt();
        assert!(mean.abs() < 0.005);
        assert!((sd - 0.05).abs() < 0.005);
    }

    #[test]
    fn test_invalid_sigma_only_clamps() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut genome = out_of_range();
        gaussian_mutation(&mut genome, 0.0, f64::NAN, 1.0, &mut rng);
        assert!(genome.is_normalized());
        assert_eq!(genome.gene(4), 0.5);
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let mut rng = StdRng::seed_from_u64(6);
        let population: Vec<Individual> = (0..10)
            .map(|i| Individual {
                genome: Genome::uniform(i as f64 / 10.0),
                fitness: Some(i as f64),
            })
            .collect();

        let selected = tournament_select(&population, 1000, 3, &mut rng);
        assert_eq!(selected.len(), 1000);

        let mean = selected.iter().map(|i| i.rank_score()).sum::<f64>() / 1000.0;
        // Uniform draws average 4.5; best-of-3 sits well above that
        assert!(mean > 5.5);
    }

    #[test]
    fn test_tournament_size_one_and_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(tournament_select(&[], 5, 3, &mut rng).is_empty());

        let population = vec![Individual {
            genome: Genome::uniform(0.1),
            fitness: Some(1.0),
        }];
        let selected = tournament_select(&population, 3, 0, &mut rng);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_fitness_stats_ignore_unevaluated() {
        let population = vec![
            Individual {
                genome: Genome::uniform(0.0),
                fitness: Some(1.0),
            },
            Individual {
                genome: Genome::uniform(0.0),
                fitness: Some(3.0),
            },
            Individual::new(Genome::uniform(0.0)),
        ];
        assert_eq!(fitness_stats(&population), (3.0, 2.0));
        assert_eq!(fitness_stats(&[]), (0.0, 0.0));
    }
}
