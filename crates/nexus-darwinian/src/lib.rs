//! # Darwinian
//!
//! Genetic search over pod behaviour genomes for the Nexus self-tuning core.
//!
//! ## Cycle
//!
//! ```text
//! init(N) -> evaluate -> G x [ select -> crossover -> clamp
//!                              -> mutate -> clamp -> re-evaluate ]
//!         -> hall of fame -> EvolutionCycleResult
//! ```
//!
//! Cycles are gated by the `evolution_cycle` breaker. The best genome is
//! decoded per pod ([`decoder`]), pushed live by [`apply::GenomeApplier`] and
//! certified through the ledger by [`trigger::EvolutionTrigger`].

pub mod apply;
pub mod decoder;
pub mod engine;
pub mod operators;
pub mod registry;
pub mod trigger;

use serde::{Deserialize, Serialize};

pub use apply::GenomeApplier;
pub use decoder::{decode, decode_genome, ParamValue, ParameterSet, GENE_MAP};
pub use engine::{EvolutionCycleResult, EvolutionEngine, GenerationStats};
pub use operators::Individual;
pub use registry::{FitnessEvaluator, PodRegistry};
pub use trigger::{CycleReport, EvolutionTrigger};

/// Events per pod between automatic cycles
pub const DEFAULT_CYCLE_THRESHOLD: u64 = 25;

/// Evolution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Individuals per population
    pub population_size: usize,
    /// Generations per cycle
    pub generations: usize,
    /// Probability that an adjacent pair is crossed
    pub crossover_pb: f64,
    /// Probability that an individual is mutated
    pub mutation_pb: f64,
    pub tournament_size: usize,
    pub blend_alpha: f64,
    pub mutation_sigma: f64,
    /// Per-gene mutation probability
    pub mutation_indpb: f64,
    /// Events per pod between automatic cycles
    pub cycle_threshold: u64,
    /// Fixed RNG seed (reproducible cycles)
    pub seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 10,
            crossover_pb: 0.5,
            mutation_pb: 0.2,
            tournament_size: 3,
            blend_alpha: 0.5,
            mutation_sigma: 0.15,
            mutation_indpb: 0.3,
            cycle_threshold: DEFAULT_CYCLE_THRESHOLD,
            seed: None,
        }
    }
}
