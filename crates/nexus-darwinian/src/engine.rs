//! Evolution engine
//!
//! One cycle per call: random initial population, then a fixed number of
//! generations of tournament selection, blend crossover and Gaussian
//! mutation. Every evaluation batch runs concurrently and is joined before
//! the next generation starts. A failing or panicking evaluation scores 0.0
//! for that individual only.

use std::sync::Arc;

use futures::future::join_all;
use nexus_common::{
    emit_best_effort, event_types, AuditStore, EventSink, Genome, NexusEvent, Outcome,
};
use nexus_constitution::{breakers, Constitution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::operators::{
    blend_crossover, fitness_stats, gaussian_mutation, init_population, tournament_select, Individual,
};
use crate::registry::{FitnessEvaluator, PodRegistry};
use crate::EvolutionConfig;

/// Fitness summary of one generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// 1-based generation number
    pub generation: usize,
    pub max: f64,
    pub avg: f64,
    /// Hall-of-fame score after this generation
    pub best_ever: f64,
    /// Evaluations issued in this generation
    pub evaluations: usize,
}

/// Result of one completed cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionCycleResult {
    pub pod: String,
    pub best_genome: Genome,
    pub best_score: f64,
    pub generations: usize,
    pub population_size: usize,
    /// Unix seconds
    pub timestamp: f64,
    /// Mean fitness of the initial random population
    #[serde(default)]
    pub baseline_avg: f64,
    #[serde(default)]
    pub history: Vec<GenerationStats>,
}

impl EvolutionCycleResult {
    /// Fitness evaluations spent on the cycle
    pub fn total_evaluations(&self) -> usize {
        self.population_size + self.history.iter().map(|g| g.evaluations).sum::<usize>()
    }
}

/// Genetic search over pod genomes
pub struct EvolutionEngine {
    config: EvolutionConfig,
    registry: Arc<PodRegistry>,
    constitution: Arc<Constitution>,
    store: Arc<dyn AuditStore>,
    events: Arc<dyn EventSink>,
}

impl EvolutionEngine {
    pub fn new(
        config: EvolutionConfig,
        registry: Arc<PodRegistry>,
        constitution: Arc<Constitution>,
        store: Arc<dyn AuditStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            registry,
            constitution,
            store,
            events,
        }
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PodRegistry> {
        &self.registry
    }

    /// Register or replace a pod's fitness evaluator
    pub fn register_pod<F>(&self, pod: &str, fitness: F)
    where
        F: FitnessEvaluator + 'static,
    {
        self.registry.register(pod, fitness);
    }

    /// Count an event; true when the caller should trigger a cycle
    pub fn increment_event(&self, pod: &str) -> bool {
        self.registry.increment_event(pod)
    }

    /// Run a cycle with the pod's registered evaluator
    pub async fn run_cycle(&self, pod: &str) -> Outcome<EvolutionCycleResult> {
        match self.registry.fitness(pod) {
            Some(fitness) => self.run_cycle_with(pod, fitness).await,
            None => {
                warn!(pod = %pod, "No fitness evaluator registered");
                Outcome::failed(format!("pod {} has no fitness function registered", pod))
            }
        }
    }

    /// Run a cycle with an explicit evaluator
    #[instrument(skip(self, fitness))]
    pub async fn run_cycle_with(
        &self,
        pod: &str,
        fitness: Arc<dyn FitnessEvaluator>,
    ) -> Outcome<EvolutionCycleResult> {
        if !self.constitution.check_breaker(breakers::EVOLUTION_CYCLE) {
            return Outcome::skipped(format!("gate closed: {}", breakers::EVOLUTION_CYCLE));
        }
        if self.config.population_size == 0 {
            return Outcome::failed("population_size must be positive");
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (best, baseline_avg, history) = self.search(pod, &fitness, &mut rng).await;
        let result = EvolutionCycleResult {
            pod: pod.to_string(),
            best_genome: best.genome,
            best_score: best.fitness.unwrap_or(0.0),
            generations: self.config.generations,
            population_size: self.config.population_size,
            timestamp: nexus_common::unix_seconds(),
            baseline_avg,
            history,
        };

        self.persist(&result).await;
        emit_best_effort(
            self.events.as_ref(),
            NexusEvent::new(
                pod,
                event_types::CYCLE_COMPLETED,
                json!({
                    "best_score": result.best_score,
                    "best_genome": result.best_genome,
                    "generations": result.generations,
                }),
            ),
        )
        .await;

        info!(pod = %pod, best_score = result.best_score, "Evolution cycle complete");
        Outcome::Completed(result)
    }

    /// Run every registered pod's cycle concurrently
    pub async fn run_all_pod_cycles(&self) -> Vec<(String, Outcome<EvolutionCycleResult>)> {
        let pods = self.registry.pods();
        let outcomes = join_all(pods.iter().map(|pod| self.run_cycle(pod))).await;
        pods.into_iter().zip(outcomes).collect()
    }

    async fn search(
        &self,
        pod: &str,
        fitness: &Arc<dyn FitnessEvaluator>,
        rng: &mut StdRng,
    ) -> (Individual, f64, Vec<GenerationStats>) {
        let cfg = &self.config;

        let mut population = init_population(cfg.population_size, rng);
        evaluate_invalid(pod, fitness, &mut population).await;
        let (_, baseline_avg) = fitness_stats(&population);

        let mut hall_of_fame = population[0];
        update_hall_of_fame(&mut hall_of_fame, &population);

        let mut history = Vec::with_capacity(cfg.generations);
        for generation in 1..=cfg.generations {
            let mut offspring = tournament_select(&population, population.len(), cfg.tournament_size, rng);

            for pair in offspring.chunks_exact_mut(2) {
                if rng.gen::<f64>() < cfg.crossover_pb {
                    let (left, right) = pair.split_at_mut(1);
                    blend_crossover(&mut left[0].genome, &mut right[0].genome, cfg.blend_alpha, rng);
                    left[0].invalidate();
                    right[0].invalidate();
                }
            }

            for mutant in offspring.iter_mut() {
                if rng.gen::<f64>() < cfg.mutation_pb {
                    gaussian_mutation(&mut mutant.genome, 0.0, cfg.mutation_sigma, cfg.mutation_indpb, rng);
                    mutant.invalidate();
                }
            }

            let evaluations = evaluate_invalid(pod, fitness, &mut offspring).await;
            population = offspring;
            update_hall_of_fame(&mut hall_of_fame, &population);

            let (max, avg) = fitness_stats(&population);
            let best_ever = hall_of_fame.rank_score();
            debug!(pod = %pod, generation, max, avg, best_ever, evaluations, "Generation complete");
            history.push(GenerationStats {
                generation,
                max,
                avg,
                best_ever,
                evaluations,
            });
        }

        (hall_of_fame, baseline_avg, history)
    }

    async fn persist(&self, result: &EvolutionCycleResult) {
        let record = match serde_json::to_value(result) {
            Ok(record) => record,
            Err(e) => {
                warn!(pod = %result.pod, error = %e, "Evolution result not serializable");
                return;
            }
        };
        let key = format!("evolution:{}:{:.3}", result.pod, result.timestamp);
        let metadata = json!({
            "type": "evolution_result",
            "pod": result.pod,
            "best_score": result.best_score,
        });

        if let Err(e) = self.store.put(&result.pod, &key, record, metadata).await {
            warn!(pod = %result.pod, error = %e, "Evolution result persist failed");
        }
    }
}

/// Evaluate every individual without a fitness, concurrently. Returns the
/// number of evaluations issued.
async fn evaluate_invalid(pod: &str, fitness: &Arc<dyn FitnessEvaluator>, population: &mut [Individual]) -> usize {
    let invalid: Vec<usize> = population
        .iter()
        .enumerate()
        .filter(|(_, ind)| !ind.is_evaluated())
        .map(|(i, _)| i)
        .collect();

    let handles = invalid.iter().map(|&i| {
        let fitness = fitness.clone();
        let genome = population[i].genome;
        tokio::spawn(async move { fitness.evaluate(genome).await })
    });
    let results = join_all(handles).await;

    for (&i, result) in invalid.iter().zip(results) {
        let score = match result {
            Ok(Ok(score)) if score.is_finite() => score,
            Ok(Ok(score)) => {
                warn!(pod = %pod, score, "Non-finite fitness; scoring 0.0");
                0.0
            }
            Ok(Err(e)) => {
                warn!(pod = %pod, error = %e, "Fitness evaluation failed; scoring 0.0");
                0.0
            }
            Err(e) => {
                warn!(pod = %pod, error = %e, "Fitness evaluation panicked; scoring 0.0");
                0.0
            }
        };
        population[i].fitness = Some(score);
    }

    invalid.len()
}

fn update_hall_of_fame(best: &mut Individual, population: &[Individual]) {
    for ind in population {
        if ind.rank_score() > best.rank_score() {
            *best = *ind;
        }
    }
}
