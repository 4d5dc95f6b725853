//! Pod registry
//!
//! Owned by the hosting process and shared by reference: which pods have a
//! fitness evaluator, and how many events each pod has seen since
//! registration.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nexus_common::Genome;
use tracing::info;

/// Pod-supplied fitness evaluator
///
/// Errors and panics are isolated per individual by the engine and score
/// 0.0.
#[async_trait]
pub trait FitnessEvaluator: Send + Sync {
    async fn evaluate(&self, genome: Genome) -> anyhow::Result<f64>;
}

#[async_trait]
impl<F, Fut> FitnessEvaluator for F
where
    F: Fn(Genome) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<f64>> + Send,
{
    async fn evaluate(&self, genome: Genome) -> anyhow::Result<f64> {
        (self)(genome).await
    }
}

/// Registered fitness evaluators and per-pod event counters
pub struct PodRegistry {
    fitness: DashMap<String, Arc<dyn FitnessEvaluator>>,
    counters: DashMap<String, u64>,
    cycle_threshold: u64,
}

impl PodRegistry {
    /// Registry signalling a cycle every `cycle_threshold` events (min 1)
    pub fn new(cycle_threshold: u64) -> Self {
        Self {
            fitness: DashMap::new(),
            counters: DashMap::new(),
            cycle_threshold: cycle_threshold.max(1),
        }
    }

    /// Register or replace a pod's evaluator. Resets its event counter.
    pub fn register<F>(&self, pod: &str, fitness: F)
    where
        F: FitnessEvaluator + 'static,
    {
        self.register_shared(pod, Arc::new(fitness));
    }

    pub fn register_shared(&self, pod: &str, fitness: Arc<dyn FitnessEvaluator>) {
        self.fitness.insert(pod.to_string(), fitness);
        self.counters.insert(pod.to_string(), 0);
        info!(pod = %pod, "Registered pod fitness evaluator");
    }

    pub fn unregister(&self, pod: &str) -> bool {
        self.counters.remove(pod);
        self.fitness.remove(pod).is_some()
    }

    pub fn fitness(&self, pod: &str) -> Option<Arc<dyn FitnessEvaluator>> {
        self.fitness.get(pod).map(|f| f.value().clone())
    }

    pub fn is_registered(&self, pod: &str) -> bool {
        self.fitness.contains_key(pod)
    }

    /// Registered pod names, sorted
    pub fn pods(&self) -> Vec<String> {
        let mut pods: Vec<String> = self.fitness.iter().map(|e| e.key().clone()).collect();
        pods.sort();
        pods
    }

    /// Count one event for `pod`. True exactly when the count reaches a
    /// multiple of the cycle threshold.
    pub fn increment_event(&self, pod: &str) -> bool {
        let mut count = self.counters.entry(pod.to_string()).or_insert(0);
        *count += 1;
        *count % self.cycle_threshold == 0
    }

    pub fn event_count(&self, pod: &str) -> u64 {
        self.counters.get(pod).map(|c| *c).unwrap_or(0)
    }

    pub fn cycle_threshold(&self) -> u64 {
        self.cycle_threshold
    }
}

impl Default for PodRegistry {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CYCLE_THRESHOLD)
    }
}
