//! Event-driven cycle trigger
//!
//! Counts every incoming pod event and starts an evolution cycle when the
//! pod's counter reaches the cycle threshold. A completed cycle runs the
//! rest of the pipeline: decode the best genome, apply it when an applier is
//! attached, and certify the change with an improvement proof when a ledger
//! is attached.

use std::sync::Arc;

use nexus_common::{event_types, NexusEvent, Outcome};
use nexus_ledger::{ImprovementProof, ProofLedger};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::apply::GenomeApplier;
use crate::decoder::{decode_genome, ParameterSet};
use crate::engine::{EvolutionCycleResult, EvolutionEngine};

/// Event types produced by the self-tuning core itself. These never count
/// towards a cycle.
const INTERNAL_EVENTS: [&str; 5] = [
    event_types::CYCLE_COMPLETED,
    event_types::GENOME_APPLIED,
    event_types::VARIANTS_RETIRED,
    event_types::VARIANT_PROMOTED,
    event_types::RULE_VIOLATION,
];

/// Everything one pipeline run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub result: EvolutionCycleResult,
    pub params: ParameterSet,
    /// `None` when no applier is attached
    pub applied: Option<Outcome<()>>,
    pub proof: Option<ImprovementProof>,
}

#[derive(Clone)]
pub struct EvolutionTrigger {
    engine: Arc<EvolutionEngine>,
    applier: Option<Arc<GenomeApplier>>,
    ledger: Option<Arc<ProofLedger>>,
}

impl EvolutionTrigger {
    pub fn new(engine: Arc<EvolutionEngine>) -> Self {
        Self {
            engine,
            applier: None,
            ledger: None,
        }
    }

    /// Apply the best genome of every completed cycle
    pub fn with_applier(mut self, applier: Arc<GenomeApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// Certify every accepted cycle
    pub fn with_ledger(mut self, ledger: Arc<ProofLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Count `event`; spawn the pipeline when the threshold is crossed for a
    /// registered pod
    pub fn on_event(&self, event: &NexusEvent) -> Option<JoinHandle<Outcome<CycleReport>>> {
        if INTERNAL_EVENTS.contains(&event.event_type.as_str()) {
            return None;
        }
        if !self.engine.increment_event(&event.pod) {
            return None;
        }
        if !self.engine.registry().is_registered(&event.pod) {
            debug!(pod = %event.pod, "Cycle threshold reached for unregistered pod");
            return None;
        }

        info!(pod = %event.pod, "Cycle threshold reached; starting evolution cycle");
        let trigger = self.clone();
        let pod = event.pod.clone();
        Some(tokio::spawn(async move { trigger.run_pipeline(&pod).await }))
    }

    /// Cycle, decode, apply and certify
    ///
    /// No proof is generated when the application was skipped or failed.
    pub async fn run_pipeline(&self, pod: &str) -> Outcome<CycleReport> {
        let result = match self.engine.run_cycle(pod).await {
            Outcome::Completed(result) => result,
            Outcome::Skipped { reason } => return Outcome::Skipped { reason },
            Outcome::Failed { reason } => return Outcome::Failed { reason },
        };

        let cycle_id = format!("evolution_{}_{}", pod, Uuid::now_v7().simple());
        let params = decode_genome(&result.best_genome, pod);

        let applied = match &self.applier {
            Some(applier) => {
                let applied = applier.apply_genome(pod, &params).await;
                if !applied.is_completed() {
                    warn!(pod = %pod, reason = ?applied.reason(), "Best genome not applied");
                }
                Some(applied)
            }
            None => None,
        };

        let accepted = applied.as_ref().map_or(true, Outcome::is_completed);
        let proof = match (&self.ledger, accepted) {
            (Some(ledger), true) => self.certify(ledger, &cycle_id, &result).await,
            _ => None,
        };

        Outcome::Completed(CycleReport {
            cycle_id,
            result,
            params,
            applied,
            proof,
        })
    }

    async fn certify(
        &self,
        ledger: &ProofLedger,
        cycle_id: &str,
        result: &EvolutionCycleResult,
    ) -> Option<ImprovementProof> {
        let n_calls = result.total_evaluations() as u64;
        match ledger
            .generate_proof(
                &result.pod,
                cycle_id,
                result.baseline_avg,
                result.best_score,
                result.best_genome.genes(),
                n_calls,
            )
            .await
        {
            Ok(proof) => Some(proof),
            Err(e) => {
                warn!(pod = %result.pod, cycle_id = %cycle_id, error = %e, "Cycle proof not generated");
                None
            }
        }
    }

    /// Consume `events` until the channel closes
    pub fn spawn(self, mut events: broadcast::Receiver<NexusEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.on_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Evolution trigger lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Evolution trigger stopped");
        })
    }
}
