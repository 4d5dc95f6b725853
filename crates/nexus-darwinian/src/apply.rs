//! Gated genome application
//!
//! Pushes decoded parameters to a pod's live configuration through its
//! registered [`DeploymentAction`]. Gated and tracked by the
//! `evolution_cycle` breaker.

use std::sync::Arc;

use dashmap::DashMap;
use nexus_common::{emit_best_effort, event_types, DeploymentAction, EventSink, NexusEvent, Outcome};
use nexus_constitution::{breakers, Constitution};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::decoder::ParameterSet;

/// Applies decoded genomes to pods
pub struct GenomeApplier {
    constitution: Arc<Constitution>,
    deployers: DashMap<String, Arc<dyn DeploymentAction>>,
    events: Arc<dyn EventSink>,
}

impl GenomeApplier {
    pub fn new(constitution: Arc<Constitution>, events: Arc<dyn EventSink>) -> Self {
        Self {
            constitution,
            deployers: DashMap::new(),
            events,
        }
    }

    /// Register or replace the deployment action for `pod`
    pub fn register_deployer(&self, pod: &str, deployer: Arc<dyn DeploymentAction>) {
        self.deployers.insert(pod.to_string(), deployer);
    }

    /// Apply `params` to `pod`. Pods without a deployment action only
    /// receive the `genome_applied` event.
    #[instrument(skip(self, params))]
    pub async fn apply_genome(&self, pod: &str, params: &ParameterSet) -> Outcome<()> {
        if !self.constitution.check_breaker(breakers::EVOLUTION_CYCLE) {
            warn!(pod = %pod, "evolution_cycle breaker open; genome not applied");
            return Outcome::skipped(format!("gate closed: {}", breakers::EVOLUTION_CYCLE));
        }

        let config = match serde_json::to_value(params) {
            Ok(config) => config,
            Err(e) => return Outcome::failed(format!("parameters not serializable: {}", e)),
        };

        let deployer = self.deployers.get(pod).map(|d| d.value().clone());
        match deployer {
            Some(deployer) => match deployer.deploy(&config).await {
                Ok(true) => {}
                Ok(false) => {
                    self.constitution.record_failure(breakers::EVOLUTION_CYCLE);
                    warn!(pod = %pod, "Deployment rejected genome parameters");
                    return Outcome::failed("deployment rejected parameters");
                }
                Err(e) => {
                    self.constitution.record_failure(breakers::EVOLUTION_CYCLE);
                    error!(pod = %pod, error = %e, "Genome apply failed");
                    return Outcome::failed(format!("deployment failed: {}", e));
                }
            },
            None => debug!(pod = %pod, "No deployment action registered; publishing only"),
        }

        emit_best_effort(
            self.events.as_ref(),
            NexusEvent::new(pod, event_types::GENOME_APPLIED, json!({ "params": config })),
        )
        .await;
        self.constitution.record_success(breakers::EVOLUTION_CYCLE);
        info!(pod = %pod, "Genome applied");
        Outcome::Completed(())
    }
}
