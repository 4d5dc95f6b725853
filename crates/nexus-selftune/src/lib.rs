//! # Nexus Self-Tune
//!
//! Wires the self-tuning components around one shared constitution, audit
//! store, event sink and proof ledger.
//!
//! ## Components
//!
//! - [`nexus_darwinian`]: genetic search, decoding, gated application
//! - [`nexus_planner`]: budgeted MCTS ranking
//! - [`nexus_bandit`]: script variant A/B testing and promotion
//! - [`nexus_constitution`]: circuit breakers, content rules, alerts
//! - [`nexus_ledger`]: signed improvement proofs
//!
//! ```text
//! events ──> EvolutionTrigger ──> EvolutionEngine ──> GenomeApplier ──> ProofLedger
//!                                      │                   │
//!                                      └──── Constitution ─┘<── VariantEngine
//! ```

pub mod config;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use nexus_bandit::VariantEngine;
use nexus_common::crypto::{Ed25519Signer, ProofSigner};
use nexus_common::{
    emit_best_effort, event_types, AlertSink, AuditStore, DeploymentAction, EventSink, InMemoryAuditStore,
    NexusError, NexusEvent, NullEventSink, Outcome, Result, TextGenerator,
};
use nexus_constitution::{AlertDispatcher, BreakerStatus, Constitution, LogAlertSink, Verdict, WebhookAlertSink};
use nexus_darwinian::{
    CycleReport, EvolutionCycleResult, EvolutionEngine, EvolutionTrigger, FitnessEvaluator, GenomeApplier,
    PodRegistry,
};
use nexus_ledger::{ImprovementProof, ProofLedger};
use nexus_planner::{MctsPlanner, RankedAction, Simulation};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

pub use config::{AlertSettings, ConstitutionSettings, LedgerSettings, NexusConfig};

// Re-export component crates
pub use nexus_bandit;
pub use nexus_common;
pub use nexus_constitution;
pub use nexus_darwinian;
pub use nexus_ledger;
pub use nexus_planner;

/// Generator used when the host supplies none. Every call fails, so callers
/// take their documented fallbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl TextGenerator for UnconfiguredGenerator {
    async fn generate(&self, _prompt: &str, task_type: &str, _pod: &str) -> anyhow::Result<String> {
        anyhow::bail!("no text generator configured for {}", task_type)
    }
}

/// Builder for [`SelfTuner`]
pub struct SelfTunerBuilder {
    config: NexusConfig,
    store: Option<Arc<dyn AuditStore>>,
    events: Option<Arc<dyn EventSink>>,
    generator: Option<Arc<dyn TextGenerator>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    signer: Option<Arc<dyn ProofSigner>>,
    variant_deployer: Option<Arc<dyn DeploymentAction>>,
}

impl SelfTunerBuilder {
    pub fn store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Overrides the configured webhook
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Overrides the configured signing key
    pub fn signer(mut self, signer: Arc<dyn ProofSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Deployment action for promoted champions
    pub fn variant_deployer(mut self, deployer: Arc<dyn DeploymentAction>) -> Self {
        self.variant_deployer = Some(deployer);
        self
    }

    /// Build every component. Spawns the alert worker, so it must run inside
    /// a tokio runtime.
    pub fn build(self) -> Result<SelfTuner> {
        let config = self.config;

        let sink: Arc<dyn AlertSink> = match (self.alert_sink, &config.alerts.webhook_url) {
            (Some(sink), _) => sink,
            (None, Some(url)) => {
                Arc::new(WebhookAlertSink::new(url.clone()).map_err(|e| NexusError::Config(e.to_string()))?)
            }
            (None, None) => Arc::new(LogAlertSink),
        };
        let (alerts, alert_worker) = AlertDispatcher::spawn(sink, config.alerts.queue_capacity);

        let constitution = Arc::new(Constitution::load(config.constitution.path.as_deref(), alerts));
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryAuditStore::new()));
        let events = self.events.unwrap_or_else(|| Arc::new(NullEventSink));
        let generator = self.generator.unwrap_or_else(|| Arc::new(UnconfiguredGenerator));

        let signer: Arc<dyn ProofSigner> = match self.signer {
            Some(signer) => signer,
            None => Ed25519Signer::from_config(config.ledger.signing_key_hex.as_deref()),
        };
        info!(public_key = %signer.public_key_hex(), "Proof signing key ready");
        let ledger = Arc::new(ProofLedger::new(signer, store.clone()));

        let registry = Arc::new(PodRegistry::new(config.evolution.cycle_threshold));
        let engine = Arc::new(EvolutionEngine::new(
            config.evolution.clone(),
            registry.clone(),
            constitution.clone(),
            store.clone(),
            events.clone(),
        ));
        let applier = Arc::new(GenomeApplier::new(constitution.clone(), events.clone()));
        let trigger = EvolutionTrigger::new(engine.clone())
            .with_applier(applier.clone())
            .with_ledger(ledger.clone());

        let mut variants = VariantEngine::new(
            config.bandit.clone(),
            store.clone(),
            generator,
            constitution.clone(),
            ledger.clone(),
            events.clone(),
        );
        if let Some(deployer) = self.variant_deployer {
            variants = variants.with_deployer(deployer);
        }

        let planner = MctsPlanner::from(&config.planner);

        Ok(SelfTuner {
            config,
            store,
            events,
            constitution,
            ledger,
            registry,
            engine,
            applier,
            trigger,
            variants: Arc::new(variants),
            planner,
            alert_worker,
        })
    }
}

/// The self-tuning core of one hosting process
pub struct SelfTuner {
    config: NexusConfig,
    store: Arc<dyn AuditStore>,
    events: Arc<dyn EventSink>,
    constitution: Arc<Constitution>,
    ledger: Arc<ProofLedger>,
    registry: Arc<PodRegistry>,
    engine: Arc<EvolutionEngine>,
    applier: Arc<GenomeApplier>,
    trigger: EvolutionTrigger,
    variants: Arc<VariantEngine>,
    planner: MctsPlanner,
    alert_worker: JoinHandle<()>,
}

impl SelfTuner {
    pub fn builder(config: NexusConfig) -> SelfTunerBuilder {
        SelfTunerBuilder {
            config,
            store: None,
            events: None,
            generator: None,
            alert_sink: None,
            signer: None,
            variant_deployer: None,
        }
    }

    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn constitution(&self) -> &Arc<Constitution> {
        &self.constitution
    }

    pub fn ledger(&self) -> &Arc<ProofLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<PodRegistry> {
        &self.registry
    }

    pub fn evolution(&self) -> &Arc<EvolutionEngine> {
        &self.engine
    }

    pub fn variants(&self) -> &Arc<VariantEngine> {
        &self.variants
    }

    pub fn planner(&self) -> &MctsPlanner {
        &self.planner
    }

    // ---------------------------------------------------------------------
    // Evolution
    // ---------------------------------------------------------------------

    /// Register or replace a pod's fitness evaluator
    pub fn register_pod<F>(&self, pod: &str, fitness: F)
    where
        F: FitnessEvaluator + 'static,
    {
        self.registry.register(pod, fitness);
    }

    /// Register or replace the deployment action for a pod's genomes
    pub fn register_deployer(&self, pod: &str, deployer: Arc<dyn DeploymentAction>) {
        self.applier.register_deployer(pod, deployer);
    }

    /// Run one cycle for `pod`, apply the best genome and certify it
    pub async fn run_cycle(&self, pod: &str) -> Outcome<CycleReport> {
        self.trigger.run_pipeline(pod).await
    }

    /// Search only: no application and no proof
    pub async fn search(&self, pod: &str) -> Outcome<EvolutionCycleResult> {
        self.engine.run_cycle(pod).await
    }

    /// Run the full pipeline for every registered pod concurrently
    pub async fn run_all_pod_cycles(&self) -> Vec<(String, Outcome<CycleReport>)> {
        let pods = self.registry.pods();
        let reports = join_all(pods.iter().map(|pod| self.trigger.run_pipeline(pod))).await;
        pods.into_iter().zip(reports).collect()
    }

    /// Count one pod event; true when a cycle is due
    pub fn increment_event(&self, pod: &str) -> bool {
        self.engine.increment_event(pod)
    }

    /// Drive cycles from an event stream until it closes
    pub fn spawn_trigger(&self, events: broadcast::Receiver<NexusEvent>) -> JoinHandle<()> {
        self.trigger.clone().spawn(events)
    }

    // ---------------------------------------------------------------------
    // Planning
    // ---------------------------------------------------------------------

    /// Rank `actions` with the configured budget
    pub async fn plan<A, S>(&self, goal: &str, actions: &[A], simulation: &S) -> Vec<RankedAction>
    where
        A: AsRef<str>,
        S: Simulation + ?Sized,
    {
        self.planner
            .plan(goal, actions, simulation, self.config.planner.default_budget)
            .await
    }

    // ---------------------------------------------------------------------
    // Rules & breakers
    // ---------------------------------------------------------------------

    /// Validate `text` for `pod`; a block is also published as a
    /// `rule_violation` event
    #[instrument(skip(self, text))]
    pub async fn validate_content(&self, text: &str, pod: &str) -> Verdict {
        let verdict = self.constitution.validate(text, pod);
        if let Verdict::Blocked {
            rule_id,
            severity,
            reason,
        } = &verdict
        {
            emit_best_effort(
                self.events.as_ref(),
                NexusEvent::new(
                    pod,
                    event_types::RULE_VIOLATION,
                    json!({ "rule_id": rule_id, "severity": severity, "reason": reason }),
                ),
            )
            .await;
        }
        verdict
    }

    pub fn breaker_status(&self) -> Vec<BreakerStatus> {
        self.constitution.status()
    }

    // ---------------------------------------------------------------------
    // Proofs
    // ---------------------------------------------------------------------

    pub fn verify_proof(&self, proof: &ImprovementProof) -> bool {
        self.ledger.verify(proof)
    }

    /// Most recent proofs for `pod`, up to the configured history limit
    pub async fn proof_history(&self, pod: &str) -> Vec<ImprovementProof> {
        self.ledger.cycle_history(pod, self.config.ledger.history_limit).await
    }

    /// Stop the alert worker
    pub fn shutdown(self) {
        self.alert_worker.abort();
        info!("Self-tuner stopped");
    }
}
