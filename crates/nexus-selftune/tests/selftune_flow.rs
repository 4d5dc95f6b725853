//! Integration tests for the Nexus self-tuning core
//!
//! Exercises the wired facade end to end:
//! - evolution cycle -> genome application -> signed proof
//! - variant outcomes -> champion promotion -> proof + alert
//! - rule gate and breaker gating
//! - MCTS ranking through the configured planner

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nexus_selftune::nexus_bandit::VariantElement;
use nexus_selftune::nexus_common::{
    event_types, Alert, AlertSink, BroadcastEventSink, DeploymentAction, Genome, NexusEvent, TextGenerator,
};
use nexus_selftune::nexus_constitution::{breakers, Verdict};
use nexus_selftune::nexus_darwinian::EvolutionConfig;
use nexus_selftune::nexus_ledger::ImprovementProof;
use nexus_selftune::{NexusConfig, SelfTuner};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

// =============================================================================
// Harness
// =============================================================================

struct ChannelAlertSink(mpsc::UnboundedSender<Alert>);

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.0.send(alert.clone())?;
        Ok(())
    }
}

struct ScriptedGenerator;

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, task_type: &str, _pod: &str) -> anyhow::Result<String> {
        match task_type {
            "variant_generation" => Ok(r#"["Hi there", "Hello friend", "Quick question"]"#.to_string()),
            _ => Ok("You are ARIA. Open with: Hi there".to_string()),
        }
    }
}

#[derive(Default)]
struct RecordingDeployer {
    configs: Mutex<Vec<Value>>,
}

#[async_trait]
impl DeploymentAction for RecordingDeployer {
    async fn deploy(&self, config: &Value) -> anyhow::Result<bool> {
        if let Ok(mut configs) = self.configs.lock() {
            configs.push(config.clone());
        }
        Ok(true)
    }
}

struct TestHarness {
    tuner: SelfTuner,
    events: broadcast::Receiver<NexusEvent>,
    alerts: mpsc::UnboundedReceiver<Alert>,
    variant_deployer: Arc<RecordingDeployer>,
}

impl TestHarness {
    fn new() -> Self {
        let config = NexusConfig {
            evolution: EvolutionConfig {
                population_size: 12,
                generations: 3,
                seed: Some(3),
                ..EvolutionConfig::default()
            },
            ..NexusConfig::default()
        };

        let sink = Arc::new(BroadcastEventSink::new(256));
        let events = sink.subscribe();
        let (alert_tx, alerts) = mpsc::unbounded_channel();
        let variant_deployer = Arc::new(RecordingDeployer::default());

        let tuner = SelfTuner::builder(config)
            .events(sink)
            .generator(Arc::new(ScriptedGenerator))
            .alert_sink(Arc::new(ChannelAlertSink(alert_tx)))
            .variant_deployer(variant_deployer.clone())
            .build()
            .unwrap();

        Self {
            tuner,
            events,
            alerts,
            variant_deployer,
        }
    }

    async fn next_alert(&mut self) -> Alert {
        tokio::time::timeout(Duration::from_secs(5), self.alerts.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn next_event_of(&mut self, event_type: &str) -> NexusEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.unwrap();
                if event.event_type == event_type {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }
}

// =============================================================================
// Evolution
// =============================================================================

#[tokio::test]
async fn test_cycle_applies_and_certifies() {
    let mut h = TestHarness::new();
    let deployer = Arc::new(RecordingDeployer::default());
    h.tuner
        .register_pod("aurora", |g: Genome| async move { Ok::<f64, anyhow::Error>(g.gene(0)) });
    h.tuner.register_deployer("aurora", deployer.clone());

    let report = h.tuner.run_cycle("aurora").await.completed().unwrap();

    assert!(report.result.best_genome.is_normalized());
    assert!(report.applied.as_ref().unwrap().is_completed());
    let temperature = report.params["vapi_temperature"].as_f64().unwrap();
    assert!((0.3..=1.0).contains(&temperature));

    let deployed = deployer.configs.lock().unwrap().clone();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0]["vapi_temperature"].as_f64(), Some(temperature));

    let proof = report.proof.unwrap();
    assert!(h.tuner.verify_proof(&proof));
    assert_eq!(proof.avg_score_after, (report.result.best_score * 1e6).round() / 1e6);

    let history = h.tuner.proof_history("aurora").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], proof);

    h.next_event_of(event_types::CYCLE_COMPLETED).await;
    h.next_event_of(event_types::GENOME_APPLIED).await;
}

#[tokio::test]
async fn test_open_breaker_skips_cycle_and_alerts() {
    let mut h = TestHarness::new();
    h.tuner
        .register_pod("janus", |g: Genome| async move { Ok::<f64, anyhow::Error>(g.gene(7)) });

    h.tuner.constitution().record_failure(breakers::EVOLUTION_CYCLE);
    h.tuner.constitution().record_failure(breakers::EVOLUTION_CYCLE);

    let outcome = h.tuner.run_cycle("janus").await;
    assert!(outcome.is_skipped());
    assert_eq!(outcome.reason(), Some("gate closed: evolution_cycle"));

    let alert = h.next_alert().await;
    assert_eq!(alert.rule, "circuit_breaker:evolution_cycle");

    h.tuner.constitution().record_success(breakers::EVOLUTION_CYCLE);
    assert!(h.tuner.run_cycle("janus").await.is_completed());
    assert!(h
        .tuner
        .breaker_status()
        .iter()
        .all(|status| !status.open));
}

#[tokio::test]
async fn test_unregistered_pod_fails() {
    let h = TestHarness::new();
    assert!(h.tuner.run_cycle("ghost").await.is_failed());
}

// =============================================================================
// Variants
// =============================================================================

#[tokio::test]
async fn test_variant_lifecycle_to_promotion() {
    let mut h = TestHarness::new();
    let variants = h.tuner.variants().clone();

    let texts = variants
        .generate_variants(VariantElement::Opener, &json!({"company": "Acme"}), 3)
        .await;
    assert_eq!(texts, vec!["Hi there", "Hello friend", "Quick question"]);

    let (first, index) = variants.select_variant(VariantElement::Opener, &texts).await.unwrap();
    assert_eq!(index, 0);

    for i in 0..30 {
        variants
            .record_outcome(VariantElement::Opener, index, &first, i % 3 != 0)
            .await;
    }

    let champion = variants.variant(VariantElement::Opener, &first).await.unwrap();
    assert_eq!((champion.calls, champion.wins), (30, 20));
    assert!(champion.promoted);

    let deployed = h.variant_deployer.configs.lock().unwrap().clone();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0]["variant"], "Hi there");

    let event = h.next_event_of(event_types::VARIANT_PROMOTED).await;
    assert_eq!(event.payload["element"], "opener");
    assert_eq!(event.payload["calls"], 30);

    let alert = h.next_alert().await;
    assert_eq!(alert.rule, "champion_promoted");

    let history = h.tuner.proof_history("aurora").await;
    assert_eq!(history.len(), 1);
    assert!(history[0].cycle_id.starts_with("champion_opener_"));
    assert!(h.tuner.verify_proof(&history[0]));

    // a second pass finds nothing left to promote
    assert!(variants
        .check_and_promote_champion(VariantElement::Opener)
        .await
        .is_skipped());
}

#[tokio::test]
async fn test_losers_retire_and_leave_rotation() {
    let h = TestHarness::new();
    let variants = h.tuner.variants().clone();

    for i in 0..25 {
        variants
            .record_outcome(VariantElement::ClosingAsk, 0, "Tuesday at 3?", i == 0)
            .await;
        variants
            .record_outcome(VariantElement::ClosingAsk, 1, "Thursday morning?", i % 2 == 0)
            .await;
    }

    let retired = variants.retire_losing_variants(VariantElement::ClosingAsk).await;
    assert_eq!(retired.len(), 1);
    assert_eq!(retired[0].text, "Tuesday at 3?");
    assert_eq!(
        variants.get_active_variants(VariantElement::ClosingAsk).await,
        vec!["Thursday morning?"]
    );
}

// =============================================================================
// Rules & planning
// =============================================================================

#[tokio::test]
async fn test_rule_violation_blocks_alerts_and_publishes() {
    let mut h = TestHarness::new();

    let verdict = h
        .tuner
        .validate_content("Reach me at jane.doe@example.com", "aurora")
        .await;
    assert_eq!(verdict.rule_id(), Some("no_pii_storage"));

    let event = h.next_event_of(event_types::RULE_VIOLATION).await;
    assert_eq!(event.payload["rule_id"], "no_pii_storage");

    let alert = h.next_alert().await;
    assert_eq!(alert.rule, "no_pii_storage");
    assert_eq!(alert.pod, "aurora");

    assert_eq!(
        h.tuner.validate_content("Let's book a demo", "aurora").await,
        Verdict::Allowed
    );
}

#[tokio::test]
async fn test_planner_ranks_best_action_first() {
    let h = TestHarness::new();
    let simulate = |action: String| async move {
        Ok::<f64, anyhow::Error>(match action.as_str() {
            "a" => 0.9,
            "b" => 0.3,
            _ => 0.6,
        })
    };

    let ranked = h.tuner.plan("pick a regime", &["a", "b", "c"], &simulate).await;
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0].action, "a");
    assert_eq!(ranked.iter().map(|r| r.visits).sum::<u64>(), 50);
}

// =============================================================================
// Proof files
// =============================================================================

#[tokio::test]
async fn test_proof_survives_file_roundtrip_and_detects_edits() {
    let h = TestHarness::new();
    let proof = h
        .tuner
        .ledger()
        .generate_proof("dan", "manual-1", 0.41, 0.58, &[0.2; 8], 12)
        .await
        .unwrap();

    let path = std::env::temp_dir().join(format!("nexus-proof-{}.json", proof.proof_hash));
    std::fs::write(&path, serde_json::to_string_pretty(&proof).unwrap()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let loaded: ImprovementProof = serde_json::from_str(&text).unwrap();
    assert!(h.tuner.verify_proof(&loaded));

    let mut edited: Value = serde_json::from_str(&text).unwrap();
    edited["n_calls"] = json!(1200);
    let edited: ImprovementProof = serde_json::from_value(edited).unwrap();
    assert!(!h.tuner.verify_proof(&edited));

    let _ = std::fs::remove_file(&path);
}
