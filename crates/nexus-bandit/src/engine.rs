//! Variant engine
//!
//! Online A/B selection between competing script variants. Statistics live
//! in the audit store, one record per variant; the engine itself only holds
//! per-element locks. Every write to a variant record (outcome, retirement,
//! promotion flag) happens under the element's record lock on a freshly read
//! record. A separate promotion lock keeps one promotion in flight per
//! element.

use std::sync::Arc;

use dashmap::DashMap;
use nexus_common::{
    emit_best_effort, event_types, Alert, AuditStore, DeploymentAction, EventSink, NexusEvent, Outcome,
    TextGenerator,
};
use nexus_constitution::{breakers, Constitution};
use nexus_ledger::{ImprovementProof, ProofLedger};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::variant::{element_prefix, fingerprint, variant_key, VariantElement, VariantRecord};
use crate::BanditConfig;

/// Baseline win rate a champion is measured against
pub const PROMOTION_BASELINE: f64 = 0.5;

/// UCB1 score of one variant
///
/// `wins / (calls + 1) + sqrt(2 ln(total_calls + 1) / (calls + 1))`
pub fn ucb1_score(calls: u64, wins: u64, total_calls: u64) -> f64 {
    let calls = calls as f64;
    let exploitation = wins as f64 / (calls + 1.0);
    let exploration = (2.0 * (total_calls as f64 + 1.0).ln() / (calls + 1.0)).sqrt();
    exploitation + exploration
}

/// Index of the best `(calls, wins)` pair; ties go to the lowest index
pub fn select_index(stats: &[(u64, u64)]) -> Option<usize> {
    let total_calls = stats.iter().map(|(calls, _)| calls).sum::<u64>().max(1);

    let mut best: Option<(usize, f64)> = None;
    for (i, (calls, wins)) in stats.iter().enumerate() {
        let score = ucb1_score(*calls, *wins, total_calls);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// A completed champion promotion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub element: VariantElement,
    /// Champion record after flagging
    pub variant: VariantRecord,
    pub win_rate: f64,
    pub cycle_id: String,
    /// Generated deployable content
    pub artifact: String,
    pub proof: Option<ImprovementProof>,
}

type ElementLocks = DashMap<VariantElement, Arc<Mutex<()>>>;

/// Bandit engine for one pod's script variants
pub struct VariantEngine {
    config: BanditConfig,
    store: Arc<dyn AuditStore>,
    generator: Arc<dyn TextGenerator>,
    deployer: Option<Arc<dyn DeploymentAction>>,
    constitution: Arc<Constitution>,
    ledger: Arc<ProofLedger>,
    events: Arc<dyn EventSink>,
    record_locks: ElementLocks,
    promotion_locks: ElementLocks,
}

impl VariantEngine {
    pub fn new(
        config: BanditConfig,
        store: Arc<dyn AuditStore>,
        generator: Arc<dyn TextGenerator>,
        constitution: Arc<Constitution>,
        ledger: Arc<ProofLedger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            deployer: None,
            constitution,
            ledger,
            events,
            record_locks: DashMap::new(),
            promotion_locks: DashMap::new(),
        }
    }

    /// Deployment action that makes a promoted champion live
    pub fn with_deployer(mut self, deployer: Arc<dyn DeploymentAction>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    pub fn pod(&self) -> &str {
        &self.config.pod
    }

    fn lock_for(locks: &ElementLocks, element: VariantElement) -> Arc<Mutex<()>> {
        locks.entry(element).or_default().clone()
    }

    // ---------------------------------------------------------------------
    // Generation & selection
    // ---------------------------------------------------------------------

    /// `n` candidate texts for `element`
    ///
    /// Falls back to the built-in set when the generator gate is closed, the
    /// generator fails, or its output is not a non-empty JSON array.
    #[instrument(skip(self, context), fields(pod = %self.config.pod))]
    pub async fn generate_variants(&self, element: VariantElement, context: &Value, n: usize) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }
        if !self.constitution.check_breaker(breakers::AI_CASCADE) {
            debug!(element = %element, "Generator gate closed; serving fallback variants");
            return element.fallback_variants(n);
        }

        let prompt = format!(
            "Generate exactly {n} different, distinct versions of the '{element}' for this \
             outbound sales call context:\n{context}\n\n\
             Return ONLY a JSON array of {n} strings. No keys. No markdown fences. Raw JSON array."
        );

        match self.generator.generate(&prompt, "variant_generation", self.pod()).await {
            Ok(raw) => {
                self.constitution.record_success(breakers::AI_CASCADE);
                match parse_variants(&raw, n) {
                    Some(variants) => variants,
                    None => {
                        warn!(element = %element, "Generator output malformed; serving fallback variants");
                        element.fallback_variants(n)
                    }
                }
            }
            Err(e) => {
                self.constitution.record_failure(breakers::AI_CASCADE);
                warn!(element = %element, error = %e, "Variant generation failed; serving fallback variants");
                element.fallback_variants(n)
            }
        }
    }

    /// Stored record for a variant text, if any
    pub async fn variant(&self, element: VariantElement, text: &str) -> Option<VariantRecord> {
        let key = variant_key(element, fingerprint(text));
        match self.store.get(self.pod(), &key).await {
            Ok(Some(record)) => serde_json::from_value(record).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Variant stats unavailable");
                None
            }
        }
    }

    /// Pick a variant by UCB1. Missing or unreadable stats count as
    /// `{calls: 0, wins: 0}`. Returns `None` only for an empty list.
    pub async fn select_variant(&self, element: VariantElement, variants: &[String]) -> Option<(String, usize)> {
        let mut stats = Vec::with_capacity(variants.len());
        for text in variants {
            let counts = self
                .variant(element, text)
                .await
                .map(|r| (r.calls, r.wins))
                .unwrap_or((0, 0));
            stats.push(counts);
        }

        let index = select_index(&stats)?;
        debug!(element = %element, index, calls = stats[index].0, "Variant selected");
        Some((variants[index].clone(), index))
    }

    // ---------------------------------------------------------------------
    // Outcomes & retirement
    // ---------------------------------------------------------------------

    /// Count one call for `variant` (a win when `won`), then check the element
    /// for a champion. Store failures are logged; the updated in-memory
    /// record is returned regardless.
    #[instrument(skip(self, variant), fields(pod = %self.config.pod))]
    pub async fn record_outcome(
        &self,
        element: VariantElement,
        index: usize,
        variant: &str,
        won: bool,
    ) -> VariantRecord {
        let record = {
            let lock = Self::lock_for(&self.record_locks, element);
            let _guard = lock.lock().await;

            let mut record = self
                .variant(element, variant)
                .await
                .unwrap_or_else(|| VariantRecord::new(element, variant));
            record.record(won);
            self.persist(&record, json!({ "type": "rl_variant", "element": element, "variant_idx": index }))
                .await;
            record
        };
        info!(element = %element, index, won, calls = record.calls, "Variant outcome recorded");

        let promotion = self.check_and_promote_champion(element).await;
        if let Outcome::Failed { reason } = &promotion {
            warn!(element = %element, reason = %reason, "Champion promotion failed");
        }
        record
    }

    /// Up to `scan_limit` non-retired variants of `element`, most recent
    /// first
    ///
    /// The query window doubles until it holds `scan_limit` live records or
    /// the store runs out, so retired records never crowd live ones out.
    async fn load_variants(&self, element: VariantElement) -> Vec<VariantRecord> {
        let limit = self.config.scan_limit;
        let prefix = element_prefix(element);
        let mut window = limit.max(1);

        loop {
            let records = match self.store.query_recent(self.pod(), &prefix, window).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(element = %element, error = %e, "Variant scan failed");
                    return Vec::new();
                }
            };
            let exhausted = records.len() < window;

            let mut live: Vec<VariantRecord> = records
                .into_iter()
                .filter_map(|record| serde_json::from_value::<VariantRecord>(record).ok())
                .filter(|record| record.element == element && !record.retired)
                .collect();

            if live.len() >= limit || exhausted || window == usize::MAX {
                live.truncate(limit);
                return live;
            }
            debug!(element = %element, window, live = live.len(), "Widening variant scan");
            window = window.saturating_mul(2);
        }
    }

    async fn persist(&self, record: &VariantRecord, metadata: Value) -> bool {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Variant record not serializable");
                return false;
            }
        };
        match self.store.put(self.pod(), &record.key(), value, metadata).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %record.key(), error = %e, "Failed to persist variant record");
                false
            }
        }
    }

    /// Retire with the configured thresholds
    pub async fn retire_losing_variants(&self, element: VariantElement) -> Vec<VariantRecord> {
        self.retire_losing_variants_with(element, self.config.retire_min_calls, self.config.retire_min_win_rate)
            .await
    }

    /// Flag every variant with `calls >= min_calls` and a win rate below
    /// `min_win_rate` as retired. Variants under `min_calls` are never
    /// judged.
    #[instrument(skip(self), fields(pod = %self.config.pod))]
    pub async fn retire_losing_variants_with(
        &self,
        element: VariantElement,
        min_calls: u64,
        min_win_rate: f64,
    ) -> Vec<VariantRecord> {
        let lock = Self::lock_for(&self.record_locks, element);
        let _guard = lock.lock().await;

        let mut retired = Vec::new();
        for mut record in self.load_variants(element).await {
            if record.calls < min_calls || record.win_rate() >= min_win_rate {
                continue;
            }
            record.retired = true;
            let metadata = json!({ "type": "rl_variant", "element": element, "status": "retired" });
            if self.persist(&record, metadata).await {
                info!(
                    element = %element,
                    fingerprint = record.fingerprint,
                    win_rate = record.win_rate(),
                    calls = record.calls,
                    "Variant retired"
                );
                retired.push(record);
            }
        }

        if !retired.is_empty() {
            let fingerprints: Vec<String> = retired.iter().map(|r| format!("{:06x}", r.fingerprint)).collect();
            emit_best_effort(
                self.events.as_ref(),
                NexusEvent::new(
                    self.pod(),
                    event_types::VARIANTS_RETIRED,
                    json!({ "element": element, "count": retired.len(), "fingerprints": fingerprints }),
                ),
            )
            .await;
        }
        retired
    }

    /// Texts of every non-retired variant of `element`
    pub async fn get_active_variants(&self, element: VariantElement) -> Vec<String> {
        self.load_variants(element).await.into_iter().map(|r| r.text).collect()
    }

    // ---------------------------------------------------------------------
    // Promotion
    // ---------------------------------------------------------------------

    fn find_champion(&self, candidates: Vec<VariantRecord>) -> Option<VariantRecord> {
        let mut champion: Option<VariantRecord> = None;
        for record in candidates {
            if !record.is_challenger()
                || record.calls < self.config.promote_min_calls
                || record.win_rate() < self.config.promote_min_win_rate
            {
                continue;
            }
            match &champion {
                Some(best) if record.win_rate() <= best.win_rate() => {}
                _ => champion = Some(record),
            }
        }
        champion
    }

    /// Promote the best qualifying variant of `element`
    ///
    /// Calls for the same element run one at a time, so a variant is never
    /// promoted twice.
    #[instrument(skip(self), fields(pod = %self.config.pod))]
    pub async fn check_and_promote_champion(&self, element: VariantElement) -> Outcome<Promotion> {
        let lock = Self::lock_for(&self.promotion_locks, element);
        let _guard = lock.lock().await;

        let Some(champion) = self.find_champion(self.load_variants(element).await) else {
            return Outcome::skipped("no qualifying variant");
        };

        for gate in [breakers::AI_CASCADE, breakers::DEPLOYMENT] {
            if !self.constitution.check_breaker(gate) {
                return Outcome::skipped(format!("gate closed: {}", gate));
            }
        }

        let win_rate = champion.win_rate();
        let calls = champion.calls;
        let prompt = format!(
            "You are updating the {pod} voice agent's system prompt.\n\
             The {element} variant below has won {wins} of {calls} calls ({rate:.0}% win rate) \
             and is now the permanent script.\n\n\
             Champion {element}: {text}\n\n\
             Generate a complete, updated system prompt that permanently incorporates this \
             champion {element} while keeping the agent's personality. Under 800 words. \
             Ready to deploy immediately.",
            pod = self.pod(),
            wins = champion.wins,
            rate = win_rate * 100.0,
            text = champion.text,
        );

        let artifact = match self.generator.generate(&prompt, "champion_promotion", self.pod()).await {
            Ok(artifact) => {
                self.constitution.record_success(breakers::AI_CASCADE);
                artifact
            }
            Err(e) => {
                self.constitution.record_failure(breakers::AI_CASCADE);
                warn!(element = %element, error = %e, "Champion artifact generation failed");
                return Outcome::failed(format!("generator failed: {}", e));
            }
        };

        if let Some(deployer) = &self.deployer {
            let config = json!({
                "element": element,
                "variant": champion.text,
                "content": artifact,
            });
            match deployer.deploy(&config).await {
                Ok(true) => self.constitution.record_success(breakers::DEPLOYMENT),
                Ok(false) => {
                    self.constitution.record_failure(breakers::DEPLOYMENT);
                    warn!(element = %element, "Deployment rejected champion");
                    return Outcome::failed("deployment rejected champion");
                }
                Err(e) => {
                    self.constitution.record_failure(breakers::DEPLOYMENT);
                    error!(element = %element, error = %e, "Champion deployment failed");
                    return Outcome::failed(format!("deployment failed: {}", e));
                }
            }
        } else {
            debug!(element = %element, "No deployment action; champion recorded only");
        }

        let cycle_id = format!("champion_{}_{:06x}", element, champion.fingerprint);
        let proof = match self
            .ledger
            .generate_proof(
                self.pod(),
                &cycle_id,
                PROMOTION_BASELINE,
                win_rate,
                &[win_rate; 8],
                calls,
            )
            .await
        {
            Ok(proof) => Some(proof),
            Err(e) => {
                warn!(element = %element, error = %e, "Improvement proof not generated");
                None
            }
        };

        // Flag the current record; outcomes recorded since the scan must survive
        let champion = {
            let lock = Self::lock_for(&self.record_locks, element);
            let _guard = lock.lock().await;

            let mut current = self
                .variant(element, &champion.text)
                .await
                .unwrap_or(champion);
            current.promoted = true;
            self.persist(&current, json!({ "type": "rl_variant", "element": element, "status": "promoted" }))
                .await;
            current
        };

        emit_best_effort(
            self.events.as_ref(),
            NexusEvent::new(
                self.pod(),
                event_types::VARIANT_PROMOTED,
                json!({
                    "element": element,
                    "fingerprint": format!("{:06x}", champion.fingerprint),
                    "win_rate": win_rate,
                    "calls": calls,
                    "cycle_id": cycle_id,
                }),
            ),
        )
        .await;

        self.constitution.alerts().dispatch(Alert::new(
            "champion_promoted",
            self.pod(),
            &format!(
                "{} champion promoted at {:.0}% over {} calls",
                element,
                win_rate * 100.0,
                calls
            ),
        ));

        info!(element = %element, win_rate, calls, "Champion promoted");
        Outcome::Completed(Promotion {
            element,
            variant: champion,
            win_rate,
            cycle_id,
            artifact,
            proof,
        })
    }
}

/// Up to `n` strings from a JSON array; `None` when the output is not a
/// non-empty array
fn parse_variants(raw: &str, n: usize) -> Option<Vec<String>> {
    let items: Vec<Value> = serde_json::from_str(raw.trim()).ok()?;
    let variants: Vec<String> = items
        .into_iter()
        .take(n)
        .map(|item| match item {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .filter(|text| !text.trim().is_empty())
        .collect();

    if variants.is_empty() {
        None
    } else {
        Some(variants)
    }
}
