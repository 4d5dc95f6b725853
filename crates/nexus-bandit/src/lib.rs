//! # Bandit
//!
//! Champion/challenger testing of script variants with UCB1.
//!
//! ```text
//! generate -> select (UCB1) -> record outcome -> promote champion
//!                                   \-> retire losers
//! ```
//!
//! - Retirement: `calls >= 20` and win rate `< 10%`
//! - Promotion: `calls >= 30` and win rate `>= 60%`, gated by the
//!   `ai_cascade` and `deployment` breakers, certified by an improvement
//!   proof

pub mod engine;
pub mod variant;

use serde::{Deserialize, Serialize};

pub use engine::{select_index, ucb1_score, Promotion, VariantEngine, PROMOTION_BASELINE};
pub use variant::{fingerprint, variant_key, UnknownElement, VariantElement, VariantRecord};

/// Bandit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Pod whose variants this engine tracks
    pub pod: String,
    pub variants_per_element: usize,
    pub retire_min_calls: u64,
    pub retire_min_win_rate: f64,
    pub promote_min_calls: u64,
    pub promote_min_win_rate: f64,
    /// Max records read per element scan
    pub scan_limit: usize,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            pod: "aurora".to_string(),
            variants_per_element: 5,
            retire_min_calls: 20,
            retire_min_win_rate: 0.10,
            promote_min_calls: 30,
            promote_min_win_rate: 0.60,
            scan_limit: 50,
        }
    }
}
