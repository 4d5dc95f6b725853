//! # Planner
//!
//! Budgeted Monte-Carlo tree search for ranking a small set of candidate
//! actions (market regimes, next-best-actions). Independent of the other
//! self-tuning components; any pod can call it with its own simulation.
//!
//! ```text
//! for _ in 0..budget:
//!     child = unvisited child, else argmax UCB1 = mean + c * sqrt(ln(N) / n)
//!     reward = simulate(child.action)      // failure => 0, visit still counts
//!     child.visits += 1; child.value += reward; root.visits += 1
//! rank children by mean / compute_cost
//! ```

pub mod mcts;

use serde::{Deserialize, Serialize};

pub use mcts::{MctsNode, MctsPlanner, RankedAction, SearchTree, Simulation};

/// Planner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Simulations per plan when the caller does not choose
    pub default_budget: usize,
    /// UCB1 exploration constant
    pub exploration: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_budget: 50,
            exploration: std::f64::consts::SQRT_2,
        }
    }
}

impl From<&PlannerConfig> for MctsPlanner {
    fn from(config: &PlannerConfig) -> Self {
        MctsPlanner::new(config.exploration)
    }
}

/// Rank `actions` with the default planner
pub async fn plan<A, S>(goal: &str, actions: &[A], simulation: &S, budget: usize) -> Vec<RankedAction>
where
    A: AsRef<str>,
    S: Simulation + ?Sized,
{
    MctsPlanner::default().plan(goal, actions, simulation, budget).await
}
