//! Single-level Monte-Carlo tree search
//!
//! The tree is a root plus one child per candidate action, stored in an
//! arena with index back-references. Each budget iteration selects one
//! child by UCB1 (unvisited children first), awaits its simulation and
//! updates the statistics before the next selection, so iterations are
//! strictly sequential.
//!
//! Final ranking is by `mean_value / compute_cost`, not by UCB1.

use std::cmp::Ordering;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Reward source for one action, expected in `[0, 1]`
#[async_trait]
pub trait Simulation: Send + Sync {
    async fn simulate(&self, action: &str) -> anyhow::Result<f64>;
}

#[async_trait]
impl<F, Fut> Simulation for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<f64>> + Send,
{
    async fn simulate(&self, action: &str) -> anyhow::Result<f64> {
        (self)(action.to_string()).await
    }
}

/// Tree node
#[derive(Debug, Clone, PartialEq)]
pub struct MctsNode {
    pub action: String,
    /// Arena index of the parent (root has none)
    pub parent: Option<usize>,
    /// Arena indices of the children
    pub children: Vec<usize>,
    pub visits: u64,
    /// Cumulative reward
    pub value: f64,
    pub compute_cost: f64,
}

impl MctsNode {
    fn new(action: impl Into<String>, parent: Option<usize>, compute_cost: f64) -> Self {
        Self {
            action: action.into(),
            parent,
            children: Vec::new(),
            visits: 0,
            value: 0.0,
            compute_cost,
        }
    }

    pub fn mean_value(&self) -> f64 {
        self.value / self.visits.max(1) as f64
    }

    /// UCB1 priority; unvisited nodes are infinite
    pub fn ucb1(&self, parent_visits: u64, exploration: f64) -> f64 {
        if self.visits == 0 {
            return f64::INFINITY;
        }
        let ln_parent = if parent_visits > 0 { (parent_visits as f64).ln() } else { 0.0 };
        self.mean_value() + exploration * (ln_parent / self.visits as f64).sqrt()
    }

    pub fn reward_per_cost(&self) -> f64 {
        if self.compute_cost <= 0.0 {
            return 0.0;
        }
        self.mean_value() / self.compute_cost
    }
}

/// Ranked action returned by a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAction {
    pub action: String,
    pub visits: u64,
    pub mean_value: f64,
    pub compute_cost: f64,
    pub reward_per_cost: f64,
}

impl From<&MctsNode> for RankedAction {
    fn from(node: &MctsNode) -> Self {
        Self {
            action: node.action.clone(),
            visits: node.visits,
            mean_value: node.mean_value(),
            compute_cost: node.compute_cost,
            reward_per_cost: node.reward_per_cost(),
        }
    }
}

/// Arena holding the root at index 0 and its children
#[derive(Debug, Clone)]
pub struct SearchTree {
    nodes: Vec<MctsNode>,
}

impl SearchTree {
    const ROOT: usize = 0;

    fn new<A: AsRef<str>>(actions: &[(A, f64)]) -> Self {
        let mut nodes = Vec::with_capacity(actions.len() + 1);
        nodes.push(MctsNode::new("root", None, 1.0));
        for (action, cost) in actions {
            let idx = nodes.len();
            nodes.push(MctsNode::new(action.as_ref(), Some(Self::ROOT), *cost));
            nodes[Self::ROOT].children.push(idx);
        }
        Self { nodes }
    }

    pub fn root(&self) -> &MctsNode {
        &self.nodes[Self::ROOT]
    }

    pub fn children(&self) -> impl Iterator<Item = &MctsNode> {
        self.root().children.iter().map(|&i| &self.nodes[i])
    }

    /// First unvisited child, else the child with the highest UCB1 (first
    /// wins ties)
    fn select(&self, exploration: f64) -> Option<usize> {
        let root = self.root();
        if let Some(&idx) = root.children.iter().find(|&&i| self.nodes[i].visits == 0) {
            return Some(idx);
        }

        let mut best: Option<(usize, f64)> = None;
        for &idx in &root.children {
            let node = &self.nodes[idx];
            let parent_visits = node.parent.map(|p| self.nodes[p].visits).unwrap_or(node.visits);
            let score = node.ucb1(parent_visits, exploration);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn record(&mut self, idx: usize, reward: f64) {
        let node = &mut self.nodes[idx];
        node.visits += 1;
        node.value += reward;
        if let Some(parent) = node.parent {
            self.nodes[parent].visits += 1;
        }
    }

    /// Children sorted by reward per cost, descending (stable)
    pub fn ranking(&self) -> Vec<RankedAction> {
        let mut ranked: Vec<RankedAction> = self.children().map(RankedAction::from).collect();
        ranked.sort_by(|a, b| {
            b.reward_per_cost
                .partial_cmp(&a.reward_per_cost)
                .unwrap_or(Ordering::Equal)
        });
        ranked
    }
}

/// Budgeted MCTS planner
#[derive(Debug, Clone)]
pub struct MctsPlanner {
    exploration: f64,
}

impl MctsPlanner {
    pub fn new(exploration: f64) -> Self {
        Self { exploration }
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    /// Rank `actions` at unit compute cost
    pub async fn plan<A, S>(&self, goal: &str, actions: &[A], simulation: &S, budget: usize) -> Vec<RankedAction>
    where
        A: AsRef<str>,
        S: Simulation + ?Sized,
    {
        let costed: Vec<(&str, f64)> = actions.iter().map(|a| (a.as_ref(), 1.0)).collect();
        self.plan_with_costs(goal, &costed, simulation, budget).await
    }

    /// Rank `(action, compute_cost)` pairs
    #[instrument(skip(self, actions, simulation), fields(actions = actions.len()))]
    pub async fn plan_with_costs<A, S>(
        &self,
        goal: &str,
        actions: &[(A, f64)],
        simulation: &S,
        budget: usize,
    ) -> Vec<RankedAction>
    where
        A: AsRef<str>,
        S: Simulation + ?Sized,
    {
        let tree = self.search(actions, simulation, budget).await;
        let ranked = tree.ranking();

        match ranked.first() {
            Some(top) => info!(
                goal = %goal,
                budget,
                top = %top.action,
                score = top.reward_per_cost,
                "Plan complete"
            ),
            None => info!(goal = %goal, budget, "Plan complete with no actions"),
        }
        ranked
    }

    /// Run the budget and return the final tree
    pub async fn search<A, S>(&self, actions: &[(A, f64)], simulation: &S, budget: usize) -> SearchTree
    where
        A: AsRef<str>,
        S: Simulation + ?Sized,
    {
        let mut tree = SearchTree::new(actions);

        for iteration in 0..budget {
            let Some(idx) = tree.select(self.exploration) else {
                break;
            };
            let action = tree.nodes[idx].action.clone();

            let reward = match AssertUnwindSafe(simulation.simulate(&action)).catch_unwind().await {
                Ok(Ok(reward)) if reward.is_finite() => reward.clamp(0.0, 1.0),
                Ok(Ok(reward)) => {
                    warn!(action = %action, reward, "Non-finite simulation reward; counting 0");
                    0.0
                }
                Ok(Err(e)) => {
                    warn!(action = %action, error = %e, "Simulation failed; counting 0");
                    0.0
                }
                Err(_) => {
                    warn!(action = %action, "Simulation panicked; counting 0");
                    0.0
                }
            };
            debug!(iteration, action = %action, reward, "Simulation complete");
            tree.record(idx, reward);
        }

        tree
    }
}

impl Default for MctsPlanner {
    fn default() -> Self {
        Self::new(std::f64::consts::SQRT_2)
    }
}
