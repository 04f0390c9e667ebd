// ============================================
// UCB1 Arm Policy
// ============================================
//
// score(i) = mean_reward(i) + bias(i) + c * sqrt(ln(N) / n(i))
//
// Where:
//   - mean_reward(i): rewards(i) / n(i)
//   - bias(i): prior offset fixed at instance creation
//   - c: exploration constant
//   - N: total pulls across the instance
//   - n(i): pulls of arm i
//
// Arms never pulled are selected first, lowest index first.

use super::{argmax, cold_start_arm, ucb_score};
use crate::models::{InstanceState, DEFAULT_EXPLORATION};
use tracing::debug;

/// Deterministic UCB1 selector.
#[derive(Debug, Clone, Copy)]
pub struct Ucb1 {
    /// Exploration constant (c in UCB formula)
    /// Higher = more exploration, lower = more exploitation
    exploration_constant: f64,
}

impl Default for Ucb1 {
    fn default() -> Self {
        Self {
            exploration_constant: DEFAULT_EXPLORATION,
        }
    }
}

impl Ucb1 {
    pub fn new(exploration_constant: f64) -> Self {
        Self {
            exploration_constant,
        }
    }

    pub fn exploration_constant(&self) -> f64 {
        self.exploration_constant
    }

    /// UCB score for every arm; never-pulled arms score `f64::MAX`.
    pub fn scores(&self, state: &InstanceState) -> Vec<f64> {
        (0..state.len())
            .map(|i| {
                ucb_score(
                    state.counts()[i],
                    state.rewards()[i],
                    state.bias_at(i),
                    state.total_pulls(),
                    self.exploration_constant,
                )
            })
            .collect()
    }

    pub fn select(&self, state: &InstanceState) -> usize {
        if let Some(index) = cold_start_arm(state) {
            debug!(arm = index, "UCB1 cold-start selection");
            return index;
        }

        let scores = self.scores(state);
        let index = argmax(&scores);

        debug!(
            arm = index,
            score = scores[index],
            total_pulls = state.total_pulls(),
            "UCB1 selection completed"
        );

        index
    }
}
