// ============================================
// Bandit Policy Module
// ============================================
//
// Pure decision functions over an InstanceState:
// 1. Cold start: any never-pulled arm wins, lowest index first
// 2. UCB1: deterministic arg-max of the confidence-adjusted score
// 3. pUCB: softmax sample over the best-scoring arms
// 4. update: count the pull and accumulate the observed reward
//
// Nothing here touches the store; the manager feeds states in and writes
// the returned states back.

pub mod pucb;
pub mod ucb;

pub use pucb::PUcb;
pub use ucb::Ucb1;

use crate::error::{BanditError, Result};
use crate::models::{InstanceState, PolicyParams};
use rand::Rng;
use std::cmp::Ordering;

/// Policy built from the parameters stored with an instance.
#[derive(Debug, Clone, Copy)]
pub enum Policy {
    Ucb1(Ucb1),
    Pucb(PUcb),
}

impl From<PolicyParams> for Policy {
    fn from(params: PolicyParams) -> Self {
        match params {
            PolicyParams::Ucb1 { exploration } => Policy::Ucb1(Ucb1::new(exploration)),
            PolicyParams::Pucb {
                exploration,
                bias_weight,
                temperature,
                top_n,
            } => Policy::Pucb(PUcb::new(exploration, bias_weight, temperature, top_n)),
        }
    }
}

impl Policy {
    pub fn for_state(state: &InstanceState) -> Self {
        state.policy().into()
    }

    pub fn scores(&self, state: &InstanceState) -> Vec<f64> {
        match self {
            Policy::Ucb1(p) => p.scores(state),
            Policy::Pucb(p) => p.scores(state),
        }
    }

    pub fn select<R: Rng + ?Sized>(&self, state: &InstanceState, rng: &mut R) -> usize {
        match self {
            Policy::Ucb1(p) => p.select(state),
            Policy::Pucb(p) => p.select(state, rng),
        }
    }

    /// Deterministic ordering of the best `top_k` arms (all arms when
    /// `top_k == 0`). Never-pulled arms come first in index order.
    pub fn rank(&self, state: &InstanceState, top_k: usize) -> Vec<usize> {
        let limit = if top_k == 0 { state.len() } else { top_k };
        rank_scores(&self.scores(state), limit)
    }
}

/// Lowest-index arm that has never been pulled.
pub fn cold_start_arm(state: &InstanceState) -> Option<usize> {
    state.counts().iter().position(|&c| c == 0)
}

pub(crate) fn ucb_score(
    count: u64,
    reward: f64,
    bias_term: f64,
    total_pulls: u64,
    exploration_constant: f64,
) -> f64 {
    if count == 0 {
        return f64::MAX;
    }

    let exploit = reward / count as f64 + bias_term;
    let explore = exploration_constant * ((total_pulls as f64).ln() / count as f64).sqrt();

    exploit + explore
}

/// First index holding the maximum score.
pub(crate) fn argmax(scores: &[f64]) -> usize {
    let mut best = 0;
    for (i, score) in scores.iter().enumerate().skip(1) {
        if *score > scores[best] {
            best = i;
        }
    }
    best
}

/// Indices sorted by descending score, ties by ascending index.
pub(crate) fn rank_scores(scores: &[f64], limit: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    // Stable sort keeps equal scores in index order.
    indices.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
    indices.truncate(limit);
    indices
}

pub fn validate_reward(reward: f64) -> Result<()> {
    if reward.is_finite() {
        Ok(())
    } else {
        Err(BanditError::InvalidReward(reward))
    }
}

/// Record one observed reward for `index`, returning the new state.
///
/// The version marker is left untouched; the store assigns the next one on
/// a successful compare-and-swap.
pub fn update(state: &InstanceState, index: usize, reward: f64) -> Result<InstanceState> {
    update_many(state, &[(index, reward)])
}

/// Apply several rewards at once. The batch is validated in full before any
/// arm is touched.
pub fn update_many(state: &InstanceState, rewards: &[(usize, f64)]) -> Result<InstanceState> {
    for &(index, reward) in rewards {
        validate_reward(reward)?;
        if index >= state.len() {
            return Err(BanditError::InvalidInstance(format!(
                "arm index {index} out of range for {} arms",
                state.len()
            )));
        }
    }

    let mut next = state.clone();
    for &(index, reward) in rewards {
        next.apply_reward(index, reward);
        // Finite inputs can still overflow the running sum.
        if !next.rewards()[index].is_finite() {
            return Err(BanditError::InvalidReward(reward));
        }
    }
    Ok(next)
}
