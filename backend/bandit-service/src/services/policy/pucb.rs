// ============================================
// pUCB Arm Policy (probability-weighted UCB)
// ============================================
//
// Same score as UCB1 with the prior bias scaled by its own weight:
//   score(i) = mean_reward(i) + w * bias(i) + c * sqrt(ln(N) / n(i))
//
// Instead of a hard arg-max, the top_n scoring arms are sampled with
// probability softmax(score / temperature). Used for the category level,
// where locking onto one category early is undesirable.

use super::{cold_start_arm, rank_scores, ucb_score};
use crate::utils::softmax;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

use crate::models::InstanceState;

#[derive(Debug, Clone, Copy)]
pub struct PUcb {
    exploration_constant: f64,
    bias_weight: f64,
    /// 0.0 degenerates to a deterministic arg-max
    temperature: f64,
    /// Number of best-scoring arms the sample is drawn from
    top_n: usize,
}

impl PUcb {
    pub fn new(
        exploration_constant: f64,
        bias_weight: f64,
        temperature: f64,
        top_n: usize,
    ) -> Self {
        Self {
            exploration_constant,
            bias_weight,
            temperature,
            top_n: top_n.max(1),
        }
    }

    pub fn scores(&self, state: &InstanceState) -> Vec<f64> {
        (0..state.len())
            .map(|i| {
                ucb_score(
                    state.counts()[i],
                    state.rewards()[i],
                    self.bias_weight * state.bias_at(i),
                    state.total_pulls(),
                    self.exploration_constant,
                )
            })
            .collect()
    }

    /// Selection probability for each of the top candidates, best first.
    pub fn candidate_weights(&self, state: &InstanceState) -> Vec<(usize, f64)> {
        let scores = self.scores(state);
        let candidates = rank_scores(&scores, self.top_n);
        if self.temperature <= 0.0 || candidates.len() == 1 {
            return candidates
                .iter()
                .enumerate()
                .map(|(pos, &i)| (i, if pos == 0 { 1.0 } else { 0.0 }))
                .collect();
        }

        let top_scores: Vec<f64> = candidates.iter().map(|&i| scores[i]).collect();
        candidates
            .into_iter()
            .zip(softmax(&top_scores, self.temperature))
            .collect()
    }

    pub fn select<R: Rng + ?Sized>(&self, state: &InstanceState, rng: &mut R) -> usize {
        if let Some(index) = cold_start_arm(state) {
            debug!(arm = index, "pUCB cold-start selection");
            return index;
        }

        let weighted = self.candidate_weights(state);
        let best = weighted[0].0;

        let index = match WeightedIndex::new(weighted.iter().map(|(_, w)| *w)) {
            Ok(dist) => weighted[dist.sample(rng)].0,
            // Degenerate weights (all zero or NaN) fall back to the best arm.
            Err(_) => best,
        };

        debug!(
            arm = index,
            best = best,
            candidates = weighted.len(),
            temperature = self.temperature,
            "pUCB selection completed"
        );

        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PolicyParams;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state(counts: Vec<u64>, rewards: Vec<f64>, bias: Option<Vec<f64>>) -> InstanceState {
        let arms = (0..counts.len()).map(|i| format!("cat-{i}")).collect();
        InstanceState::from_parts(arms, counts, rewards, bias, PolicyParams::default(), 0).unwrap()
    }

    #[test]
    fn test_cold_start_is_deterministic() {
        let pucb = PUcb::new(1.0, 0.5, 1.0, 3);
        let s = state(vec![2, 0, 1], vec![1.0, 0.0, 0.0], None);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(pucb.select(&s, &mut rng), 1);
        }
    }

    #[test]
    fn test_zero_temperature_is_argmax() {
        let pucb = PUcb::new(0.5, 0.0, 0.0, 3);
        let s = state(vec![10, 10, 10], vec![1.0, 8.0, 3.0], None);
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..10 {
            assert_eq!(pucb.select(&s, &mut rng), 1);
        }
    }

    #[test]
    fn test_samples_only_top_candidates() {
        let pucb = PUcb::new(0.5, 0.0, 10.0, 2);
        let s = state(vec![10, 10, 10], vec![9.0, 8.0, 0.0], None);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [0usize; 3];
        for _ in 0..500 {
            seen[pucb.select(&s, &mut rng)] += 1;
        }
        assert_eq!(seen[2], 0);
        // A warm softmax spreads mass over both candidates.
        assert!(seen[0] > 0 && seen[1] > 0);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let pucb = PUcb::new(1.0, 0.5, 0.5, 3);
        let s = state(vec![4, 6, 5], vec![2.0, 3.0, 2.0], None);
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let first: Vec<usize> = (0..50).map(|_| pucb.select(&s, &mut a)).collect();
        let second: Vec<usize> = (0..50).map(|_| pucb.select(&s, &mut b)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bias_weight_controls_prior_influence() {
        let s = state(vec![5, 5], vec![1.0, 1.0], Some(vec![0.0, 1.0]));
        let ignore_prior = PUcb::new(1.0, 0.0, 0.0, 2);
        let trust_prior = PUcb::new(1.0, 1.0, 0.0, 2);
        let plain = ignore_prior.scores(&s);
        let weighted = trust_prior.scores(&s);
        assert!((plain[0] - plain[1]).abs() < 1e-12);
        assert!((weighted[1] - weighted[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_candidate_weights_sum_to_one() {
        let pucb = PUcb::new(1.0, 0.5, 0.3, 3);
        let s = state(vec![3, 2, 4, 1], vec![1.0, 1.0, 3.0, 0.0], None);
        let weights = pucb.candidate_weights(&s);
        assert_eq!(weights.len(), 3);
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
