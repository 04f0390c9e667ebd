// ============================================
// Arm Generator (offline seeding)
// ============================================
//
// Turns ranked interaction tuples into bandit instances:
// 1. Aggregate (community, category, item) scores
// 2. Drop item pools smaller than the minimum pool size
// 3. Item arms: descending score, ties by id
// 4. Category arms: descending summed score of surviving pools, ties by id
// 5. Write every instance to the store, replacing the previous generation
//
// Runs once per retraining cycle; not expected to race with serving traffic.

use crate::error::{BanditError, Result, StoreError};
use crate::models::{InstanceKey, InstanceState, PolicyParams, RankedInteraction};
use crate::services::manager::DEFAULT_MIN_ARM_POOL;
use crate::services::store::ArmStore;
use crate::utils::normalize_score;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Item pools below this size are not seeded
    pub min_arm_pool: usize,
    pub category_policy: PolicyParams,
    pub item_policy: PolicyParams,
    /// Carry counts and rewards of surviving arms over from the replaced instance
    pub warm_start: bool,
    /// Seed per-arm bias from the pool's normalized rank scores
    pub bias_from_rank: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_arm_pool: DEFAULT_MIN_ARM_POOL,
            category_policy: PolicyParams::default(),
            item_policy: PolicyParams::default(),
            warm_start: false,
            bias_from_rank: false,
        }
    }
}

/// Arm list for one instance, in serving order, with the score each arm
/// was ranked by.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInstance {
    pub key: InstanceKey,
    pub arms: Vec<String>,
    pub scores: Vec<f64>,
    pub policy: PolicyParams,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedPlan {
    pub instances: Vec<PlannedInstance>,
    pub skipped_pools: Vec<InstanceKey>,
}

#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    pub instances_written: usize,
    pub warm_started: usize,
    pub skipped_pools: Vec<InstanceKey>,
}

pub struct ArmGenerator {
    store: Arc<dyn ArmStore>,
    config: GeneratorConfig,
}

type CategoryPools = BTreeMap<String, HashMap<String, f64>>;

impl ArmGenerator {
    pub fn new(store: Arc<dyn ArmStore>, config: GeneratorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Pure planning step: group, filter and order arms without touching
    /// the store.
    pub fn plan(&self, interactions: &[RankedInteraction]) -> SeedPlan {
        let mut communities: BTreeMap<String, CategoryPools> = BTreeMap::new();
        for row in interactions {
            if !row.rank_score.is_finite() {
                warn!(
                    community = %row.community,
                    category = %row.category,
                    item = %row.item_id,
                    "Skipping interaction with non-finite rank score"
                );
                continue;
            }
            *communities
                .entry(row.community.clone())
                .or_default()
                .entry(row.category.clone())
                .or_default()
                .entry(row.item_id.clone())
                .or_insert(0.0) += row.rank_score;
        }

        let mut plan = SeedPlan::default();
        for (community, categories) in communities {
            let mut category_scores: Vec<(String, f64)> = Vec::new();

            for (category, items) in categories {
                let key = InstanceKey::item(community.as_str(), category.as_str());
                if items.len() < self.config.min_arm_pool {
                    debug!(
                        key = %key,
                        pool = items.len(),
                        minimum = self.config.min_arm_pool,
                        "Item pool below minimum size"
                    );
                    plan.skipped_pools.push(key);
                    continue;
                }

                let ranked = order_by_score(items.into_iter().collect());
                category_scores.push((category, ranked.iter().map(|(_, s)| s).sum()));
                plan.instances.push(planned(key, ranked, self.config.item_policy));
            }

            if category_scores.is_empty() {
                warn!(community = %community, "No category passed the pool threshold");
                plan.skipped_pools.push(InstanceKey::community(community));
                continue;
            }

            plan.instances.push(planned(
                InstanceKey::community(community),
                order_by_score(category_scores),
                self.config.category_policy,
            ));
        }

        plan
    }

    /// Plan and write every instance, replacing previous generations.
    pub async fn seed(&self, interactions: &[RankedInteraction]) -> Result<SeedReport> {
        let plan = self.plan(interactions);
        let mut report = SeedReport {
            skipped_pools: plan.skipped_pools,
            ..SeedReport::default()
        };

        for instance in plan.instances {
            let previous = match self.store.get(&instance.key).await {
                Ok(state) => Some(state),
                Err(StoreError::NotFound(_)) => None,
                // A corrupt previous generation is simply replaced.
                Err(StoreError::Corrupted(msg)) => {
                    warn!(key = %instance.key, error = %msg, "Replacing corrupted instance");
                    None
                }
                Err(e) => return Err(e.into()),
            };

            let warm = self.config.warm_start && previous.is_some();
            let state = self.build_state(&instance, previous.as_ref())?;
            self.store.put(&instance.key, &state).await?;

            debug!(
                key = %instance.key,
                arms = state.len(),
                version = state.version(),
                warm_start = warm,
                "Seeded bandit instance"
            );

            report.instances_written += 1;
            if warm {
                report.warm_started += 1;
            }
        }

        info!(
            instances = report.instances_written,
            warm_started = report.warm_started,
            skipped = report.skipped_pools.len(),
            "Arm generation completed"
        );

        Ok(report)
    }

    fn build_state(
        &self,
        planned: &PlannedInstance,
        previous: Option<&InstanceState>,
    ) -> Result<InstanceState> {
        let n = planned.arms.len();
        let mut counts = vec![0u64; n];
        let mut rewards = vec![0.0f64; n];

        if let (true, Some(prev)) = (self.config.warm_start, previous) {
            for (i, arm) in planned.arms.iter().enumerate() {
                if let Some(j) = prev.arm_index(arm) {
                    counts[i] = prev.counts()[j];
                    rewards[i] = prev.rewards()[j];
                }
            }
        }

        let bias = self
            .config
            .bias_from_rank
            .then(|| bias_from_scores(&planned.scores));

        // A newer version than the replaced instance makes any in-flight
        // compare-and-swap against the old arm list fail.
        let version = previous.map(|p| p.version() + 1).unwrap_or(0);

        InstanceState::from_parts(
            planned.arms.clone(),
            counts,
            rewards,
            bias,
            planned.policy,
            version,
        )
        .map_err(|e| match e {
            BanditError::InvalidInstance(msg) => {
                BanditError::InvalidInstance(format!("{}: {}", planned.key, msg))
            }
            other => other,
        })
    }
}

fn planned(key: InstanceKey, ranked: Vec<(String, f64)>, policy: PolicyParams) -> PlannedInstance {
    let (arms, scores) = ranked.into_iter().unzip();
    PlannedInstance {
        key,
        arms,
        scores,
        policy,
    }
}

/// Descending score, ties by ascending identifier.
fn order_by_score(mut entries: Vec<(String, f64)>) -> Vec<(String, f64)> {
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    entries
}

fn bias_from_scores(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|&s| normalize_score(s, min, max))
        .collect()
}
