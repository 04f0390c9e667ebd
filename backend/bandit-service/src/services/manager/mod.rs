// ============================================
// Bandit Instance Manager
// ============================================
//
// Mediates between the policies and the arm store.
//
// Data Flow:
// 1. select_arm: load the instance, ask its policy for an arm, return the id
//    (read-only: pulls are counted when feedback arrives, not on impression)
// 2. record_reward: get -> locate arm -> policy update -> compare_and_swap,
//    retried from a fresh read on version conflicts up to a fixed bound
// 3. recommend: category bandit first, then the item bandit behind the
//    chosen category
//
// No lock is held across store round trips; consistency per key comes from
// the store's compare-and-swap.

use crate::error::{BanditError, Result, StoreError};
use crate::models::{CategoryRecommendations, InstanceKey, InstanceState, Recommendation};
use crate::services::policy::{self, Policy};
use crate::services::store::ArmStore;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CAS_RETRIES: u32 = 16;
pub const DEFAULT_MIN_ARM_POOL: usize = 5;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Retries after the first compare-and-swap attempt
    pub max_cas_retries: u32,
    /// Smallest item pool served; shared with the arm generator
    pub min_arm_pool: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
            min_arm_pool: DEFAULT_MIN_ARM_POOL,
        }
    }
}

pub struct BanditManager {
    store: Arc<dyn ArmStore>,
    config: ManagerConfig,
    /// Randomness for pUCB sampling; seeded explicitly in tests
    rng: Mutex<StdRng>,
}

impl BanditManager {
    pub fn new(store: Arc<dyn ArmStore>, config: ManagerConfig) -> Self {
        Self {
            store,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the random source used by pUCB sampling.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn store(&self) -> &Arc<dyn ArmStore> {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Current stored state of an instance.
    pub async fn snapshot(&self, key: &InstanceKey) -> Result<InstanceState> {
        Ok(self.store.get(key).await?)
    }

    async fn load_for_serving(&self, key: &InstanceKey) -> Result<InstanceState> {
        let state = self.store.get(key).await?;
        if !key.is_category_level() && state.len() < self.config.min_arm_pool {
            return Err(BanditError::InsufficientArms {
                key: key.storage_key(),
                arms: state.len(),
                minimum: self.config.min_arm_pool,
            });
        }
        Ok(state)
    }

    pub async fn select_arm(&self, key: &InstanceKey) -> Result<String> {
        let state = self.load_for_serving(key).await?;
        let policy = Policy::for_state(&state);
        let index = {
            let mut rng = self.rng.lock();
            policy.select(&state, &mut *rng)
        };

        let arm = state.arms()[index].clone();
        debug!(key = %key, arm = %arm, version = state.version(), "Selected arm");
        Ok(arm)
    }

    /// Best `top_k` arm ids in deterministic order (`0` = all arms).
    pub async fn rank_arms(&self, key: &InstanceKey, top_k: usize) -> Result<Vec<String>> {
        let state = self.load_for_serving(key).await?;
        let ranked = Policy::for_state(&state)
            .rank(&state, top_k)
            .into_iter()
            .map(|i| state.arms()[i].clone())
            .collect();
        Ok(ranked)
    }

    pub async fn record_reward(
        &self,
        key: &InstanceKey,
        arm: &str,
        reward: f64,
    ) -> Result<InstanceState> {
        self.record_rewards(key, &[(arm, reward)]).await
    }

    /// Apply several rewards to one instance in a single compare-and-swap.
    /// Nothing is written if any arm is unknown or any reward non-finite.
    pub async fn record_rewards(
        &self,
        key: &InstanceKey,
        rewards: &[(&str, f64)],
    ) -> Result<InstanceState> {
        for (_, reward) in rewards {
            policy::validate_reward(*reward)?;
        }
        if rewards.is_empty() {
            return self.snapshot(key).await;
        }

        let max_attempts = self.config.max_cas_retries + 1;
        for attempt in 1..=max_attempts {
            let current = self.store.get(key).await?;
            let indexed = rewards
                .iter()
                .map(|(arm, reward)| {
                    current
                        .arm_index(arm)
                        .map(|i| (i, *reward))
                        .ok_or_else(|| BanditError::UnknownArm {
                            key: key.storage_key(),
                            arm: arm.to_string(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let next = policy::update_many(&current, &indexed)?;

            match self
                .store
                .compare_and_swap(key, current.version(), &next)
                .await
            {
                Ok(stored) => {
                    debug!(
                        key = %key,
                        rewards = rewards.len(),
                        version = stored.version(),
                        attempt,
                        "Recorded reward"
                    );
                    return Ok(stored);
                }
                Err(StoreError::VersionConflict { actual, .. }) => {
                    debug!(
                        key = %key,
                        attempt,
                        expected = current.version(),
                        actual,
                        "Version conflict, retrying from fresh read"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(key = %key, attempts = max_attempts, "Reward update gave up under contention");
        Err(BanditError::Contention {
            key: key.storage_key(),
            attempts: max_attempts,
        })
    }

    /// Pick a category for the community, then an item inside it.
    pub async fn recommend(&self, community: &str) -> Result<Recommendation> {
        let category = self.select_arm(&InstanceKey::community(community)).await?;
        let item = self
            .select_arm(&InstanceKey::item(community, category.as_str()))
            .await?;

        Ok(Recommendation {
            community: community.to_string(),
            category,
            item,
        })
    }

    /// Ranked categories, each with its ranked items.
    pub async fn recommend_many(
        &self,
        community: &str,
        top_k_categories: usize,
        top_k_items: usize,
    ) -> Result<Vec<CategoryRecommendations>> {
        let categories = self
            .rank_arms(&InstanceKey::community(community), top_k_categories)
            .await?;

        let mut recommendations = Vec::with_capacity(categories.len());
        for category in categories {
            let items = self
                .rank_arms(&InstanceKey::item(community, category.as_str()), top_k_items)
                .await?;
            recommendations.push(CategoryRecommendations { category, items });
        }

        info!(
            community = %community,
            categories = recommendations.len(),
            "Built ranked recommendations"
        );

        Ok(recommendations)
    }

    /// Credit one observed reward to both levels: the category within the
    /// community, then the item within the category. Each level is updated
    /// independently; if the item update fails the category update stays.
    pub async fn record_feedback(
        &self,
        community: &str,
        category: &str,
        item: &str,
        reward: f64,
    ) -> Result<()> {
        policy::validate_reward(reward)?;
        self.record_reward(&InstanceKey::community(community), category, reward)
            .await?;
        self.record_reward(&InstanceKey::item(community, category), item, reward)
            .await?;
        Ok(())
    }
}
