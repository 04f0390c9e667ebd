use async_trait::async_trait;
use bandit_service::services::store::{FileArmStore, InMemoryArmStore, StoreResult};
use bandit_service::{
    ArmStore, BanditError, BanditManager, InstanceKey, InstanceState, ManagerConfig,
    PolicyParams,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn arms(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn fresh_state() -> InstanceState {
    InstanceState::new(
        arms(&["Climate change", "Biodiversity", "Energy"]),
        PolicyParams::Ucb1 { exploration: 2.0 },
    )
    .unwrap()
}

fn manager_config(max_cas_retries: u32) -> ManagerConfig {
    ManagerConfig {
        max_cas_retries,
        min_arm_pool: 1,
    }
}

/// Wraps a store and lets a rival writer bump the version right before
/// each of the first `rival_writes` compare-and-swap calls.
struct RivalWriterStore {
    inner: InMemoryArmStore,
    rival_writes: AtomicU32,
    cas_calls: AtomicU32,
}

impl RivalWriterStore {
    fn new(rival_writes: u32) -> Self {
        Self {
            inner: InMemoryArmStore::new(),
            rival_writes: AtomicU32::new(rival_writes),
            cas_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ArmStore for RivalWriterStore {
    async fn get(&self, key: &InstanceKey) -> StoreResult<InstanceState> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &InstanceKey, state: &InstanceState) -> StoreResult<()> {
        self.inner.put(key, state).await
    }

    async fn compare_and_swap(
        &self,
        key: &InstanceKey,
        expected_version: u64,
        new_state: &InstanceState,
    ) -> StoreResult<InstanceState> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        let rival = self
            .rival_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rival {
            let current = self.inner.get(key).await?;
            self.inner
                .compare_and_swap(key, current.version(), &current)
                .await?;
        }
        self.inner
            .compare_and_swap(key, expected_version, new_state)
            .await
    }
}

#[tokio::test]
async fn test_reward_lands_after_rival_writes() {
    let key = InstanceKey::community("beopen");
    let store = Arc::new(RivalWriterStore::new(3));
    store.put(&key, &fresh_state()).await.unwrap();

    let manager = BanditManager::new(store.clone(), manager_config(16));
    let stored = manager.record_reward(&key, "Energy", 1.0).await.unwrap();

    assert_eq!(stored.counts(), &[0, 0, 1]);
    assert_eq!(stored.rewards(), &[0.0, 0.0, 1.0]);
    // three rival bumps plus our own write
    assert_eq!(stored.version(), 4);
    assert_eq!(store.cas_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_contention_surfaces_after_retry_bound() {
    let key = InstanceKey::community("beopen");
    let store = Arc::new(RivalWriterStore::new(u32::MAX));
    store.put(&key, &fresh_state()).await.unwrap();

    let manager = BanditManager::new(store.clone(), manager_config(2));
    let err = manager
        .record_reward(&key, "Energy", 1.0)
        .await
        .unwrap_err();

    assert!(matches!(err, BanditError::Contention { attempts: 3, .. }));
    assert_eq!(store.cas_calls.load(Ordering::SeqCst), 3);

    // Rival writes went through; our reward never did
    let state = store.get(&key).await.unwrap();
    assert_eq!(state.counts(), &[0, 0, 0]);
    assert_eq!(state.version(), 3);
}

async fn hammer(manager: Arc<BanditManager>, key: InstanceKey, writers: usize) {
    let arm_ids = ["Climate change", "Biodiversity", "Energy"];
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let manager = manager.clone();
            let key = key.clone();
            let arm = arm_ids[i % arm_ids.len()];
            tokio::spawn(async move { manager.record_reward(&key, arm, 1.0).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rewards_lose_no_updates_in_memory() {
    let key = InstanceKey::community("beopen");
    let store = Arc::new(InMemoryArmStore::new());
    store.put(&key, &fresh_state()).await.unwrap();

    let writers = 64;
    let manager = Arc::new(BanditManager::new(store.clone(), manager_config(10_000)));
    hammer(manager, key.clone(), writers).await;

    let state = store.get(&key).await.unwrap();
    assert_eq!(state.total_pulls(), writers as u64);
    assert_eq!(state.counts().iter().sum::<u64>(), writers as u64);
    assert_eq!(state.rewards().iter().sum::<f64>(), writers as f64);
    assert_eq!(state.version(), writers as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rewards_lose_no_updates_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let key = InstanceKey::item("beopen", "Climate");
    let store = Arc::new(FileArmStore::new(dir.path()));
    store.put(&key, &fresh_state()).await.unwrap();

    let writers = 24;
    let manager = Arc::new(BanditManager::new(store.clone(), manager_config(10_000)));
    hammer(manager, key.clone(), writers).await;

    let state = store.get(&key).await.unwrap();
    assert_eq!(state.counts(), &[8, 8, 8]);
    assert_eq!(state.version(), writers as u64);
}
