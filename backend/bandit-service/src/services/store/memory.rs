use super::{conflict, decode, encode, ArmStore, StoreResult};
use crate::error::StoreError;
use crate::models::{InstanceKey, InstanceState};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Process-local store keeping the serialized record per key.
///
/// Compare-and-swap runs under the map shard's write lock, so it is atomic
/// with respect to every other operation on the same key.
#[derive(Debug, Default)]
pub struct InMemoryArmStore {
    records: DashMap<String, String>,
}

impl InMemoryArmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized record exactly as stored.
    pub fn raw(&self, key: &InstanceKey) -> Option<String> {
        self.records
            .get(&key.storage_key())
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ArmStore for InMemoryArmStore {
    async fn get(&self, key: &InstanceKey) -> StoreResult<InstanceState> {
        let storage_key = key.storage_key();
        match self.records.get(&storage_key) {
            Some(record) => decode(record.value()),
            None => Err(StoreError::NotFound(storage_key)),
        }
    }

    async fn put(&self, key: &InstanceKey, state: &InstanceState) -> StoreResult<()> {
        let payload = encode(state)?;
        self.records.insert(key.storage_key(), payload);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &InstanceKey,
        expected_version: u64,
        new_state: &InstanceState,
    ) -> StoreResult<InstanceState> {
        let storage_key = key.storage_key();
        let mut record = self
            .records
            .get_mut(&storage_key)
            .ok_or_else(|| StoreError::NotFound(storage_key.clone()))?;

        let current = decode(record.value())?;
        if current.version() != expected_version {
            debug!(key = %key, expected_version, actual = current.version(), "CAS rejected");
            return Err(conflict(key, expected_version, current.version()));
        }

        let next = new_state.clone().with_version(expected_version + 1);
        *record.value_mut() = encode(&next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PolicyParams;

    fn seed_state() -> InstanceState {
        InstanceState::new(vec!["A".into(), "B".into()], PolicyParams::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryArmStore::new();
        let err = store.get(&InstanceKey::community("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!store.exists(&InstanceKey::community("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_cas_bumps_version() {
        let store = InMemoryArmStore::new();
        let key = InstanceKey::community("eosc");
        store.put(&key, &seed_state()).await.unwrap();

        let stored = store.compare_and_swap(&key, 0, &seed_state()).await.unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(store.get(&key).await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_failed_cas_leaves_record_untouched() {
        let store = InMemoryArmStore::new();
        let key = InstanceKey::community("eosc");
        store.put(&key, &seed_state()).await.unwrap();
        let before = store.raw(&key).unwrap();

        let changed = crate::services::policy::update(&seed_state(), 0, 1.0).unwrap();
        let err = store.compare_and_swap(&key, 5, &changed).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 5,
                actual: 0,
                ..
            }
        ));
        assert_eq!(store.raw(&key).unwrap(), before);
    }

    #[tokio::test]
    async fn test_cas_on_missing_key_is_not_found() {
        let store = InMemoryArmStore::new();
        let err = store
            .compare_and_swap(&InstanceKey::community("x"), 0, &seed_state())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
