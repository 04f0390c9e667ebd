// ============================================
// Redis Arm Store
// ============================================
//
// Redis keys:
// - {prefix}:{storage_key} - String holding the serialized instance record
//
// Compare-and-swap runs as a Lua script so the version check and the write
// happen in one atomic step on the server.

use super::{conflict, decode, encode, ArmStore, StoreResult};
use crate::error::StoreError;
use crate::models::{InstanceKey, InstanceState};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis_utils::RedisPool;
use tracing::debug;

const CAS_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return {-1, 0}
    end
    local version = tonumber(cjson.decode(current)['version']) or 0
    if version ~= tonumber(ARGV[1]) then
        return {0, version}
    end
    redis.call('SET', KEYS[1], ARGV[2])
    return {1, version + 1}
"#;

pub struct RedisArmStore {
    pool: RedisPool,
    key_prefix: String,
    cas_script: redis::Script,
}

impl RedisArmStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            key_prefix: "bandit".to_string(),
            cas_script: redis::Script::new(CAS_SCRIPT),
        }
    }

    /// Create with custom key prefix
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    fn redis_key(&self, key: &InstanceKey) -> String {
        format!("{}:{}", self.key_prefix, key.storage_key())
    }
}

#[async_trait]
impl ArmStore for RedisArmStore {
    async fn get(&self, key: &InstanceKey) -> StoreResult<InstanceState> {
        let mut conn = self.pool.connection().await;
        let raw: Option<String> = self.pool.run(conn.get(self.redis_key(key))).await?;

        match raw {
            Some(raw) => decode(&raw),
            None => Err(StoreError::NotFound(key.storage_key())),
        }
    }

    async fn put(&self, key: &InstanceKey, state: &InstanceState) -> StoreResult<()> {
        let payload = encode(state)?;
        let mut conn = self.pool.connection().await;
        let _: () = self
            .pool
            .run(conn.set(self.redis_key(key), payload))
            .await?;

        debug!(key = %key, version = state.version(), "Stored bandit instance");
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &InstanceKey,
        expected_version: u64,
        new_state: &InstanceState,
    ) -> StoreResult<InstanceState> {
        let next = new_state.clone().with_version(expected_version + 1);
        let payload = encode(&next)?;

        let mut conn = self.pool.connection().await;
        let reply: Vec<i64> = self
            .pool
            .run(
                self.cas_script
                    .key(self.redis_key(key))
                    .arg(expected_version)
                    .arg(payload)
                    .invoke_async(&mut conn),
            )
            .await?;

        match reply.as_slice() {
            [1, _] => Ok(next),
            [0, actual] => {
                debug!(key = %key, expected_version, actual, "CAS rejected");
                Err(conflict(key, expected_version, (*actual).max(0) as u64))
            }
            [-1, _] => Err(StoreError::NotFound(key.storage_key())),
            other => Err(StoreError::Unavailable(format!(
                "unexpected CAS reply: {other:?}"
            ))),
        }
    }
}
