//! Durable storage for migration state
//!
//! State is keyed per legacy subscription so that two migrations never share
//! a record. Writes replace the whole record, but only while no other writer
//! has moved the stored phase past the one the writer started from.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use paygo_shared::LegacyKind;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::MigrationResult;
use crate::state::{MigrationState, Phase};

const KEY_PREFIX: &str = "paygo:migration:";

/// KEYS[1] record key, ARGV[1] new record, ARGV[2..] phases the stored
/// record may be in for the write to go ahead. Returns the stored record
/// when the write is refused.
const SAVE_UNLESS_AHEAD: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local stored = cjson.decode(current)['phase']
  local allowed = false
  for i = 2, #ARGV do
    if ARGV[i] == stored then
      allowed = true
    end
  end
  if not allowed then
    return current
  end
end
redis.call('SET', KEYS[1], ARGV[1])
return false
"#;

/// Storage key for one legacy subscription's migration record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive the key from the legacy kind and reference
    pub fn for_legacy(kind: LegacyKind, legacy_ref: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(legacy_ref.as_bytes());
        Self(format!("{}{}", KEY_PREFIX, hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Another writer got further; this is the record it left
    Superseded(MigrationState),
}

#[async_trait]
pub trait MigrationStore: Send + Sync {
    async fn load(&self, key: &StorageKey) -> MigrationResult<Option<MigrationState>>;

    /// Replace the record with `state` unless the stored phase is already
    /// past `seen`, the phase the caller last read
    async fn save(
        &self,
        key: &StorageKey,
        seen: Phase,
        state: &MigrationState,
    ) -> MigrationResult<SaveOutcome>;
}

/// Process-local store, used in tests and single-instance deployments
#[derive(Clone, Default)]
pub struct InMemoryMigrationStore {
    records: Arc<RwLock<HashMap<StorageKey, MigrationState>>>,
}

impl InMemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStore for InMemoryMigrationStore {
    async fn load(&self, key: &StorageKey) -> MigrationResult<Option<MigrationState>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(
        &self,
        key: &StorageKey,
        seen: Phase,
        state: &MigrationState,
    ) -> MigrationResult<SaveOutcome> {
        let mut records = self.records.write().await;
        if let Some(current) = records.get(key).filter(|c| c.phase > seen) {
            return Ok(SaveOutcome::Superseded(current.clone()));
        }
        records.insert(key.clone(), state.clone());
        Ok(SaveOutcome::Saved)
    }
}

/// Redis-backed store. Records carry no expiry: a finished record keeps
/// guarding against re-running completion effects.
#[derive(Clone)]
pub struct RedisMigrationStore {
    conn: ConnectionManager,
}

impl RedisMigrationStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MigrationStore for RedisMigrationStore {
    async fn load(&self, key: &StorageKey) -> MigrationResult<Option<MigrationState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.as_str()).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        key: &StorageKey,
        seen: Phase,
        state: &MigrationState,
    ) -> MigrationResult<SaveOutcome> {
        let json = serde_json::to_string(state)?;
        let script = Script::new(SAVE_UNLESS_AHEAD);
        let mut invocation = script.key(key.as_str());
        invocation.arg(json);
        for phase in Phase::ALL.into_iter().filter(|p| *p <= seen) {
            invocation.arg(phase.as_str());
        }

        let mut conn = self.conn.clone();
        let refused: Option<String> = invocation.invoke_async(&mut conn).await?;
        match refused {
            Some(current) => Ok(SaveOutcome::Superseded(serde_json::from_str(&current)?)),
            None => Ok(SaveOutcome::Saved),
        }
    }
}
