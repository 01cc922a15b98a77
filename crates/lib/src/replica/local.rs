//! Local replica with optional JSON file persistence
//!
//! Without a path this is a plain [`MemoryReplica`]. With a path, the replica
//! is loaded from the file on open and every write is flushed back to it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::memory::MemoryState;
use super::{
    ApplyResult, ChangeBatch, Document, MemoryReplica, Replica, ReplicaError, ReplicaInfo,
    Revision,
};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_persistence_version<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

#[derive(Serialize, Deserialize)]
struct PersistedReplica {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    name: String,
    #[serde(flatten)]
    state: MemoryState,
}

/// The on-device replica of a database.
#[derive(Debug)]
pub struct LocalReplica {
    inner: MemoryReplica,
    path: Option<PathBuf>,
    /// Serializes file writes so snapshots land in order
    persist_lock: Mutex<()>,
}

impl LocalReplica {
    /// Replica kept only in memory.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            inner: MemoryReplica::new(name),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open the replica stored at `path`, creating an empty one if the file
    /// does not exist yet.
    pub async fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, ReplicaError> {
        let name = name.into();
        let path = path.into();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let persisted: PersistedReplica =
                    serde_json::from_str(&json).map_err(|e| ReplicaError::Storage {
                        reason: format!("failed to parse {}: {e}", path.display()),
                    })?;
                debug!(replica = %name, path = %path.display(), "Loaded local replica");
                persisted.state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                debug!(replica = %name, path = %path.display(), "Creating local replica");
                MemoryState::default()
            }
            Err(e) => return Err(e.into()),
        };

        let replica = Self {
            inner: MemoryReplica::from_state(name, state),
            path: Some(path),
            persist_lock: Mutex::new(()),
        };
        replica.persist().await?;
        Ok(replica)
    }

    /// Read a persisted replica file without opening it for writing.
    pub async fn load_documents(path: impl AsRef<Path>) -> Result<Vec<Document>, ReplicaError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let persisted: PersistedReplica =
            serde_json::from_str(&json).map_err(|e| ReplicaError::Storage {
                reason: format!("failed to parse {}: {e}", path.display()),
            })?;
        Ok(persisted
            .state
            .docs
            .into_values()
            .map(|stored| stored.doc)
            .filter(|doc| !doc.deleted)
            .collect())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self) -> Result<(), ReplicaError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let persisted = PersistedReplica {
            version: PERSISTENCE_VERSION,
            name: self.inner.name().to_string(),
            state: self.inner.export().await,
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(|e| ReplicaError::Storage {
            reason: e.to_string(),
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Replica for LocalReplica {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn info(&self) -> Result<ReplicaInfo, ReplicaError> {
        self.inner.info().await
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, ReplicaError> {
        self.inner.get(id).await
    }

    async fn put(&self, id: &str, body: Value) -> Result<Revision, ReplicaError> {
        let rev = self.inner.put(id, body).await?;
        self.persist().await?;
        Ok(rev)
    }

    async fn delete(&self, id: &str) -> Result<Option<Revision>, ReplicaError> {
        let rev = self.inner.delete(id).await?;
        if rev.is_some() {
            self.persist().await?;
        }
        Ok(rev)
    }

    async fn changes(&self, since: u64, limit: usize) -> Result<ChangeBatch, ReplicaError> {
        self.inner.changes(since, limit).await
    }

    async fn bulk_apply(&self, docs: Vec<Document>) -> Result<ApplyResult, ReplicaError> {
        let result = self.inner.bulk_apply(docs).await?;
        if result.written > 0 {
            self.persist().await?;
        }
        Ok(result)
    }

    async fn all_docs(&self) -> Result<Vec<Document>, ReplicaError> {
        self.inner.all_docs().await
    }

    async fn get_local(&self, id: &str) -> Result<Option<Value>, ReplicaError> {
        self.inner.get_local(id).await
    }

    async fn put_local(&self, id: &str, body: Value) -> Result<(), ReplicaError> {
        self.inner.put_local(id, body).await?;
        self.persist().await
    }
}
