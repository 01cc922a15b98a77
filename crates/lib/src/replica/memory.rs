//! In-memory replica
//!
//! Backs local replicas (optionally persisted by [`super::LocalReplica`]) and
//! the databases hosted by [`crate::server::InMemoryServer`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::trace;

use super::{ApplyResult, ChangeBatch, Document, Replica, ReplicaError, ReplicaInfo, Revision};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredDoc {
    pub(crate) doc: Document,
    /// Sequence of the change that produced this revision
    pub(crate) seq: u64,
}

/// Complete contents of a memory replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct MemoryState {
    #[serde(default)]
    pub(crate) seq: u64,
    #[serde(default)]
    pub(crate) docs: BTreeMap<String, StoredDoc>,
    #[serde(default)]
    pub(crate) local: BTreeMap<String, Value>,
}

impl MemoryState {
    fn write(&mut self, doc: Document) {
        self.seq += 1;
        let seq = self.seq;
        self.docs.insert(doc.id.clone(), StoredDoc { doc, seq });
    }
}

/// A replica held entirely in memory.
#[derive(Debug)]
pub struct MemoryReplica {
    name: String,
    state: RwLock<MemoryState>,
}

impl MemoryReplica {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_state(name, MemoryState::default())
    }

    pub(crate) fn from_state(name: impl Into<String>, state: MemoryState) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(state),
        }
    }

    pub(crate) async fn export(&self) -> MemoryState {
        self.state.read().await.clone()
    }

    /// Latest stored revision of `id`, tombstones included.
    pub async fn raw(&self, id: &str) -> Option<Document> {
        self.state
            .read()
            .await
            .docs
            .get(id)
            .map(|stored| stored.doc.clone())
    }
}

#[async_trait]
impl Replica for MemoryReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<ReplicaInfo, ReplicaError> {
        let state = self.state.read().await;
        let doc_count = state.docs.values().filter(|s| !s.doc.deleted).count() as u64;
        Ok(ReplicaInfo {
            doc_count,
            update_seq: state.seq,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, ReplicaError> {
        let state = self.state.read().await;
        Ok(state
            .docs
            .get(id)
            .filter(|stored| !stored.doc.deleted)
            .map(|stored| stored.doc.clone()))
    }

    async fn put(&self, id: &str, body: Value) -> Result<Revision, ReplicaError> {
        let mut state = self.state.write().await;
        let previous = state.docs.get(id).map(|stored| &stored.doc.rev);
        let rev = Revision::next(previous, &body, false);
        state.write(Document {
            id: id.to_string(),
            rev: rev.clone(),
            deleted: false,
            body,
        });
        trace!(replica = %self.name, id, %rev, "Document written");
        Ok(rev)
    }

    async fn delete(&self, id: &str) -> Result<Option<Revision>, ReplicaError> {
        let mut state = self.state.write().await;
        let previous = match state.docs.get(id) {
            Some(stored) if !stored.doc.deleted => stored.doc.rev.clone(),
            _ => return Ok(None),
        };
        let rev = Revision::next(Some(&previous), &Value::Null, true);
        state.write(Document {
            id: id.to_string(),
            rev: rev.clone(),
            deleted: true,
            body: Value::Null,
        });
        trace!(replica = %self.name, id, %rev, "Document deleted");
        Ok(Some(rev))
    }

    async fn changes(&self, since: u64, limit: usize) -> Result<ChangeBatch, ReplicaError> {
        let state = self.state.read().await;
        let mut pending: Vec<&StoredDoc> = state.docs.values().filter(|s| s.seq > since).collect();
        pending.sort_by_key(|stored| stored.seq);

        let has_more = pending.len() > limit;
        pending.truncate(limit);
        let last_seq = pending.last().map_or(since, |stored| stored.seq);

        Ok(ChangeBatch {
            docs: pending.into_iter().map(|stored| stored.doc.clone()).collect(),
            last_seq,
            has_more,
        })
    }

    async fn bulk_apply(&self, docs: Vec<Document>) -> Result<ApplyResult, ReplicaError> {
        let mut state = self.state.write().await;
        let mut result = ApplyResult::default();

        for doc in docs {
            let wins = state
                .docs
                .get(&doc.id)
                .is_none_or(|current| doc.rev > current.doc.rev);
            if wins {
                state.write(doc);
                result.written += 1;
            }
        }

        trace!(replica = %self.name, written = result.written, "Applied replicated documents");
        Ok(result)
    }

    async fn all_docs(&self) -> Result<Vec<Document>, ReplicaError> {
        let state = self.state.read().await;
        Ok(state
            .docs
            .values()
            .filter(|stored| !stored.doc.deleted)
            .map(|stored| stored.doc.clone())
            .collect())
    }

    async fn get_local(&self, id: &str) -> Result<Option<Value>, ReplicaError> {
        Ok(self.state.read().await.local.get(id).cloned())
    }

    async fn put_local(&self, id: &str, body: Value) -> Result<(), ReplicaError> {
        self.state.write().await.local.insert(id.to_string(), body);
        Ok(())
    }
}
