//! Revisioned document replicas
//!
//! A replica stores JSON documents under string ids. Every write produces a
//! new [`Revision`] and a new entry in the replica's changes feed, which is
//! what replication reads from. Concurrent writes to the same document on two
//! replicas converge on the same winner: the higher generation, then the
//! higher hash.
//!
//! Documents whose id starts with [`RESERVED_ID_PREFIX`] are internal and are
//! not replicated. Local-only metadata (such as the key check) lives outside
//! the changes feed entirely, see [`Replica::get_local`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod cipher;
pub mod errors;
pub mod local;
pub mod memory;

pub use cipher::DocCipher;
pub use errors::ReplicaError;
pub use local::LocalReplica;
pub use memory::MemoryReplica;

use crate::constants::RESERVED_ID_PREFIX;

/// Hex characters kept from the revision digest
const REVISION_HASH_LENGTH: usize = 32;

/// Revision of a document, rendered `"{generation}-{hash}"`.
///
/// Ordering is by generation, then by hash; the greater revision wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub generation: u64,
    pub hash: String,
}

impl Revision {
    /// Revision following `previous` for the given content.
    pub fn next(previous: Option<&Revision>, body: &Value, deleted: bool) -> Self {
        let mut hasher = Sha256::new();
        if let Some(previous) = previous {
            hasher.update(previous.to_string().as_bytes());
        }
        hasher.update([u8::from(deleted)]);
        hasher.update(body.to_string().as_bytes());
        let mut hash = hex::encode(hasher.finalize());
        hash.truncate(REVISION_HASH_LENGTH);

        Self {
            generation: previous.map_or(1, |p| p.generation + 1),
            hash,
        }
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for Revision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid revision '{s}'"))?;
        let generation = generation
            .parse()
            .map_err(|_| format!("invalid revision generation in '{s}'"))?;
        if hash.is_empty() {
            return Err(format!("missing revision hash in '{s}'"));
        }
        Ok(Self {
            generation,
            hash: hash.to_string(),
        })
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A document as stored and replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub rev: Revision,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default)]
    pub body: Value,
}

impl Document {
    /// Whether this document is internal and must not be replicated.
    pub fn is_internal(&self) -> bool {
        self.id.starts_with(RESERVED_ID_PREFIX)
    }
}

/// Summary of a replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Live (non-deleted) documents
    pub doc_count: u64,
    /// Sequence number of the latest change
    pub update_seq: u64,
}

/// One page of the changes feed.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    /// Latest revision of each changed document, in sequence order
    pub docs: Vec<Document>,
    /// Sequence to resume from
    pub last_seq: u64,
    pub has_more: bool,
}

/// A document refused by the receiving replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub id: String,
    pub reason: String,
}

/// Outcome of [`Replica::bulk_apply`].
#[derive(Debug, Clone, Default)]
pub struct ApplyResult {
    /// Documents that became the winning revision
    pub written: usize,
    /// Documents rejected individually
    pub denied: Vec<Denial>,
}

/// A revisioned document store with a changes feed.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Name of the database this replica holds.
    fn name(&self) -> &str;

    /// Fails with [`ReplicaError::NotFound`] if the database does not exist.
    async fn info(&self) -> Result<ReplicaInfo, ReplicaError>;

    /// Latest revision of a live document.
    async fn get(&self, id: &str) -> Result<Option<Document>, ReplicaError>;

    /// Write a new revision of `id`.
    async fn put(&self, id: &str, body: Value) -> Result<Revision, ReplicaError>;

    /// Delete `id`, returning the tombstone revision if it existed.
    async fn delete(&self, id: &str) -> Result<Option<Revision>, ReplicaError>;

    /// Changes after sequence `since`, at most `limit` documents.
    async fn changes(&self, since: u64, limit: usize) -> Result<ChangeBatch, ReplicaError>;

    /// Merge replicated revisions. Losing and already-known revisions are
    /// ignored.
    async fn bulk_apply(&self, docs: Vec<Document>) -> Result<ApplyResult, ReplicaError>;

    /// All live documents, ordered by id.
    async fn all_docs(&self) -> Result<Vec<Document>, ReplicaError>;

    /// Read a local-only document, which is never part of the changes feed.
    async fn get_local(&self, id: &str) -> Result<Option<Value>, ReplicaError>;

    /// Write a local-only document.
    async fn put_local(&self, id: &str, body: Value) -> Result<(), ReplicaError>;
}
