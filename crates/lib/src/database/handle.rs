//! Database handles returned by engines

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::DatabaseError;
use crate::Result;
use crate::constants::RESERVED_ID_PREFIX;
use crate::replica::{DocCipher, Replica, ReplicaInfo, Revision};

/// Read/write access to one database.
///
/// For encrypted databases reads and writes go to the local replica and
/// bodies are encrypted transparently; the engine's sync task moves them to
/// the server. For public databases operations go straight to the server.
///
/// Handles are cheap to clone and stop working once their engine is closed.
#[derive(Clone)]
pub struct Db {
    name: String,
    replica: Arc<dyn Replica>,
    cipher: Option<DocCipher>,
    read_only: bool,
    closed: Arc<AtomicBool>,
}

impl Db {
    pub(crate) fn new(
        name: impl Into<String>,
        replica: Arc<dyn Replica>,
        cipher: Option<DocCipher>,
        read_only: bool,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            replica,
            cipher,
            read_only,
            closed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn check_open(&self) -> std::result::Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_id(id: &str) -> std::result::Result<(), DatabaseError> {
        if id.is_empty() || id.starts_with(RESERVED_ID_PREFIX) {
            return Err(DatabaseError::InvalidDocumentId { id: id.to_string() });
        }
        Ok(())
    }

    fn check_writable(&self) -> std::result::Result<(), DatabaseError> {
        if self.read_only {
            return Err(DatabaseError::ReadOnly {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn open_body(&self, body: Value) -> Result<Value> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.decrypt_body(&body)?),
            None => Ok(body),
        }
    }

    /// Fetch and deserialize a document.
    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        self.check_open()?;
        Self::check_id(id)?;
        let Some(doc) = self.replica.get(id).await? else {
            return Ok(None);
        };
        let body = self.open_body(doc.body)?;
        Ok(Some(serde_json::from_value(body)?))
    }

    /// Write a document, returning its new revision.
    pub async fn put<T: Serialize + ?Sized>(&self, id: &str, value: &T) -> Result<Revision> {
        self.check_open()?;
        Self::check_id(id)?;
        self.check_writable()?;
        let body = serde_json::to_value(value)?;
        let body = match &self.cipher {
            Some(cipher) => cipher.encrypt_body(&body)?,
            None => body,
        };
        Ok(self.replica.put(id, body).await?)
    }

    /// Delete a document. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.check_open()?;
        Self::check_id(id)?;
        self.check_writable()?;
        Ok(self.replica.delete(id).await?.is_some())
    }

    /// All documents, ordered by id.
    pub async fn all<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>> {
        self.check_open()?;
        let docs = self.replica.all_docs().await?;
        docs.into_iter()
            .filter(|doc| !doc.is_internal())
            .map(|doc| -> Result<(String, T)> {
                let body = self.open_body(doc.body)?;
                Ok((doc.id, serde_json::from_value(body)?))
            })
            .collect()
    }

    pub async fn info(&self) -> Result<ReplicaInfo> {
        self.check_open()?;
        Ok(self.replica.info().await?)
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("name", &self.name)
            .field("encrypted", &self.is_encrypted())
            .field("read_only", &self.read_only)
            .finish()
    }
}
