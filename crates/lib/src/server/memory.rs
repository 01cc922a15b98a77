//! In-process storage server
//!
//! Hosts databases in memory and enforces their permissions on every replica
//! request. Used by tests and the CLI, and as a reference for the behaviour
//! engines expect from a real server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{Credentials, ProvisionOptions, ServerError, ServerFactory, StorageServer};
use crate::account::Did;
use crate::constants::RESERVED_ID_PREFIX;
use crate::permissions::{CredentialScope, PermissionsConfig};
use crate::replica::{
    ApplyResult, ChangeBatch, Denial, Document, MemoryReplica, Replica, ReplicaError, ReplicaInfo,
    Revision,
};

struct HostedDatabase {
    owner: Did,
    permissions: RwLock<PermissionsConfig>,
    replica: MemoryReplica,
}

impl HostedDatabase {
    fn permissions(&self) -> PermissionsConfig {
        self.permissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Default)]
struct ServerState {
    endpoint: String,
    databases: Mutex<HashMap<String, Arc<HostedDatabase>>>,
    provision_count: AtomicUsize,
    update_count: AtomicUsize,
    reject_provisioning: AtomicBool,
    unavailable: AtomicBool,
}

impl ServerState {
    fn database(&self, db_hash: &str) -> Option<Arc<HostedDatabase>> {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(db_hash)
            .cloned()
    }

    fn check_available(&self) -> Result<(), ServerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServerError::Unavailable {
                reason: format!("{} is offline", self.endpoint),
            });
        }
        Ok(())
    }
}

/// A storage server living in this process.
///
/// Clones share the same hosted databases.
#[derive(Clone)]
pub struct InMemoryServer {
    state: Arc<ServerState>,
}

impl InMemoryServer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ServerState {
                endpoint: endpoint.into(),
                ..ServerState::default()
            }),
        }
    }

    /// Number of `create_database` calls received.
    pub fn provision_count(&self) -> usize {
        self.state.provision_count.load(Ordering::SeqCst)
    }

    /// Number of `update_database` calls received.
    pub fn update_count(&self) -> usize {
        self.state.update_count.load(Ordering::SeqCst)
    }

    /// Make every following `create_database` call fail.
    pub fn set_reject_provisioning(&self, reject: bool) {
        self.state.reject_provisioning.store(reject, Ordering::SeqCst);
    }

    /// Simulate the server going offline or coming back.
    pub fn set_available(&self, available: bool) {
        self.state.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn has_database(&self, db_hash: &str) -> bool {
        self.state.database(db_hash).is_some()
    }

    pub fn permissions(&self, db_hash: &str) -> Option<PermissionsConfig> {
        self.state.database(db_hash).map(|db| db.permissions())
    }

    /// Documents as stored on the server, bypassing access checks.
    pub async fn stored_documents(&self, db_hash: &str) -> Option<Vec<Document>> {
        let db = self.state.database(db_hash)?;
        db.replica.all_docs().await.ok()
    }

    fn token(&self, did: &Did, context_name: &str, signature: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.state.endpoint.as_bytes());
        hasher.update(did.as_str().as_bytes());
        hasher.update(context_name.as_bytes());
        hasher.update(signature.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for InMemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryServer")
            .field("endpoint", &self.state.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageServer for InMemoryServer {
    fn endpoint(&self) -> &str {
        &self.state.endpoint
    }

    async fn owner_credentials(
        &self,
        did: &Did,
        context_name: &str,
        signature: &str,
    ) -> Result<Credentials, ServerError> {
        self.state.check_available()?;
        if signature.is_empty() {
            return Err(ServerError::Denied {
                reason: "missing context signature".to_string(),
            });
        }
        Ok(Credentials {
            endpoint: self.state.endpoint.clone(),
            scope: CredentialScope::Owner,
            did: Some(did.clone()),
            token: self.token(did, context_name, signature),
        })
    }

    async fn public_credentials(&self) -> Result<Credentials, ServerError> {
        self.state.check_available()?;
        Ok(Credentials {
            endpoint: self.state.endpoint.clone(),
            scope: CredentialScope::Public,
            did: None,
            token: String::new(),
        })
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        db_hash: &str,
    ) -> Result<Arc<dyn Replica>, ServerError> {
        self.state.check_available()?;
        if credentials.endpoint != self.state.endpoint {
            return Err(ServerError::Denied {
                reason: format!("credentials were issued by {}", credentials.endpoint),
            });
        }
        Ok(Arc::new(RemoteDatabase {
            state: Arc::clone(&self.state),
            db_hash: db_hash.to_string(),
            did: match credentials.scope {
                CredentialScope::Owner => credentials.did.clone(),
                CredentialScope::Public => None,
            },
        }))
    }

    async fn create_database(
        &self,
        did: &Did,
        db_hash: &str,
        options: &ProvisionOptions,
    ) -> Result<(), ServerError> {
        self.state.provision_count.fetch_add(1, Ordering::SeqCst);
        self.state.check_available()?;
        if self.state.reject_provisioning.load(Ordering::SeqCst) {
            return Err(ServerError::Rejected {
                reason: format!("refusing to create {db_hash}"),
            });
        }

        let mut databases = self
            .state
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = databases.get(db_hash) {
            if &existing.owner != did {
                return Err(ServerError::Denied {
                    reason: format!("{db_hash} belongs to another identity"),
                });
            }
            return Ok(());
        }

        databases.insert(
            db_hash.to_string(),
            Arc::new(HostedDatabase {
                owner: did.clone(),
                permissions: RwLock::new(options.permissions.clone()),
                replica: MemoryReplica::new(db_hash),
            }),
        );
        info!(db = db_hash, owner = %did, "Database created");
        Ok(())
    }

    async fn update_database(
        &self,
        did: &Did,
        db_hash: &str,
        options: &ProvisionOptions,
    ) -> Result<(), ServerError> {
        self.state.update_count.fetch_add(1, Ordering::SeqCst);
        self.state.check_available()?;
        let db = self.state.database(db_hash).ok_or_else(|| ServerError::NotFound {
            name: db_hash.to_string(),
        })?;
        if &db.owner != did {
            return Err(ServerError::Denied {
                reason: format!("only the owner can update {db_hash}"),
            });
        }
        *db.permissions.write().unwrap_or_else(PoisonError::into_inner) =
            options.permissions.clone();
        debug!(db = db_hash, "Database permissions updated");
        Ok(())
    }
}

impl ServerFactory for InMemoryServer {
    fn open(&self, endpoint_uri: &str) -> Result<Arc<dyn StorageServer>, ServerError> {
        if endpoint_uri != self.state.endpoint {
            return Err(ServerError::Unavailable {
                reason: format!("no server at {endpoint_uri}"),
            });
        }
        Ok(Arc::new(self.clone()))
    }
}

/// Access mode checked before a replica request.
#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// A client connection to one hosted database.
struct RemoteDatabase {
    state: Arc<ServerState>,
    db_hash: String,
    did: Option<Did>,
}

impl RemoteDatabase {
    fn open(&self, access: Access) -> Result<Arc<HostedDatabase>, ReplicaError> {
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(ReplicaError::Unavailable {
                reason: format!("{} is offline", self.state.endpoint),
            });
        }
        let db = self
            .state
            .database(&self.db_hash)
            .ok_or_else(|| ReplicaError::NotFound {
                name: self.db_hash.clone(),
            })?;

        let permissions = db.permissions();
        let allowed = match access {
            Access::Read => permissions.can_read(self.did.as_ref(), &db.owner),
            Access::Write => permissions.can_write(self.did.as_ref(), &db.owner),
        };
        if !allowed {
            let action = match access {
                Access::Read => "read",
                Access::Write => "write",
            };
            return Err(ReplicaError::Denied {
                reason: format!("{action} access to {} not permitted", self.db_hash),
            });
        }
        Ok(db)
    }

    fn check_id(id: &str) -> Result<(), ReplicaError> {
        if id.starts_with(RESERVED_ID_PREFIX) {
            return Err(ReplicaError::Denied {
                reason: format!("document id {id} is reserved"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Replica for RemoteDatabase {
    fn name(&self) -> &str {
        &self.db_hash
    }

    async fn info(&self) -> Result<ReplicaInfo, ReplicaError> {
        self.open(Access::Read)?.replica.info().await
    }

    async fn get(&self, id: &str) -> Result<Option<Document>, ReplicaError> {
        self.open(Access::Read)?.replica.get(id).await
    }

    async fn put(&self, id: &str, body: Value) -> Result<Revision, ReplicaError> {
        let db = self.open(Access::Write)?;
        Self::check_id(id)?;
        db.replica.put(id, body).await
    }

    async fn delete(&self, id: &str) -> Result<Option<Revision>, ReplicaError> {
        let db = self.open(Access::Write)?;
        Self::check_id(id)?;
        db.replica.delete(id).await
    }

    async fn changes(&self, since: u64, limit: usize) -> Result<ChangeBatch, ReplicaError> {
        self.open(Access::Read)?.replica.changes(since, limit).await
    }

    async fn bulk_apply(&self, docs: Vec<Document>) -> Result<ApplyResult, ReplicaError> {
        let db = self.open(Access::Write)?;

        let (accepted, refused): (Vec<_>, Vec<_>) =
            docs.into_iter().partition(|doc| !doc.is_internal());
        let mut result = db.replica.bulk_apply(accepted).await?;
        result.denied.extend(refused.into_iter().map(|doc| Denial {
            reason: format!("document id {} is reserved", doc.id),
            id: doc.id,
        }));
        Ok(result)
    }

    async fn all_docs(&self) -> Result<Vec<Document>, ReplicaError> {
        self.open(Access::Read)?.replica.all_docs().await
    }

    async fn get_local(&self, id: &str) -> Result<Option<Value>, ReplicaError> {
        self.open(Access::Read)?.replica.get_local(id).await
    }

    async fn put_local(&self, id: &str, body: Value) -> Result<(), ReplicaError> {
        self.open(Access::Write)?.replica.put_local(id, body).await
    }
}
