//! Database engines
//!
//! A [`DatabaseEngine`] provisions, connects and keeps one named database in
//! sync. It comes in two flavours, picked from the database's permissions:
//!
//! * [`EncryptedDatabase`] for owner-only databases: a local replica holding
//!   ciphertext, a snapshot pull from the remote, then continuous two-way sync.
//! * [`PublicDatabase`] for anything readable by others: remote-only, no
//!   encryption.
//!
//! Both hand out a [`Db`] from [`DatabaseEngine::get_db`]. Initialization runs
//! once; concurrent callers share its result, failures included.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{info, warn};

pub mod encrypted;
pub mod errors;
mod events;
pub mod handle;
pub mod public;

pub use encrypted::EncryptedDatabase;
pub use errors::DatabaseError;
pub use handle::Db;
pub use public::PublicDatabase;

use crate::Result;
use crate::account::Did;
use crate::config::EngineSettings;
use crate::constants::{DATABASE_HASH_PREFIX, context_auth_message};
use crate::context::{DatabaseUri, ServiceEndpoint};
use crate::keyring::Keyring;
use crate::permissions::{CredentialScope, PermissionsConfig, PermissionsOverride};
use crate::replica::{Replica, ReplicaError};
use crate::server::{Credentials, ProvisionOptions, ServerError, StorageServer};
use crate::sync::{Replicator, SyncEvent};

/// Lifecycle of an engine.
///
/// Encrypted engines move through `OpeningLocal`, `CheckingRemote`,
/// (`Provisioning`), `Connected`, `SnapshotSync` and `LiveSync`. Public
/// engines stop at `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    Uninitialized,
    OpeningLocal,
    CheckingRemote,
    Provisioning,
    Connected,
    SnapshotSync,
    LiveSync,
    /// Replication ended after a denial or a non-retried error. The local
    /// replica stays usable.
    SyncStopped,
    Failed,
    Closed,
}

/// Hashed remote name of a database: `"v" + hex(sha256("{name}/{did}/{context}"))`.
pub fn database_hash(db_name: &str, did: &Did, context_name: &str) -> String {
    let digest = Sha256::digest(format!("{db_name}/{did}/{context_name}").as_bytes());
    format!("{DATABASE_HASH_PREFIX}{}", hex::encode(digest))
}

/// Everything an engine needs to know about its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub db_name: String,
    /// DID the database is stored under
    pub did: Did,
    pub context_name: String,
    pub permissions: PermissionsConfig,
    pub read_only: bool,
    pub is_owner: bool,
    /// Name of the database on the server and of the local replica
    pub db_hash: String,
    pub endpoint: ServiceEndpoint,
    pub uri: DatabaseUri,
}

/// Per-call options for opening a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Merged over the context's default permissions
    pub permissions: Option<PermissionsOverride>,
    /// Owner of the database; defaults to the context's account
    pub did: Option<Did>,
    pub read_only: Option<bool>,
}

impl DatabaseOptions {
    pub fn with_permissions(mut self, permissions: impl Into<PermissionsOverride>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }

    pub fn with_did(mut self, did: impl Into<Did>) -> Self {
        self.did = Some(did.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }
}

/// Collaborators handed to every engine of a context.
#[derive(Clone)]
pub(crate) struct EngineDeps {
    pub(crate) server: Arc<dyn StorageServer>,
    pub(crate) replicator: Arc<dyn Replicator>,
    pub(crate) keyring: Arc<Keyring>,
    pub(crate) settings: EngineSettings,
}

/// State shared between an engine, its handles and its sync task.
pub(crate) struct EngineShared {
    config: RwLock<DatabaseConfig>,
    status: watch::Sender<EngineStatus>,
    events: broadcast::Sender<SyncEvent>,
    closed: Arc<AtomicBool>,
    pub(crate) deps: EngineDeps,
}

impl EngineShared {
    fn new(config: DatabaseConfig, deps: EngineDeps) -> Self {
        let (status, _) = watch::channel(EngineStatus::Uninitialized);
        let (events, _) = broadcast::channel(deps.settings.event_buffer());
        Self {
            config: RwLock::new(config),
            status,
            events,
            closed: Arc::new(AtomicBool::new(false)),
            deps,
        }
    }

    pub(crate) fn config(&self) -> DatabaseConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: EngineStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(db = %self.config().db_name, from = ?previous, to = ?status, "Engine status changed");
        }
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Connect to the remote database with the given credential scope.
    pub(crate) async fn connect_remote(
        &self,
        config: &DatabaseConfig,
        scope: CredentialScope,
    ) -> std::result::Result<Arc<dyn Replica>, DatabaseError> {
        let credentials = self.credentials(config, scope).await?;
        self.deps
            .server
            .connect(&credentials, &config.db_hash)
            .await
            .map_err(|e| connection_error(&e))
    }

    async fn credentials(
        &self,
        config: &DatabaseConfig,
        scope: CredentialScope,
    ) -> std::result::Result<Credentials, DatabaseError> {
        let server = &self.deps.server;
        let result = match scope {
            CredentialScope::Owner => {
                let message = context_auth_message(&config.context_name, config.did.as_str());
                let signature = self.deps.keyring.sign(message.as_str());
                server
                    .owner_credentials(&config.did, &config.context_name, &signature)
                    .await
            }
            CredentialScope::Public => server.public_credentials().await,
        };
        result.map_err(|e| match e {
            ServerError::Denied { reason } => DatabaseError::PermissionDenied { reason },
            other => connection_error(&other),
        })
    }

    /// Probe the remote database. Returns `true` when it does not exist yet.
    pub(crate) async fn remote_missing(
        &self,
        remote: &dyn Replica,
    ) -> std::result::Result<bool, DatabaseError> {
        match remote.info().await {
            Ok(_) => Ok(false),
            Err(ReplicaError::NotFound { .. }) => Ok(true),
            Err(ReplicaError::Denied { reason }) => Err(DatabaseError::PermissionDenied { reason }),
            Err(e) => Err(connection_error(&e)),
        }
    }

    /// Create the remote database with the configured permissions.
    pub(crate) async fn provision(
        &self,
        config: &DatabaseConfig,
    ) -> std::result::Result<(), DatabaseError> {
        self.set_status(EngineStatus::Provisioning);
        let options = ProvisionOptions {
            permissions: config.permissions.clone(),
        };
        self.deps
            .server
            .create_database(&config.did, &config.db_hash, &options)
            .await
            .map_err(|e| {
                warn!(db = %config.db_name, error = %e, "Provisioning failed");
                DatabaseError::Provisioning {
                    reason: DatabaseError::PROVISIONING_REASON.to_string(),
                }
            })?;
        info!(db = %config.db_name, hash = %config.db_hash, "Database provisioned");
        Ok(())
    }

    /// Push new user lists to the server, then commit them locally.
    async fn update_users(&self, read_list: Vec<Did>, write_list: Vec<Did>) -> Result<()> {
        let config = self.config();
        if !config.is_owner {
            return Err(DatabaseError::NotOwner {
                name: config.db_name,
            }
            .into());
        }

        let permissions = config
            .permissions
            .clone()
            .with_users(read_list, write_list);
        permissions.validate();

        let options = ProvisionOptions {
            permissions: permissions.clone(),
        };
        self.deps
            .server
            .update_database(&config.did, &config.db_hash, &options)
            .await
            .map_err(|e| match e {
                ServerError::NotFound { .. } => DatabaseError::NotFound {
                    name: config.db_name.clone(),
                },
                ServerError::Denied { reason } => DatabaseError::PermissionDenied { reason },
                other => connection_error(&other),
            })?;

        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .permissions = permissions;
        info!(db = %config.db_name, "Database users updated");
        Ok(())
    }
}

fn connection_error(err: &dyn std::fmt::Display) -> DatabaseError {
    DatabaseError::Connection {
        reason: err.to_string(),
    }
}

enum InitState {
    Uninitialized,
    Ready(Db),
    Failed(DatabaseError),
    Closed,
}

/// Runs an engine's initialization at most once.
pub(crate) struct InitCell {
    state: Mutex<InitState>,
}

impl InitCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Uninitialized),
        }
    }

    /// Return the initialized handle, running `init` if nobody has yet.
    ///
    /// Callers arriving while `init` runs wait for it and get the same
    /// outcome.
    pub(crate) async fn get_or_init<F, Fut>(
        &self,
        shared: &EngineShared,
        init: F,
    ) -> std::result::Result<Db, DatabaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Db, DatabaseError>>,
    {
        let mut state = self.state.lock().await;
        match &*state {
            InitState::Ready(db) => return Ok(db.clone()),
            InitState::Failed(err) => return Err(err.clone()),
            InitState::Closed => {
                return Err(DatabaseError::Closed {
                    name: shared.config().db_name,
                });
            }
            InitState::Uninitialized => {}
        }

        match init().await {
            Ok(db) => {
                *state = InitState::Ready(db.clone());
                Ok(db)
            }
            Err(err) => {
                warn!(db = %shared.config().db_name, error = %err, "Database initialization failed");
                shared.set_status(EngineStatus::Failed);
                *state = InitState::Failed(err.clone());
                Err(err)
            }
        }
    }

    async fn close(&self) {
        *self.state.lock().await = InitState::Closed;
    }
}

/// An engine for one database.
pub enum DatabaseEngine {
    Encrypted(EncryptedDatabase),
    Public(PublicDatabase),
}

impl DatabaseEngine {
    /// Engine matching the database's permissions: encrypted when read and
    /// write are both owner-only.
    pub(crate) fn new(config: DatabaseConfig, deps: EngineDeps) -> Self {
        config.permissions.validate();
        let encrypted = config.permissions.is_encrypted();
        let shared = Arc::new(EngineShared::new(config, deps));
        if encrypted {
            DatabaseEngine::Encrypted(EncryptedDatabase::new(shared))
        } else {
            DatabaseEngine::Public(PublicDatabase::new(shared))
        }
    }

    fn shared(&self) -> &EngineShared {
        match self {
            DatabaseEngine::Encrypted(db) => &db.shared,
            DatabaseEngine::Public(db) => &db.shared,
        }
    }

    fn init_cell(&self) -> &InitCell {
        match self {
            DatabaseEngine::Encrypted(db) => &db.init,
            DatabaseEngine::Public(db) => &db.init,
        }
    }

    /// Initialize on first call and return the database handle.
    pub async fn get_db(&self) -> Result<Db> {
        match self {
            DatabaseEngine::Encrypted(db) => db.get_db().await,
            DatabaseEngine::Public(db) => db.get_db().await,
        }
    }

    /// Stop any sync and refuse further use of the engine and its handles.
    pub async fn close(&self) {
        let shared = self.shared();
        shared.mark_closed();
        self.init_cell().close().await;
        if let DatabaseEngine::Encrypted(db) = self {
            db.stop_sync().await;
        }
        shared.set_status(EngineStatus::Closed);
    }

    /// Replace the read and write user lists, on the server and locally.
    ///
    /// Only the owner may do this. Running sync is not restarted.
    pub async fn update_users(&self, read_list: Vec<Did>, write_list: Vec<Did>) -> Result<()> {
        self.shared().update_users(read_list, write_list).await
    }

    pub fn config(&self) -> DatabaseConfig {
        self.shared().config()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared().status()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.shared().status.subscribe()
    }

    /// Sync events published by the engine's background task.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared().events.subscribe()
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, DatabaseEngine::Encrypted(_))
    }

    pub fn name(&self) -> String {
        self.shared().config().db_name
    }

    pub fn uri(&self) -> DatabaseUri {
        self.shared().config().uri
    }

    /// Wait until the engine reaches `status`, or a status from which it
    /// cannot reach it.
    pub async fn wait_for_status(&self, status: EngineStatus) -> EngineStatus {
        let mut rx = self.watch_status();
        let reached = rx
            .wait_for(|current| {
                *current == status
                    || matches!(
                        current,
                        EngineStatus::Failed | EngineStatus::Closed | EngineStatus::SyncStopped
                    )
            })
            .await
            .map(|current| *current);
        reached.unwrap_or_else(|_| self.status())
    }
}

impl std::fmt::Debug for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config();
        f.debug_struct("DatabaseEngine")
            .field("name", &config.db_name)
            .field("encrypted", &self.is_encrypted())
            .field("status", &self.status())
            .finish()
    }
}
