//! Storage contexts
//!
//! A [`StorageContext`] is one application's view of an account's storage.
//! Opening it unlocks a [`Keyring`] from the account's signature over a
//! consent message, resolves the context's published configuration and
//! connects to the storage server it names. Databases are then opened by
//! name through [`StorageContext::open_database`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub mod config;
pub mod errors;
pub mod uri;

pub use config::{
    ContextResolver, ContextServices, InMemoryResolver, ServiceEndpoint, StorageContextConfig,
};
pub use errors::ContextError;
pub use uri::DatabaseUri;

use crate::Result;
use crate::account::{Account, Did};
use crate::config::ContextSettings;
use crate::constants::context_unlock_message;
use crate::database::{
    DatabaseConfig, DatabaseEngine, DatabaseOptions, EngineDeps, EngineStatus, database_hash,
};
use crate::keyring::Keyring;
use crate::server::{ServerRegistry, StorageServer};
use crate::sync::{ChangesReplicator, Replicator};

/// External services a storage context relies on.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn ContextResolver>,
    pub servers: ServerRegistry,
    pub replicator: Arc<dyn Replicator>,
}

impl Collaborators {
    /// Collaborators replicating with a [`ChangesReplicator`] built from
    /// `settings`.
    pub fn new(
        resolver: Arc<dyn ContextResolver>,
        servers: ServerRegistry,
        settings: &ContextSettings,
    ) -> Self {
        Self {
            resolver,
            servers,
            replicator: Arc::new(ChangesReplicator::new(&settings.engine)),
        }
    }

    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = replicator;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

struct ContextInner {
    account: Arc<dyn Account>,
    context_name: String,
    config: StorageContextConfig,
    server: Arc<dyn StorageServer>,
    collaborators: Collaborators,
    settings: ContextSettings,
    /// `None` once logged out
    keyring: RwLock<Option<Arc<Keyring>>>,
    /// Live engines by database hash
    engines: Mutex<HashMap<String, Arc<DatabaseEngine>>>,
}

/// An unlocked storage context.
///
/// Cheap to clone; clones share the keyring and the opened engines.
#[derive(Clone)]
pub struct StorageContext {
    inner: Arc<ContextInner>,
}

impl StorageContext {
    /// Unlock `context_name` for `account`.
    ///
    /// With `force_create` a missing context is linked using the default
    /// endpoint from `settings`; otherwise it is an error.
    #[instrument(skip_all, fields(context = %context_name.as_ref(), did = %account.did()))]
    pub async fn open(
        account: Arc<dyn Account>,
        context_name: impl AsRef<str>,
        collaborators: Collaborators,
        settings: ContextSettings,
        force_create: bool,
    ) -> Result<Self> {
        let context_name = context_name.as_ref().to_string();
        let did = account.did().clone();

        let seed = account
            .sign(&context_unlock_message(&context_name, did.as_str()))
            .await?;
        let keyring = Arc::new(Keyring::new(seed));
        keyring.init();

        let config = match collaborators.resolver.resolve(&did, &context_name).await? {
            Some(config) => config,
            None if force_create => {
                let endpoint = settings.default_endpoint.clone().ok_or_else(|| {
                    ContextError::LinkFailed {
                        context_name: context_name.clone(),
                        reason: "no default endpoint configured".to_string(),
                    }
                })?;
                let config =
                    StorageContextConfig::new(&context_name, endpoint, keyring.public_keys());
                collaborators.resolver.link(&did, config.clone()).await?;
                info!(id = %config.id, "Linked new storage context");
                config
            }
            None => {
                return Err(ContextError::ContextNotFound {
                    did: did.to_string(),
                    context_name,
                }
                .into());
            }
        };

        let server = open_server(&collaborators.servers, &config.services.database)?;
        info!("Storage context unlocked");

        Ok(Self {
            inner: Arc::new(ContextInner {
                account,
                context_name,
                config,
                server,
                collaborators,
                settings,
                keyring: RwLock::new(Some(keyring)),
                engines: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn did(&self) -> &Did {
        self.inner.account.did()
    }

    pub fn context_name(&self) -> &str {
        &self.inner.context_name
    }

    pub fn config(&self) -> &StorageContextConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.inner.settings
    }

    /// The context keyring, unless logged out.
    pub fn keyring(&self) -> Result<Arc<Keyring>> {
        self.inner
            .keyring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| self.logged_out())
    }

    pub fn is_logged_out(&self) -> bool {
        self.inner
            .keyring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn logged_out(&self) -> crate::Error {
        ContextError::LoggedOut {
            context_name: self.inner.context_name.clone(),
        }
        .into()
    }

    /// Open the database `name` and initialize it.
    ///
    /// The database belongs to `options.did` when set, otherwise to this
    /// context's account. A database that is already open in this context
    /// returns its live engine, and the options of the later call are
    /// ignored. Failed engines are forgotten so the next call starts over.
    #[instrument(skip(self, options), fields(context = %self.inner.context_name))]
    pub async fn open_database(
        &self,
        name: &str,
        options: DatabaseOptions,
    ) -> Result<Arc<DatabaseEngine>> {
        let keyring = self.keyring()?;
        let inner = &self.inner;

        let mut permissions = inner.settings.default_permissions.clone();
        if let Some(overrides) = &options.permissions {
            permissions = permissions.with_overrides(overrides);
        }

        let did = options.did.unwrap_or_else(|| self.did().clone());
        let is_owner = &did == self.did();

        let (endpoint, server) = if is_owner {
            (inner.config.services.database.clone(), Arc::clone(&inner.server))
        } else {
            let config = inner
                .collaborators
                .resolver
                .resolve(&did, &inner.context_name)
                .await?
                .ok_or_else(|| ContextError::ContextNotFound {
                    did: did.to_string(),
                    context_name: inner.context_name.clone(),
                })?;
            let server = open_server(&inner.collaborators.servers, &config.services.database)?;
            (config.services.database, server)
        };

        let config = DatabaseConfig {
            db_name: name.to_string(),
            db_hash: database_hash(name, &did, &inner.context_name),
            uri: DatabaseUri::new(did.clone(), &inner.context_name, name)
                .with_scheme(&inner.settings.engine.uri_scheme),
            did,
            context_name: inner.context_name.clone(),
            permissions,
            read_only: options.read_only.unwrap_or(false),
            is_owner,
            endpoint,
        };
        debug!(db = %config.db_name, hash = %config.db_hash, is_owner, "Opening database");

        let deps = EngineDeps {
            server,
            replicator: Arc::clone(&inner.collaborators.replicator),
            keyring,
            settings: inner.settings.engine.clone(),
        };
        let engine = {
            let mut engines = inner.engines.lock().await;
            let live = engines
                .get(&config.db_hash)
                .filter(|engine| is_live(engine))
                .cloned();
            match live {
                Some(live) => {
                    let open = live.config();
                    if open.read_only != config.read_only || open.permissions != config.permissions {
                        warn!(db = %config.db_name, "Database already open, keeping its options");
                    }
                    live
                }
                None => {
                    let engine = Arc::new(DatabaseEngine::new(config, deps));
                    engines.insert(engine.config().db_hash, Arc::clone(&engine));
                    engine
                }
            }
        };

        if let Err(err) = engine.get_db().await {
            let hash = engine.config().db_hash;
            let mut engines = inner.engines.lock().await;
            if engines
                .get(&hash)
                .is_some_and(|registered| Arc::ptr_eq(registered, &engine))
            {
                engines.remove(&hash);
            }
            return Err(err);
        }
        Ok(engine)
    }

    /// Open the database a URI points at.
    ///
    /// The URI's context must be this context.
    pub async fn open_uri(
        &self,
        uri: &DatabaseUri,
        options: DatabaseOptions,
    ) -> Result<Arc<DatabaseEngine>> {
        if uri.context_name != self.inner.context_name {
            return Err(ContextError::InvalidUri {
                uri: uri.to_string(),
                reason: format!("context is not '{}'", self.inner.context_name),
            }
            .into());
        }
        self.open_database(&uri.database_name, options.with_did(uri.did.clone()))
            .await
    }

    /// Close every engine opened through this context and drop the keyring.
    ///
    /// Opening databases afterwards fails with [`ContextError::LoggedOut`].
    pub async fn logout(&self) {
        self.inner
            .keyring
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let engines: Vec<_> = self
            .inner
            .engines
            .lock()
            .await
            .drain()
            .map(|(_, engine)| engine)
            .collect();
        for engine in &engines {
            engine.close().await;
        }
        info!(
            context = %self.inner.context_name,
            closed = engines.len(),
            "Logged out of storage context"
        );
    }
}

impl fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("did", self.did())
            .field("context_name", &self.inner.context_name)
            .field("logged_out", &self.is_logged_out())
            .finish_non_exhaustive()
    }
}

fn is_live(engine: &DatabaseEngine) -> bool {
    !matches!(engine.status(), EngineStatus::Closed | EngineStatus::Failed)
}

fn open_server(
    servers: &ServerRegistry,
    endpoint: &ServiceEndpoint,
) -> Result<Arc<dyn StorageServer>> {
    let factory = servers
        .get(&endpoint.engine_type)
        .ok_or_else(|| ContextError::UnknownEngine {
            engine_type: endpoint.engine_type.clone(),
        })?;
    Ok(factory.open(&endpoint.endpoint_uri)?)
}
