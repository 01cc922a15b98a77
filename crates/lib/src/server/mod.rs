//! Remote storage servers
//!
//! A [`StorageServer`] hosts the remote side of every database: it issues
//! credentials, provisions databases and hands out [`Replica`] connections.
//! Servers are looked up by engine type through a [`ServerRegistry`], which
//! maps each type to a [`ServerFactory`] able to reach an endpoint URI.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub mod errors;
pub mod memory;

pub use errors::ServerError;
pub use memory::InMemoryServer;

use crate::account::Did;
use crate::permissions::{CredentialScope, PermissionsConfig};
use crate::replica::Replica;

/// Credentials issued by a storage server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub endpoint: String,
    pub scope: CredentialScope,
    /// Authenticated identity; `None` for anonymous public access
    pub did: Option<Did>,
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("scope", &self.scope)
            .field("did", &self.did)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Settings sent when creating or updating a remote database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub permissions: PermissionsConfig,
}

/// The remote side of a storage context.
#[async_trait]
pub trait StorageServer: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Read-write credentials for `did`, proven by `signature` over the
    /// context authentication message.
    async fn owner_credentials(
        &self,
        did: &Did,
        context_name: &str,
        signature: &str,
    ) -> Result<Credentials, ServerError>;

    /// Anonymous read-only credentials.
    async fn public_credentials(&self) -> Result<Credentials, ServerError>;

    /// Connect to a database. The database need not exist yet; its absence
    /// shows up as `NotFound` from the replica.
    async fn connect(
        &self,
        credentials: &Credentials,
        db_hash: &str,
    ) -> Result<Arc<dyn Replica>, ServerError>;

    async fn create_database(
        &self,
        did: &Did,
        db_hash: &str,
        options: &ProvisionOptions,
    ) -> Result<(), ServerError>;

    async fn update_database(
        &self,
        did: &Did,
        db_hash: &str,
        options: &ProvisionOptions,
    ) -> Result<(), ServerError>;
}

/// Reaches a storage server by endpoint URI.
pub trait ServerFactory: Send + Sync {
    fn open(&self, endpoint_uri: &str) -> Result<Arc<dyn StorageServer>, ServerError>;
}

/// Server factories by engine type.
#[derive(Clone, Default)]
pub struct ServerRegistry {
    factories: HashMap<String, Arc<dyn ServerFactory>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine_type: impl Into<String>, factory: Arc<dyn ServerFactory>) {
        self.factories.insert(engine_type.into(), factory);
    }

    /// Builder form of [`ServerRegistry::register`].
    pub fn with(mut self, engine_type: impl Into<String>, factory: Arc<dyn ServerFactory>) -> Self {
        self.register(engine_type, factory);
        self
    }

    pub fn get(&self, engine_type: &str) -> Option<Arc<dyn ServerFactory>> {
        self.factories.get(engine_type).cloned()
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut engine_types: Vec<_> = self.factories.keys().collect();
        engine_types.sort();
        f.debug_struct("ServerRegistry")
            .field("engine_types", &engine_types)
            .finish()
    }
}
