//! Storage context configuration and resolution

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ContextError;
use crate::Result;
use crate::account::Did;
use crate::keyring::PublicKeys;

/// Where a storage service is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub engine_type: String,
    pub endpoint_uri: String,
}

/// Services offered to a storage context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextServices {
    pub database: ServiceEndpoint,
}

/// Published description of one storage context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageContextConfig {
    /// Identifier of the context, derived from its public signing key
    pub id: String,
    pub context_name: String,
    pub services: ContextServices,
    pub public_keys: PublicKeys,
}

impl StorageContextConfig {
    pub fn new(context_name: &str, endpoint: ServiceEndpoint, public_keys: PublicKeys) -> Self {
        Self {
            id: format!("z{}", public_keys.sign.base58),
            context_name: context_name.to_string(),
            services: ContextServices { database: endpoint },
            public_keys,
        }
    }
}

/// Resolves and links storage contexts for DIDs.
#[async_trait]
pub trait ContextResolver: Send + Sync {
    /// The context `context_name` linked to `did`, if any.
    async fn resolve(&self, did: &Did, context_name: &str)
    -> Result<Option<StorageContextConfig>>;

    /// Link `config` to `did`, replacing any existing link of the same name.
    async fn link(&self, did: &Did, config: StorageContextConfig) -> Result<()>;
}

/// Resolver keeping links in memory.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    links: Mutex<HashMap<(Did, String), StorageContextConfig>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_count(&self) -> usize {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ContextResolver for InMemoryResolver {
    async fn resolve(
        &self,
        did: &Did,
        context_name: &str,
    ) -> Result<Option<StorageContextConfig>> {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(links.get(&(did.clone(), context_name.to_string())).cloned())
    }

    async fn link(&self, did: &Did, config: StorageContextConfig) -> Result<()> {
        if config.context_name.is_empty() {
            return Err(ContextError::LinkFailed {
                context_name: config.context_name,
                reason: "context name is empty".to_string(),
            }
            .into());
        }
        debug!(%did, context = %config.context_name, "Linking storage context");
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((did.clone(), config.context_name.clone()), config);
        Ok(())
    }
}
