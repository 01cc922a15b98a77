//! Runtime settings for engines and storage contexts
//!
//! Settings deserialize from TOML with every field optional:
//!
//! ```toml
//! [engine]
//! data_dir = "/var/lib/contextdb"
//! provision_settle_delay_ms = 1000
//!
//! [default_permissions]
//! read = "public"
//!
//! [default_endpoint]
//! engine_type = "contextdb:v0"
//! endpoint_uri = "memory://default"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::constants::DEFAULT_URI_SCHEME;
use crate::context::ServiceEndpoint;
use crate::permissions::PermissionsConfig;

/// Settings shared by every database engine of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory for local replica files. In memory when unset.
    pub data_dir: Option<PathBuf>,
    /// Wait after provisioning before the first snapshot
    pub provision_settle_delay_ms: u64,
    /// Pause between live sync round trips
    pub sync_interval_ms: u64,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// Capacity of sync event channels
    pub event_buffer: usize,
    /// Documents per changes-feed page
    pub batch_size: usize,
    pub uri_scheme: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            provision_settle_delay_ms: 1000,
            sync_interval_ms: 500,
            retry_initial_backoff_ms: 500,
            retry_max_backoff_ms: 30_000,
            event_buffer: 64,
            batch_size: 100,
            uri_scheme: DEFAULT_URI_SCHEME.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn provision_settle_delay(&self) -> Duration {
        Duration::from_millis(self.provision_settle_delay_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn retry_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_initial_backoff_ms.max(1))
    }

    pub fn retry_max_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_max_backoff_ms.max(self.retry_initial_backoff_ms).max(1))
    }

    /// Channel capacity, never zero.
    pub fn event_buffer(&self) -> usize {
        self.event_buffer.max(1)
    }

    /// Page size, never zero.
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Path of the local replica file for a hashed database name.
    pub fn replica_path(&self, db_hash: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{db_hash}.json")))
    }
}

/// Settings for a storage context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub engine: EngineSettings,
    /// Permissions used when `open_database` gets no overrides
    pub default_permissions: PermissionsConfig,
    /// Endpoint linked when a context is created
    pub default_endpoint: Option<ServiceEndpoint>,
}

impl ContextSettings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
