//! Databases readable beyond their owner

use std::sync::Arc;

use tracing::{Instrument, debug, info_span};

use super::{DatabaseError, Db, EngineShared, EngineStatus, InitCell};
use crate::Result;
use crate::permissions::select_credentials;

/// Engine for databases other identities may read.
///
/// There is no local replica and no encryption: the handle talks to the
/// server directly. Anyone but the owner gets a read-only handle.
pub struct PublicDatabase {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) init: InitCell,
}

impl PublicDatabase {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self {
            shared,
            init: InitCell::new(),
        }
    }

    pub async fn get_db(&self) -> Result<Db> {
        let db = self
            .init
            .get_or_init(&self.shared, || self.initialize())
            .await?;
        Ok(db)
    }

    async fn initialize(&self) -> std::result::Result<Db, DatabaseError> {
        let config = self.shared.config();
        let span = info_span!("open_public", db = %config.db_name);

        async {
            self.shared.set_status(EngineStatus::CheckingRemote);
            let scope = select_credentials(&config.permissions, config.is_owner)?;
            debug!(%scope, "Connecting to public database");
            let remote = self.shared.connect_remote(&config, scope).await?;

            if self.shared.remote_missing(remote.as_ref()).await? {
                if !config.is_owner {
                    return Err(DatabaseError::NotFound {
                        name: config.db_name.clone(),
                    });
                }
                self.shared.provision(&config).await?;
            }

            self.shared.set_status(EngineStatus::Connected);
            Ok(Db::new(
                config.db_name.clone(),
                remote,
                None,
                config.read_only || !config.is_owner,
                self.shared.closed_flag(),
            ))
        }
        .instrument(span)
        .await
    }
}
