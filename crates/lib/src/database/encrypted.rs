//! Owner-only databases with a local encrypted replica

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, info_span};

use super::{DatabaseError, Db, EngineShared, EngineStatus, InitCell};
use crate::Result;
use crate::permissions::select_credentials;
use crate::replica::{DocCipher, LocalReplica, Replica};
use crate::sync::{LiveSync, LiveSyncOptions, SyncEvent, SyncHandle, exclude_internal};

/// Engine for databases that only their owner can read and write.
///
/// Documents are encrypted with a key derived from the context keyring and
/// the database name. The local replica and the server only ever see
/// ciphertext. Once the handle is returned, a background task pulls a
/// snapshot from the server and then keeps both sides in sync.
pub struct EncryptedDatabase {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) init: InitCell,
    supervisor: Mutex<Option<SyncHandle>>,
}

impl EncryptedDatabase {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self {
            shared,
            init: InitCell::new(),
            supervisor: Mutex::new(None),
        }
    }

    pub async fn get_db(&self) -> Result<Db> {
        let db = self
            .init
            .get_or_init(&self.shared, || self.initialize())
            .await?;
        Ok(db)
    }

    /// Stop the snapshot or live sync task, if one is running.
    pub async fn stop_sync(&self) {
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            handle.stop().await;
            debug!(db = %self.shared.config().db_name, "Sync stopped");
        }
    }

    async fn initialize(&self) -> std::result::Result<Db, DatabaseError> {
        let config = self.shared.config();
        let span = info_span!("open_encrypted", db = %config.db_name);

        async {
            // Nothing touches the local replica before access is settled
            let scope = select_credentials(&config.permissions, config.is_owner)?;

            self.shared.set_status(EngineStatus::OpeningLocal);
            let key = self
                .shared
                .deps
                .keyring
                .get_storage_context_key(&config.db_name);
            let cipher = DocCipher::new(key);
            let local = self.open_local(&config.db_hash).await?;
            cipher.verify_key(local.as_ref()).await?;

            self.shared.set_status(EngineStatus::CheckingRemote);
            let remote = self.shared.connect_remote(&config, scope).await?;

            if self.shared.remote_missing(remote.as_ref()).await? {
                if !config.is_owner {
                    return Err(DatabaseError::NotFound {
                        name: config.db_name.clone(),
                    });
                }
                self.shared.provision(&config).await?;
                tokio::time::sleep(self.shared.deps.settings.provision_settle_delay()).await;
            }

            self.shared.set_status(EngineStatus::Connected);
            let db = Db::new(
                config.db_name.clone(),
                Arc::clone(&local),
                Some(cipher),
                config.read_only,
                self.shared.closed_flag(),
            );
            self.start_sync(local, remote);
            Ok(db)
        }
        .instrument(span)
        .await
    }

    async fn open_local(
        &self,
        db_hash: &str,
    ) -> std::result::Result<Arc<dyn Replica>, DatabaseError> {
        match self.shared.deps.settings.replica_path(db_hash) {
            Some(path) => {
                let replica = LocalReplica::open(db_hash, path).await.map_err(|e| {
                    DatabaseError::Connection {
                        reason: format!("failed to open local replica: {e}"),
                    }
                })?;
                Ok(Arc::new(replica))
            }
            None => Ok(Arc::new(LocalReplica::in_memory(db_hash))),
        }
    }

    fn start_sync(&self, local: Arc<dyn Replica>, remote: Arc<dyn Replica>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let span = info_span!("live_sync", db = %self.shared.config().db_name);
        let task = tokio::spawn(
            supervise(Arc::clone(&self.shared), local, remote, shutdown_rx).instrument(span),
        );
        *self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SyncHandle::new(shutdown_tx, task));
    }
}

/// Run the snapshot pull, then live sync once it completed.
async fn supervise(
    shared: Arc<EngineShared>,
    local: Arc<dyn Replica>,
    remote: Arc<dyn Replica>,
    mut shutdown: oneshot::Receiver<()>,
) {
    shared.set_status(EngineStatus::SnapshotSync);
    let replicator = Arc::clone(&shared.deps.replicator);
    let mut snapshot =
        replicator.replicate_from(Arc::clone(&remote), Arc::clone(&local), exclude_internal());

    let completed = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            event = snapshot.recv() => {
                let Some(event) = event else {
                    break false;
                };
                let outcome = match &event {
                    SyncEvent::Complete { .. } => Some(true),
                    SyncEvent::Error { .. } => Some(false),
                    event if event.is_terminal_denial() => Some(false),
                    _ => None,
                };
                shared.publish(event);
                if let Some(completed) = outcome {
                    break completed;
                }
            }
        }
    };

    if !completed {
        info!("Snapshot sync did not complete, live sync not started");
        shared.set_status(EngineStatus::SyncStopped);
        return;
    }

    shared.set_status(EngineStatus::LiveSync);
    let LiveSync {
        mut events,
        mut handle,
    } = replicator.sync(local, remote, LiveSyncOptions::default());

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                handle.stop().await;
                return;
            }
            event = events.recv() => match event {
                Some(event) => shared.publish(event),
                None => break,
            },
        }
    }

    handle.stop().await;
    info!("Live sync ended");
    shared.set_status(EngineStatus::SyncStopped);
}
