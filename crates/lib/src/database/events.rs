//! Sync event reporting.

use tracing::{debug, error, info, warn};

use super::EngineShared;
use crate::sync::SyncEvent;

impl EngineShared {
    /// Log `event` and republish it to [`super::DatabaseEngine::events`]
    /// subscribers.
    pub(crate) fn publish(&self, event: SyncEvent) {
        let db = self.config().db_name;
        match &event {
            SyncEvent::Complete { docs_written } => {
                info!(%db, docs_written, "Snapshot sync complete");
            }
            SyncEvent::Change {
                direction,
                docs_written,
            } => {
                debug!(%db, %direction, docs_written, "Sync change");
            }
            SyncEvent::Denied { doc_id, reason } => {
                warn!(%db, ?doc_id, %reason, "Sync denied");
            }
            SyncEvent::Error { reason } => {
                error!(%db, %reason, "Sync error");
            }
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
