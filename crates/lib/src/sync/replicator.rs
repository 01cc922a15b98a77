//! Changes-feed replicator

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, trace};

use super::live::LiveLoop;
use super::{DocFilter, LiveSync, LiveSyncOptions, Replicator, SyncEvent, SyncHandle};
use crate::config::EngineSettings;
use crate::replica::{Denial, Replica, ReplicaError};

/// Result of one pass over a changes feed.
#[derive(Debug, Default)]
pub(crate) struct Pass {
    /// Sequence the next pass resumes from
    pub(crate) last_seq: u64,
    pub(crate) written: usize,
    pub(crate) denied: Vec<Denial>,
}

/// Copy everything in `source` after `since` into `target`.
pub(crate) async fn replicate_pass(
    source: &dyn Replica,
    target: &dyn Replica,
    since: u64,
    filter: &DocFilter,
    batch_size: usize,
) -> Result<Pass, ReplicaError> {
    let mut pass = Pass {
        last_seq: since,
        ..Pass::default()
    };

    loop {
        let batch = source.changes(pass.last_seq, batch_size).await?;
        let docs: Vec<_> = batch.docs.into_iter().filter(|doc| filter(doc)).collect();

        if !docs.is_empty() {
            trace!(
                source = source.name(),
                target = target.name(),
                count = docs.len(),
                "Applying batch"
            );
            let applied = target.bulk_apply(docs).await?;
            pass.written += applied.written;
            pass.denied.extend(applied.denied);
        }

        pass.last_seq = batch.last_seq;
        if !batch.has_more {
            return Ok(pass);
        }
    }
}

/// Convert a failed request into the event reporting it.
pub(crate) fn failure_event(err: &ReplicaError) -> SyncEvent {
    if err.is_denied() {
        SyncEvent::Denied {
            doc_id: None,
            reason: err.to_string(),
        }
    } else {
        SyncEvent::Error {
            reason: err.to_string(),
        }
    }
}

pub(crate) fn denial_events(denied: Vec<Denial>) -> impl Iterator<Item = SyncEvent> {
    denied.into_iter().map(|denial| SyncEvent::Denied {
        doc_id: Some(denial.id),
        reason: denial.reason,
    })
}

/// Replicator reading and merging changes feeds in pages.
#[derive(Debug, Clone)]
pub struct ChangesReplicator {
    batch_size: usize,
    event_buffer: usize,
    interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ChangesReplicator {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            batch_size: settings.batch_size(),
            event_buffer: settings.event_buffer(),
            interval: settings.sync_interval(),
            initial_backoff: settings.retry_initial_backoff(),
            max_backoff: settings.retry_max_backoff(),
        }
    }
}

impl Default for ChangesReplicator {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

impl Replicator for ChangesReplicator {
    fn replicate_from(
        &self,
        source: Arc<dyn Replica>,
        target: Arc<dyn Replica>,
        filter: DocFilter,
    ) -> mpsc::Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let batch_size = self.batch_size;
        let span = info_span!("replicate", source = source.name(), target = target.name());

        tokio::spawn(
            async move {
                match replicate_pass(source.as_ref(), target.as_ref(), 0, &filter, batch_size).await
                {
                    Ok(pass) => {
                        debug!(written = pass.written, "One-shot replication complete");
                        for event in denial_events(pass.denied) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        let _ = tx
                            .send(SyncEvent::Complete {
                                docs_written: pass.written,
                            })
                            .await;
                    }
                    Err(err) => {
                        debug!(error = %err, "One-shot replication failed");
                        let _ = tx.send(failure_event(&err)).await;
                    }
                }
            }
            .instrument(span),
        );

        rx
    }

    fn sync(
        &self,
        local: Arc<dyn Replica>,
        remote: Arc<dyn Replica>,
        options: LiveSyncOptions,
    ) -> LiveSync {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let live = LiveLoop {
            local,
            remote,
            options,
            events: tx,
            batch_size: self.batch_size,
            interval: self.interval,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
        };
        let task = tokio::spawn(live.run(shutdown_rx));

        LiveSync {
            events: rx,
            handle: SyncHandle::new(shutdown_tx, task),
        }
    }
}
