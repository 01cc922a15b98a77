//! Replication between replicas
//!
//! A [`Replicator`] moves documents between two [`Replica`]s by reading the
//! source's changes feed and merging it into the target. It offers a one-shot
//! pull ([`Replicator::replicate_from`]) and a continuous bidirectional sync
//! ([`Replicator::sync`]). Both run in spawned tasks and report progress as
//! [`SyncEvent`]s over a bounded channel.
//!
//! The default implementation is [`ChangesReplicator`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

mod live;
mod replicator;

pub use replicator::ChangesReplicator;

use crate::replica::{Document, Replica};

/// Which way documents moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// remote → local
    Pull,
    /// local → remote
    Push,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Pull => f.write_str("pull"),
            Direction::Push => f.write_str("push"),
        }
    }
}

/// Progress reported by a running replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Documents were written to one side.
    Change {
        direction: Direction,
        docs_written: usize,
    },
    /// A one-shot replication finished.
    Complete { docs_written: usize },
    /// Access was refused. With a `doc_id` only that document was skipped;
    /// without one the whole request was refused and replication stopped.
    Denied {
        doc_id: Option<String>,
        reason: String,
    },
    /// Replication failed. Live sync with retry keeps going after this.
    Error { reason: String },
}

impl SyncEvent {
    /// Whether this event ends a replication attempt.
    pub fn is_terminal_denial(&self) -> bool {
        matches!(self, SyncEvent::Denied { doc_id: None, .. })
    }
}

/// Predicate deciding which documents replicate.
pub type DocFilter = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Replicate everything except internal documents.
pub fn exclude_internal() -> DocFilter {
    Arc::new(|doc: &Document| !doc.is_internal())
}

/// Replicate every document.
pub fn include_all() -> DocFilter {
    Arc::new(|_: &Document| true)
}

/// Options for [`Replicator::sync`].
#[derive(Clone)]
pub struct LiveSyncOptions {
    /// Keep running after the first round trip
    pub live: bool,
    /// Retry with exponential backoff after transient errors
    pub retry: bool,
    pub filter: DocFilter,
}

impl Default for LiveSyncOptions {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            filter: exclude_internal(),
        }
    }
}

impl fmt::Debug for LiveSyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSyncOptions")
            .field("live", &self.live)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Stops a running replication task.
///
/// Dropping the handle also signals the task to stop, without waiting for it.
#[derive(Debug)]
pub struct SyncHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// A running bidirectional sync.
#[derive(Debug)]
pub struct LiveSync {
    pub events: mpsc::Receiver<SyncEvent>,
    pub handle: SyncHandle,
}

/// Moves documents between replicas.
pub trait Replicator: Send + Sync {
    /// One-shot pull of `source` into `target`.
    ///
    /// Ends with `Complete` on success, or a terminal `Denied`/`Error`.
    fn replicate_from(
        &self,
        source: Arc<dyn Replica>,
        target: Arc<dyn Replica>,
        filter: DocFilter,
    ) -> mpsc::Receiver<SyncEvent>;

    /// Bidirectional sync between `local` and `remote`.
    fn sync(
        &self,
        local: Arc<dyn Replica>,
        remote: Arc<dyn Replica>,
        options: LiveSyncOptions,
    ) -> LiveSync;
}
