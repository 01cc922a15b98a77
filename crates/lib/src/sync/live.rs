//! Continuous bidirectional sync loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::replicator::{Pass, denial_events, failure_event, replicate_pass};
use super::{Direction, LiveSyncOptions, SyncEvent};
use crate::replica::{Replica, ReplicaError};

/// State of one running sync between a local and a remote replica.
pub(crate) struct LiveLoop {
    pub(crate) local: Arc<dyn Replica>,
    pub(crate) remote: Arc<dyn Replica>,
    pub(crate) options: LiveSyncOptions,
    pub(crate) events: mpsc::Sender<SyncEvent>,
    pub(crate) batch_size: usize,
    pub(crate) interval: Duration,
    pub(crate) initial_backoff: Duration,
    pub(crate) max_backoff: Duration,
}

/// Checkpoints of both directions.
#[derive(Debug, Default, Clone, Copy)]
struct Checkpoints {
    pull: u64,
    push: u64,
}

impl LiveLoop {
    pub(crate) async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let span = info_span!("live_sync", db = self.remote.name());
        async move {
            info!("Starting live sync");
            let mut checkpoints = Checkpoints::default();
            let mut backoff = self.initial_backoff;

            loop {
                let round = tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    round = self.round_trip(checkpoints) => round,
                };

                let wait = match round {
                    Ok((next, pull, push)) => {
                        checkpoints = next;
                        backoff = self.initial_backoff;
                        if !self.report(Direction::Pull, pull).await
                            || !self.report(Direction::Push, push).await
                        {
                            break;
                        }
                        if !self.options.live {
                            let _ = self.events.send(SyncEvent::Complete { docs_written: 0 }).await;
                            break;
                        }
                        self.interval
                    }
                    Err(err) if err.is_denied() => {
                        warn!(error = %err, "Live sync denied, stopping");
                        let _ = self.events.send(failure_event(&err)).await;
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "Live sync error");
                        if self.events.send(failure_event(&err)).await.is_err() {
                            break;
                        }
                        if !self.options.retry {
                            break;
                        }
                        let wait = backoff;
                        backoff = (backoff * 2).min(self.max_backoff);
                        debug!(?wait, "Retrying live sync");
                        wait
                    }
                };

                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = sleep(wait) => {}
                }
            }

            info!("Live sync stopped");
        }
        .instrument(span)
        .await
    }

    /// Pull then push, returning the advanced checkpoints.
    async fn round_trip(
        &self,
        checkpoints: Checkpoints,
    ) -> Result<(Checkpoints, Pass, Pass), ReplicaError> {
        let pull = replicate_pass(
            self.remote.as_ref(),
            self.local.as_ref(),
            checkpoints.pull,
            &self.options.filter,
            self.batch_size,
        )
        .await?;
        let push = replicate_pass(
            self.local.as_ref(),
            self.remote.as_ref(),
            checkpoints.push,
            &self.options.filter,
            self.batch_size,
        )
        .await?;

        let next = Checkpoints {
            pull: pull.last_seq,
            push: push.last_seq,
        };
        Ok((next, pull, push))
    }

    /// Publish the outcome of one direction. Returns `false` once nobody is
    /// listening anymore.
    async fn report(&self, direction: Direction, pass: Pass) -> bool {
        if pass.written > 0 {
            debug!(%direction, written = pass.written, "Replicated documents");
            let change = SyncEvent::Change {
                direction,
                docs_written: pass.written,
            };
            if self.events.send(change).await.is_err() {
                return false;
            }
        }
        for event in denial_events(pass.denied) {
            warn!(%direction, ?event, "Document denied");
            if self.events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }
}
