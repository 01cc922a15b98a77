use std::sync::Arc;

use contextdb::{
    EngineSettings,
    replica::{MemoryReplica, Replica},
    sync::{ChangesReplicator, LiveSyncOptions, Replicator, SyncEvent, exclude_internal},
};
use serde_json::json;

use crate::helpers::eventually;

fn fast_replicator() -> ChangesReplicator {
    ChangesReplicator::new(&EngineSettings {
        sync_interval_ms: 10,
        batch_size: 2,
        ..EngineSettings::default()
    })
}

fn replica(name: &str) -> Arc<dyn Replica> {
    Arc::new(MemoryReplica::new(name))
}

async fn drain(mut events: tokio::sync::mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_snapshot_copies_everything_in_batches() {
    let source = replica("source");
    let target = replica("target");
    for i in 0..5 {
        source.put(&format!("doc-{i}"), json!({"n": i})).await.unwrap();
    }
    source.delete("doc-4").await.unwrap();

    let events = fast_replicator().replicate_from(
        Arc::clone(&source),
        Arc::clone(&target),
        exclude_internal(),
    );
    let events = drain(events).await;

    assert_eq!(events, vec![SyncEvent::Complete { docs_written: 5 }]);
    assert_eq!(target.all_docs().await.unwrap().len(), 4);
    assert_eq!(target.get("doc-4").await.unwrap(), None);
    assert_eq!(
        target.get("doc-0").await.unwrap().map(|doc| doc.body),
        Some(json!({"n": 0}))
    );
}

#[tokio::test]
async fn test_snapshot_skips_reserved_documents() {
    let source = replica("source");
    let target = replica("target");
    source.put("_design/views", json!({})).await.unwrap();
    source.put("visible", json!(1)).await.unwrap();

    let events = drain(fast_replicator().replicate_from(
        Arc::clone(&source),
        Arc::clone(&target),
        exclude_internal(),
    ))
    .await;

    assert_eq!(events, vec![SyncEvent::Complete { docs_written: 1 }]);
    assert!(target.get("_design/views").await.unwrap().is_none());
    assert!(target.get("visible").await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let left = replica("left");
    let right = replica("right");
    left.put("shared", json!("left")).await.unwrap();
    right.put("shared", json!("right")).await.unwrap();
    right.put("shared", json!("right again")).await.unwrap();

    let replicator = fast_replicator();
    drain(replicator.replicate_from(Arc::clone(&left), Arc::clone(&right), exclude_internal()))
        .await;
    drain(replicator.replicate_from(Arc::clone(&right), Arc::clone(&left), exclude_internal()))
        .await;

    // The revision with more edits wins on both sides
    let on_left = left.get("shared").await.unwrap().unwrap();
    let on_right = right.get("shared").await.unwrap().unwrap();
    assert_eq!(on_left.rev, on_right.rev);
    assert_eq!(on_left.body, json!("right again"));
}

#[tokio::test]
async fn test_live_sync_both_ways_until_stopped() {
    let local = replica("local");
    let remote = replica("remote");
    let mut sync = fast_replicator().sync(
        Arc::clone(&local),
        Arc::clone(&remote),
        LiveSyncOptions::default(),
    );

    local.put("from-local", json!(1)).await.unwrap();
    remote.put("from-remote", json!(2)).await.unwrap();
    local.put("_local/secret", json!(3)).await.unwrap();

    eventually("local write reaches remote", || async {
        remote.get("from-local").await.unwrap().is_some()
    })
    .await;
    eventually("remote write reaches local", || async {
        local.get("from-remote").await.unwrap().is_some()
    })
    .await;
    assert!(remote.get("_local/secret").await.unwrap().is_none());

    sync.handle.stop().await;
    assert!(sync.handle.is_finished());

    local.put("after-stop", json!(4)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(remote.get("after-stop").await.unwrap().is_none());

    // Events the loop sent before stopping are still readable
    while sync.events.recv().await.is_some() {}
}
