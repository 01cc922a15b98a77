use std::sync::Arc;

use contextdb::{
    DatabaseOptions, Did, EngineStatus, LocalAccount, PermissionOption,
    PermissionsConfig, sync::SyncEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::helpers::{
    FixedDidAccount, GatedReplicator, ScriptedReplicator, TestEnv, eventually, new_account,
    wait_for_status,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    title: String,
    body: String,
}

fn note(title: &str) -> Note {
    Note {
        title: title.to_string(),
        body: format!("{title} body"),
    }
}

#[tokio::test]
async fn test_owner_provisions_missing_database_once() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;

    let engine = context
        .open_database("myTestDb", DatabaseOptions::default())
        .await
        .unwrap();
    assert!(engine.is_encrypted());
    assert_eq!(env.server.provision_count(), 1);
    assert!(engine.get_db().await.is_ok());

    // Reopening finds the database and does not provision again
    let again = context
        .open_database("myTestDb", DatabaseOptions::default())
        .await
        .unwrap();
    assert!(again.get_db().await.is_ok());
    assert!(Arc::ptr_eq(&engine, &again));
    assert_eq!(env.server.provision_count(), 1);

    let hash = engine.config().db_hash;
    assert_eq!(env.server.permissions(&hash), Some(PermissionsConfig::owner()));
}

#[tokio::test]
async fn test_provisioning_failure_is_terminal() {
    let env = TestEnv::new();
    env.server.set_reject_provisioning(true);
    let context = env.open(new_account()).await;

    let err = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_provisioning_error());
    assert!(
        err.to_string()
            .contains("user doesn't exist or unable to create database")
    );
    assert_eq!(env.server.provision_count(), 1);
}

#[tokio::test]
async fn test_failed_open_is_retried_with_a_new_engine() {
    let env = TestEnv::new();
    env.server.set_reject_provisioning(true);
    let context = env.open(new_account()).await;

    let err = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_provisioning_error());

    env.server.set_reject_provisioning(false);
    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    assert!(engine.get_db().await.is_ok());
    assert_eq!(env.server.provision_count(), 2);
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    env.server.set_available(false);

    let err = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(env.server.provision_count(), 0);
}

#[tokio::test]
async fn test_snapshot_completes_before_live_sync() {
    let env = TestEnv::new();
    let replicator = GatedReplicator::new(&env);
    let collaborators = env.collaborators().with_replicator(replicator.clone());
    let context = env.open_with(new_account(), collaborators).await;

    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();

    // get_db returned while the snapshot is still held back
    wait_for_status(&engine, EngineStatus::SnapshotSync).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(replicator.calls(), vec!["snapshot"]);
    assert_eq!(engine.status(), EngineStatus::SnapshotSync);

    replicator.release();
    wait_for_status(&engine, EngineStatus::LiveSync).await;
    assert_eq!(replicator.calls(), vec!["snapshot", "live"]);
}

#[tokio::test]
async fn test_denied_snapshot_stops_sync_but_not_open() {
    let env = TestEnv::new();
    let replicator = ScriptedReplicator::new(
        &env,
        vec![SyncEvent::Denied {
            doc_id: None,
            reason: "read access not permitted".into(),
        }],
    );
    let collaborators = env.collaborators().with_replicator(replicator.clone());
    let context = env.open_with(new_account(), collaborators).await;

    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, EngineStatus::SyncStopped).await;
    assert_eq!(replicator.calls(), vec!["snapshot"]);

    // The local replica keeps working
    let db = engine.get_db().await.unwrap();
    db.put("draft", &note("offline")).await.unwrap();
    assert_eq!(db.get::<Note>("draft").await.unwrap(), Some(note("offline")));
}

#[tokio::test]
async fn test_per_document_denials_do_not_stop_snapshot() {
    let env = TestEnv::new();
    let replicator = ScriptedReplicator::new(
        &env,
        vec![
            SyncEvent::Denied {
                doc_id: Some("secret".into()),
                reason: "no".into(),
            },
            SyncEvent::Complete { docs_written: 0 },
        ],
    );
    let collaborators = env.collaborators().with_replicator(replicator.clone());
    let context = env.open_with(new_account(), collaborators).await;

    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, EngineStatus::LiveSync).await;
    assert_eq!(replicator.calls(), vec!["snapshot", "live"]);
}

#[tokio::test]
async fn test_snapshot_error_stops_sync_but_not_open() {
    let env = TestEnv::new();
    let failure = SyncEvent::Error {
        reason: "remote closed the connection".into(),
    };
    let replicator = ScriptedReplicator::held(&env, vec![failure.clone()]);
    let collaborators = env.collaborators().with_replicator(replicator.clone());
    let context = env.open_with(new_account(), collaborators).await;

    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    let mut events = engine.events();
    replicator.release();

    wait_for_status(&engine, EngineStatus::SyncStopped).await;
    assert_eq!(events.recv().await.unwrap(), failure);
    assert_eq!(replicator.calls(), vec!["snapshot"]);
    assert!(engine.get_db().await.is_ok());
}

#[tokio::test]
async fn test_two_devices_sync_ciphertext() {
    let env = TestEnv::new();
    let secret = [11u8; 32];
    let laptop = env
        .open(Arc::new(LocalAccount::from_secret_bytes(&secret)))
        .await;
    let phone = env
        .open(Arc::new(LocalAccount::from_secret_bytes(&secret)))
        .await;

    let laptop_engine = laptop
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    let phone_engine = phone
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    wait_for_status(&laptop_engine, EngineStatus::LiveSync).await;
    wait_for_status(&phone_engine, EngineStatus::LiveSync).await;

    let laptop_db = laptop_engine.get_db().await.unwrap();
    let phone_db = phone_engine.get_db().await.unwrap();

    laptop_db.put("shopping", &note("shopping")).await.unwrap();
    eventually("laptop note on phone", || async {
        phone_db.get::<Note>("shopping").await.unwrap() == Some(note("shopping"))
    })
    .await;

    phone_db.put("reply", &note("reply")).await.unwrap();
    eventually("phone note on laptop", || async {
        laptop_db.get::<Note>("reply").await.unwrap() == Some(note("reply"))
    })
    .await;

    // The server only ever held ciphertext
    let hash = laptop_engine.config().db_hash;
    let stored = env.server.stored_documents(&hash).await.unwrap();
    assert_eq!(stored.len(), 2);
    for doc in &stored {
        assert!(doc.body.get("ciphertext").is_some());
        assert!(!doc.body.to_string().contains("shopping body"));
    }
}

#[tokio::test]
async fn test_reserved_documents_stay_local() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, EngineStatus::LiveSync).await;

    let db = engine.get_db().await.unwrap();
    assert!(db.put("_local/key_check", &json!("x")).await.is_err());
    db.put("visible", &json!({"n": 1})).await.unwrap();

    let hash = engine.config().db_hash;
    eventually("document on server", || async {
        env.server
            .stored_documents(&hash)
            .await
            .is_some_and(|docs| !docs.is_empty())
    })
    .await;
    let stored = env.server.stored_documents(&hash).await.unwrap();
    assert!(stored.iter().all(|doc| !doc.id.starts_with('_')));
    assert_eq!(db.all::<Value>().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reopen_with_different_key_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let env = TestEnv::new().with_data_dir(dir.path());
    let did = "did:key:z6MkSameIdentity";

    let original = env.open(FixedDidAccount::new(did, "first key")).await;
    let engine = original
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    engine
        .get_db()
        .await
        .unwrap()
        .put("a", &note("a"))
        .await
        .unwrap();
    original.logout().await;

    // Same key reopens the persisted replica
    let same = env.open(FixedDidAccount::new(did, "first key")).await;
    let reopened = same
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    let db = reopened.get_db().await.unwrap();
    assert_eq!(db.get::<Note>("a").await.unwrap(), Some(note("a")));
    same.logout().await;

    let rotated = env.open(FixedDidAccount::new(did, "second key")).await;
    let err = rotated
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("different key"));
}

#[tokio::test]
async fn test_stranger_leaves_no_local_replica() {
    let dir = tempfile::tempdir().unwrap();
    let env = TestEnv::new().with_data_dir(dir.path());
    let owner = new_account();
    let owner_context = env.open(owner.clone()).await;

    let stranger = env.open(new_account()).await;
    let err = stranger
        .open_database("diary", DatabaseOptions::default().with_did(owner.did().clone()))
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    // The owner still opens their replica with their own key
    let engine = owner_context
        .open_database("diary", DatabaseOptions::default())
        .await
        .unwrap();
    let db = engine.get_db().await.unwrap();
    db.put("monday", &note("monday")).await.unwrap();
    assert_eq!(db.get::<Note>("monday").await.unwrap(), Some(note("monday")));
}

#[tokio::test]
async fn test_reopened_database_keeps_every_write() {
    let dir = tempfile::tempdir().unwrap();
    let env = TestEnv::new().with_data_dir(dir.path());
    let account = new_account();
    let context = env.open(account.clone()).await;

    let first = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    let second = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    env.server.set_available(false);
    let first_db = first.get_db().await.unwrap();
    let second_db = second.get_db().await.unwrap();
    first_db.put("from_a", &note("a")).await.unwrap();
    second_db.put("from_b", &note("b")).await.unwrap();
    context.logout().await;

    // Both writes made it to the persisted replica
    env.server.set_available(true);
    let reopened = env.open(account).await;
    let db = reopened
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap()
        .get_db()
        .await
        .unwrap();
    assert_eq!(db.get::<Note>("from_a").await.unwrap(), Some(note("a")));
    assert_eq!(db.get::<Note>("from_b").await.unwrap(), Some(note("b")));
}

#[tokio::test]
async fn test_logout_stops_sync() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, EngineStatus::LiveSync).await;
    let db = engine.get_db().await.unwrap();

    context.logout().await;
    assert_eq!(engine.status(), EngineStatus::Closed);
    assert!(db.put("late", &note("late")).await.is_err());
    assert!(engine.get_db().await.is_err());

    let hash = engine.config().db_hash;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(env.server.stored_documents(&hash).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_concurrent_opens_share_one_initialization() {
    let mut env = TestEnv::new();
    // Keep the first open busy while the others arrive
    env.settings.engine.provision_settle_delay_ms = 200;
    let context = env.open(new_account()).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let context = context.clone();
            tokio::spawn(async move {
                context
                    .open_database("notes", DatabaseOptions::default())
                    .await
                    .unwrap()
            })
        })
        .collect();
    let mut engines = Vec::new();
    for task in tasks {
        engines.push(task.await.unwrap());
    }

    assert!(engines.iter().all(|engine| Arc::ptr_eq(engine, &engines[0])));
    assert_eq!(env.server.provision_count(), 1);
}

#[tokio::test]
async fn test_update_users() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    let friend = Did::from("did:key:z6MkFriend");

    engine
        .update_users(vec![friend.clone()], vec![])
        .await
        .unwrap();
    assert_eq!(env.server.update_count(), 1);

    let hash = engine.config().db_hash;
    let stored = env.server.permissions(&hash).unwrap();
    assert_eq!(stored.read_list, vec![friend.clone()]);
    assert_eq!(stored.read, PermissionOption::Owner);
    assert_eq!(engine.config().permissions.read_list, vec![friend]);
}
