use contextdb::{DatabaseOptions, EngineStatus, PermissionsConfig};
use serde_json::{Value, json};

use super::public_options;
use crate::helpers::{TestEnv, new_account};

#[tokio::test]
async fn test_non_owner_missing_database_not_found() {
    let env = TestEnv::new();
    let owner = new_account();
    // Link the owner's context so readers can resolve its endpoint
    let _owner_context = env.open(owner.clone()).await;
    let reader = env.open(new_account()).await;

    let err = reader
        .open_database("feed", public_options().with_did(owner.did().clone()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(env.server.provision_count(), 0);
}

#[tokio::test]
async fn test_owner_provisions_public_database() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;

    let engine = context
        .open_database("feed", public_options())
        .await
        .unwrap();
    assert!(!engine.is_encrypted());
    assert_eq!(engine.status(), EngineStatus::Connected);
    assert_eq!(env.server.provision_count(), 1);

    let db = engine.get_db().await.unwrap();
    assert!(!db.is_read_only());
    assert!(!db.is_encrypted());
    db.put("post-1", &json!({"text": "hello"})).await.unwrap();

    // Public databases live on the server, in the clear
    let stored = env
        .server
        .stored_documents(&engine.config().db_hash)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].body, json!({"text": "hello"}));
}

#[tokio::test]
async fn test_reader_gets_read_only_handle() {
    let env = TestEnv::new();
    let owner = new_account();
    let owner_context = env.open(owner.clone()).await;
    let owner_db = owner_context
        .open_database("feed", public_options())
        .await
        .unwrap()
        .get_db()
        .await
        .unwrap();
    owner_db.put("post-1", &json!({"text": "hello"})).await.unwrap();

    let reader = env.open(new_account()).await;
    let engine = reader
        .open_database("feed", public_options().with_did(owner.did().clone()))
        .await
        .unwrap();
    let db = engine.get_db().await.unwrap();

    assert!(db.is_read_only());
    assert_eq!(
        db.get::<Value>("post-1").await.unwrap(),
        Some(json!({"text": "hello"}))
    );
    let err = db.put("post-2", &json!({"text": "spam"})).await.unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(env.server.provision_count(), 1);

    // Readers cannot change the audience either
    let err = engine.update_users(vec![], vec![]).await.unwrap_err();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn test_owner_read_only_option() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    let engine = context
        .open_database("feed", public_options().read_only(true))
        .await
        .unwrap();

    let db = engine.get_db().await.unwrap();
    assert!(db.is_read_only());
    assert!(db.put("x", &json!(1)).await.is_err());
}

#[tokio::test]
async fn test_non_owner_of_private_database_denied() {
    let env = TestEnv::new();
    let owner = new_account();
    let owner_context = env.open(owner.clone()).await;
    owner_context
        .open_database("diary", DatabaseOptions::default())
        .await
        .unwrap();

    let reader = env.open(new_account()).await;
    let err = reader
        .open_database(
            "diary",
            DatabaseOptions::default().with_did(owner.did().clone()),
        )
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn test_users_policy_uses_public_engine() {
    let env = TestEnv::new();
    let friend = new_account();
    let context = env.open(new_account()).await;
    let options = DatabaseOptions::default().with_permissions(PermissionsConfig::users(
        vec![friend.did().clone()],
        vec![friend.did().clone()],
    ));

    let engine = context.open_database("shared", options).await.unwrap();
    assert!(!engine.is_encrypted());

    engine.update_users(vec![], vec![]).await.unwrap();
    let stored = env
        .server
        .permissions(&engine.config().db_hash)
        .unwrap();
    assert!(stored.read_list.is_empty());
    assert_eq!(engine.config().permissions, stored);
}
