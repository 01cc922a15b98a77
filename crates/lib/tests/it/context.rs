use std::sync::Arc;

use contextdb::{
    Account, ContextSettings, DatabaseOptions, DatabaseUri, Did, PermissionOption, StorageContext,
    constants::context_unlock_message,
    context::{ContextError, ContextResolver},
    database::database_hash,
};

use crate::helpers::{CONTEXT, ENDPOINT, TestEnv, new_account};

#[tokio::test]
async fn test_keyring_seeded_from_unlock_signature() {
    let env = TestEnv::new();
    let account = new_account();
    let context = env.open(account.clone()).await;

    let seed = account
        .sign(&context_unlock_message(CONTEXT, account.did().as_str()))
        .await
        .unwrap();
    let expected = contextdb::Keyring::new(seed);
    assert_eq!(
        context.keyring().unwrap().public_keys(),
        expected.public_keys()
    );
}

#[tokio::test]
async fn test_force_create_publishes_config() {
    let env = TestEnv::new();
    let account = new_account();
    let context = env.open(account.clone()).await;

    let linked = env
        .resolver
        .resolve(account.did(), CONTEXT)
        .await
        .unwrap()
        .expect("context should be linked");
    assert_eq!(&linked, context.config());
    assert_eq!(linked.services.database.endpoint_uri, ENDPOINT);
    assert_eq!(linked.public_keys, context.keyring().unwrap().public_keys());
    assert!(linked.id.starts_with('z'));
}

#[tokio::test]
async fn test_missing_context_without_force_create() {
    let env = TestEnv::new();
    let err = StorageContext::open(
        new_account(),
        CONTEXT,
        env.collaborators(),
        env.settings.clone(),
        false,
    )
    .await
    .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(env.resolver.link_count(), 0);
}

#[tokio::test]
async fn test_force_create_needs_endpoint() {
    let env = TestEnv::new();
    let settings = ContextSettings {
        default_endpoint: None,
        ..env.settings.clone()
    };
    let err = StorageContext::open(new_account(), CONTEXT, env.collaborators(), settings, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        contextdb::Error::Context(ContextError::LinkFailed { .. })
    ));
}

#[tokio::test]
async fn test_database_identity() {
    let env = TestEnv::new();
    let account = new_account();
    let context = env.open(account.clone()).await;

    let engine = context
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap();
    let config = engine.config();

    assert_eq!(config.did, *account.did());
    assert!(config.is_owner);
    assert_eq!(config.db_hash, database_hash("notes", account.did(), CONTEXT));
    assert_eq!(
        engine.uri(),
        DatabaseUri::new(account.did().clone(), CONTEXT, "notes")
    );
    assert_eq!(
        engine.uri().to_string(),
        format!("contextdb://{}/{CONTEXT}/notes", account.did())
    );
    assert!(env.server.has_database(&config.db_hash));
}

#[tokio::test]
async fn test_open_by_uri() {
    let env = TestEnv::new();
    let owner = new_account();
    let owner_context = env.open(owner.clone()).await;
    let public = DatabaseOptions::default().with_permissions(contextdb::PermissionsConfig::public_read());
    let engine = owner_context
        .open_database("feed", public.clone())
        .await
        .unwrap();
    let uri: DatabaseUri = engine.uri().to_string().parse().unwrap();

    let reader_context = env.open(new_account()).await;
    let reader = reader_context.open_uri(&uri, public).await.unwrap();
    assert!(!reader.config().is_owner);
    assert_eq!(reader.config().db_hash, engine.config().db_hash);

    let wrong_context = DatabaseUri::new(owner.did().clone(), "other-app", "feed");
    let err = reader_context
        .open_uri(&wrong_context, DatabaseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        contextdb::Error::Context(ContextError::InvalidUri { .. })
    ));
}

#[tokio::test]
async fn test_other_did_needs_linked_context() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    let options = DatabaseOptions::default()
        .with_did(Did::from("did:key:z6MkNobody"))
        .with_permissions(contextdb::PermissionsConfig::public_read());

    let err = context.open_database("feed", options).await.unwrap_err();
    assert!(matches!(
        err,
        contextdb::Error::Context(ContextError::ContextNotFound { .. })
    ));
}

#[tokio::test]
async fn test_default_permissions_from_settings() {
    let mut env = TestEnv::new();
    env.settings.default_permissions.read = PermissionOption::Public;
    let context = env.open(new_account()).await;

    let engine = context
        .open_database("shared", DatabaseOptions::default())
        .await
        .unwrap();
    assert!(!engine.is_encrypted());
    assert_eq!(engine.config().permissions.read, PermissionOption::Public);
}

#[test]
fn test_settings_from_toml() {
    let settings = ContextSettings::from_toml_str(
        r#"
        [engine]
        data_dir = "/tmp/contextdb"
        sync_interval_ms = 250

        [default_permissions]
        read = "public"

        [default_endpoint]
        engine_type = "contextdb:v0"
        endpoint_uri = "memory://toml"
        "#,
    )
    .unwrap();

    assert_eq!(settings.engine.sync_interval_ms, 250);
    assert_eq!(settings.engine.provision_settle_delay_ms, 1000);
    assert_eq!(settings.engine.batch_size, 100);
    assert_eq!(settings.default_permissions.read, PermissionOption::Public);
    assert_eq!(settings.default_permissions.write, PermissionOption::Owner);
    assert_eq!(
        settings.default_endpoint.map(|e| e.endpoint_uri),
        Some("memory://toml".to_string())
    );

    let empty = ContextSettings::from_toml_str("").unwrap();
    assert_eq!(empty, ContextSettings::default());
}

#[tokio::test]
async fn test_logout_blocks_new_databases() {
    let env = TestEnv::new();
    let context = env.open(new_account()).await;
    let clone = context.clone();

    context.logout().await;
    assert!(clone.is_logged_out());
    assert!(clone.keyring().is_err());
    let err = clone
        .open_database("notes", DatabaseOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.module(), "context");
}

#[allow(dead_code)]
fn assert_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<StorageContext>();
    check::<Arc<contextdb::DatabaseEngine>>();
}
