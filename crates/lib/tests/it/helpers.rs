use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use contextdb::{
    Account, Collaborators, ContextSettings, DatabaseEngine, Did, EngineStatus, LocalAccount,
    Result, StorageContext,
    constants::DEFAULT_ENGINE_TYPE,
    context::{InMemoryResolver, ServiceEndpoint},
    replica::Replica,
    server::{InMemoryServer, ServerRegistry},
    sync::{ChangesReplicator, DocFilter, LiveSync, LiveSyncOptions, Replicator, SyncEvent},
};
use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, mpsc};

pub const ENDPOINT: &str = "memory://integration";
pub const CONTEXT: &str = "test-app";

/// How long tests wait for background sync before failing
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Settings tuned for fast tests: no settle delay, short intervals.
pub fn test_settings() -> ContextSettings {
    let mut settings = ContextSettings {
        default_endpoint: Some(ServiceEndpoint {
            engine_type: DEFAULT_ENGINE_TYPE.to_string(),
            endpoint_uri: ENDPOINT.to_string(),
        }),
        ..ContextSettings::default()
    };
    settings.engine.provision_settle_delay_ms = 0;
    settings.engine.sync_interval_ms = 20;
    settings.engine.retry_initial_backoff_ms = 20;
    settings.engine.retry_max_backoff_ms = 200;
    settings
}

/// A server, a resolver and settings shared by every context a test opens.
pub struct TestEnv {
    pub server: Arc<InMemoryServer>,
    pub resolver: Arc<InMemoryResolver>,
    pub settings: ContextSettings,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            server: Arc::new(InMemoryServer::new(ENDPOINT)),
            resolver: Arc::new(InMemoryResolver::new()),
            settings: test_settings(),
        }
    }

    /// Keep local replicas in `dir` instead of memory.
    pub fn with_data_dir(mut self, dir: &Path) -> Self {
        self.settings.engine.data_dir = Some(dir.to_path_buf());
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let servers = ServerRegistry::new().with(DEFAULT_ENGINE_TYPE, self.server.clone());
        Collaborators::new(self.resolver.clone(), servers, &self.settings)
    }

    /// Unlock the test context for `account`, creating it when missing.
    pub async fn open(&self, account: Arc<dyn Account>) -> StorageContext {
        self.open_with(account, self.collaborators()).await
    }

    pub async fn open_with(
        &self,
        account: Arc<dyn Account>,
        collaborators: Collaborators,
    ) -> StorageContext {
        StorageContext::open(account, CONTEXT, collaborators, self.settings.clone(), true)
            .await
            .expect("Failed to open storage context")
    }
}

pub fn new_account() -> Arc<dyn Account> {
    Arc::new(LocalAccount::generate())
}

/// Account with a chosen DID whose signatures depend on `salt`.
///
/// Two of these with the same DID but different salts model one identity
/// whose context key changed.
pub struct FixedDidAccount {
    did: Did,
    salt: String,
}

impl FixedDidAccount {
    pub fn new(did: &str, salt: &str) -> Arc<dyn Account> {
        Arc::new(Self {
            did: Did::from(did),
            salt: salt.to_string(),
        })
    }
}

#[async_trait]
impl Account for FixedDidAccount {
    fn did(&self) -> &Did {
        &self.did
    }

    async fn sign(&self, message: &str) -> Result<String> {
        let digest = Sha256::digest(format!("{}:{message}", self.salt).as_bytes());
        Ok(hex::encode(digest))
    }
}

/// Wait until `engine` reports `status`, failing the test on timeout or on
/// a different terminal status.
pub async fn wait_for_status(engine: &DatabaseEngine, status: EngineStatus) {
    let reached = tokio::time::timeout(TIMEOUT, engine.wait_for_status(status))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {status:?}, at {:?}", engine.status()));
    assert_eq!(reached, status);
}

/// Poll `check` until it returns true.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Which replicator calls were made, in order.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Replicator holding back snapshot events until released.
pub struct GatedReplicator {
    inner: ChangesReplicator,
    gate: Arc<Semaphore>,
    pub log: CallLog,
}

impl GatedReplicator {
    pub fn new(env: &TestEnv) -> Arc<Self> {
        Arc::new(Self {
            inner: ChangesReplicator::new(&env.settings.engine),
            gate: Arc::new(Semaphore::new(0)),
            log: CallLog::default(),
        })
    }

    /// Let snapshot events through.
    pub fn release(&self) {
        self.gate.add_permits(64);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

impl Replicator for GatedReplicator {
    fn replicate_from(
        &self,
        source: Arc<dyn Replica>,
        target: Arc<dyn Replica>,
        filter: DocFilter,
    ) -> mpsc::Receiver<SyncEvent> {
        self.log.lock().unwrap().push("snapshot");
        let mut upstream = self.inner.replicate_from(source, target, filter);
        let (tx, rx) = mpsc::channel(16);
        let gate = self.gate.clone();
        tokio::spawn(async move {
            let Ok(_permit) = gate.acquire().await else {
                return;
            };
            while let Some(event) = upstream.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn sync(
        &self,
        local: Arc<dyn Replica>,
        remote: Arc<dyn Replica>,
        options: LiveSyncOptions,
    ) -> LiveSync {
        self.log.lock().unwrap().push("live");
        self.inner.sync(local, remote, options)
    }
}

/// Replicator whose snapshot reports fixed events and never touches data.
pub struct ScriptedReplicator {
    inner: ChangesReplicator,
    snapshot: Vec<SyncEvent>,
    gate: Arc<Semaphore>,
    pub log: CallLog,
}

impl ScriptedReplicator {
    pub fn new(env: &TestEnv, snapshot: Vec<SyncEvent>) -> Arc<Self> {
        Self::build(env, snapshot, 1)
    }

    /// Like [`ScriptedReplicator::new`], but the events wait for
    /// [`ScriptedReplicator::release`].
    pub fn held(env: &TestEnv, snapshot: Vec<SyncEvent>) -> Arc<Self> {
        Self::build(env, snapshot, 0)
    }

    fn build(env: &TestEnv, snapshot: Vec<SyncEvent>, permits: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: ChangesReplicator::new(&env.settings.engine),
            snapshot,
            gate: Arc::new(Semaphore::new(permits)),
            log: CallLog::default(),
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

impl Replicator for ScriptedReplicator {
    fn replicate_from(
        &self,
        _source: Arc<dyn Replica>,
        _target: Arc<dyn Replica>,
        _filter: DocFilter,
    ) -> mpsc::Receiver<SyncEvent> {
        self.log.lock().unwrap().push("snapshot");
        let (tx, rx) = mpsc::channel(self.snapshot.len().max(1));
        let events = self.snapshot.clone();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            let Ok(_permit) = gate.acquire().await else {
                return;
            };
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn sync(
        &self,
        local: Arc<dyn Replica>,
        remote: Arc<dyn Replica>,
        options: LiveSyncOptions,
    ) -> LiveSync {
        self.log.lock().unwrap().push("live");
        self.inner.sync(local, remote, options)
    }
}
