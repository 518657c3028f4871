//! Engine wiring: dependency context and the serve loop.
//!
//! Every component receives its clients through [`SyncDeps`]; there are no
//! ambient singletons. The engine subscribes to the store's change feed,
//! runs the notifier, and sweeps for queued records written by other
//! processes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::builder::{BuildService, HttpBuildService};
use crate::core::config::EngineConfig;
use crate::core::feed::ChangeNotifier;
use crate::core::ingestion::{HttpIngestionClient, IngestionClient};
use crate::core::outputs::{HttpStackOutputsClient, StackOutputsClient};
use crate::core::retry::Backoff;
use crate::core::store::{BotStore, SqliteBotStore};
use crate::core::updater::StatusUpdater;
use crate::core::workflow::run_sync;
use crate::platform::{NativePlatform, Platform};

/// Shared dependencies for one engine instance, passed into every workflow
/// run.
pub struct SyncDeps {
    pub store: Arc<dyn BotStore>,
    pub updater: StatusUpdater,
    pub builder: Arc<dyn BuildService>,
    pub outputs: Arc<dyn StackOutputsClient>,
    pub ingestion: Arc<dyn IngestionClient>,
    pub document_bucket: String,
    pub use_standby_replicas: bool,
    pub poll: Backoff,
}

pub struct SyncEngine {
    store: Arc<SqliteBotStore>,
    deps: Arc<SyncDeps>,
    sweep_interval: Duration,
}

impl SyncEngine {
    /// Wire the engine from configuration: SQLite store in the data dir plus
    /// HTTP adapters for the three external services.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        if !config.data_dir.exists() {
            std::fs::create_dir_all(&config.data_dir)?;
        }
        NativePlatform::restrict_dir_permissions(&config.data_dir);

        let db_path = config.db_path();
        let store = Arc::new(SqliteBotStore::open(&db_path)?);
        NativePlatform::restrict_file_permissions(&db_path);

        let deps = SyncDeps {
            store: store.clone(),
            updater: StatusUpdater::with_policy(store.clone(), config.status_retry_policy()),
            builder: Arc::new(HttpBuildService::new(
                &config.build_endpoint,
                config.poll_backoff(),
            )),
            outputs: Arc::new(HttpStackOutputsClient::new(&config.deploy_endpoint)),
            ingestion: Arc::new(HttpIngestionClient::new(&config.ingestion_endpoint)),
            document_bucket: config.document_bucket.clone(),
            use_standby_replicas: config.use_standby_replicas,
            poll: config.poll_backoff(),
        };

        Ok(Self::new(store, Arc::new(deps), config.sweep_interval()))
    }

    pub fn new(store: Arc<SqliteBotStore>, deps: Arc<SyncDeps>, sweep_interval: Duration) -> Self {
        Self {
            store,
            deps,
            sweep_interval,
        }
    }

    pub fn store(&self) -> Arc<SqliteBotStore> {
        self.store.clone()
    }

    /// Run the notifier and queue sweep until the caller drops the future
    /// (the serve command races this against ctrl-c).
    pub async fn run(&self) -> Result<()> {
        let changes = self.store.subscribe().await;

        let deps = self.deps.clone();
        let notifier = ChangeNotifier::new(move |record| {
            tokio::spawn(run_sync(deps.clone(), record));
            Ok(())
        });

        info!("sync engine started");
        tokio::select! {
            _ = notifier.run(changes) => {}
            _ = self.sweep_loop() => {}
        }
        Ok(())
    }

    async fn sweep_loop(&self) {
        loop {
            match self.store.replay_queued().await {
                Ok(0) => {}
                Ok(n) => info!("queue sweep re-emitted {} queued record(s)", n),
                Err(e) => warn!("queue sweep failed: {}", e),
            }
            tokio::time::sleep(self.sweep_interval).await;
        }
    }
}

/// Open the store at a data directory the way the engine does, for CLI
/// commands that read or queue records without booting the engine.
pub fn open_store(data_dir: &Path) -> Result<SqliteBotStore> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)?;
    }
    let db_path = data_dir.join(crate::core::config::DB_FILE);
    let store = SqliteBotStore::open(&db_path)?;
    NativePlatform::restrict_file_permissions(&db_path);
    Ok(store)
}
