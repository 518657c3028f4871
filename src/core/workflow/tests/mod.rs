mod failure_routing;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::core::bot::BotSyncRecord;
use crate::core::builder::BuildService;
use crate::core::engine::SyncDeps;
use crate::core::ingestion::IngestionClient;
use crate::core::outputs::StackOutputsClient;
use crate::core::retry::Backoff;
use crate::core::store::{BotStore, SqliteBotStore};
use crate::core::stream::ChangeRecord;
use crate::core::updater::StatusUpdater;

pub(super) fn deps_with(
    store: Arc<SqliteBotStore>,
    builder: Arc<dyn BuildService>,
    outputs: Arc<dyn StackOutputsClient>,
    ingestion: Arc<dyn IngestionClient>,
) -> Arc<SyncDeps> {
    Arc::new(SyncDeps {
        store: store.clone(),
        updater: StatusUpdater::new(store),
        builder,
        outputs,
        ingestion,
        document_bucket: "insight-documents".to_string(),
        use_standby_replicas: false,
        poll: Backoff::Fixed(Duration::from_secs(3)),
    })
}

pub(super) async fn seeded_store() -> (Arc<SqliteBotStore>, BotSyncRecord) {
    let store = Arc::new(SqliteBotStore::open_in_memory().unwrap());
    let record = BotSyncRecord::queued(
        "u1",
        "b1",
        json!({"source_urls": ["s3://docs/u1/b1/"]}),
        json!({"embeddings_model": "titan_v2"}),
        json!({"is_guardrail_enabled": true}),
    );
    store.put(&record).await.unwrap();
    (store, record)
}

pub(super) fn queued_change(record: &BotSyncRecord) -> ChangeRecord {
    ChangeRecord::from_record(record, "MODIFY")
}
