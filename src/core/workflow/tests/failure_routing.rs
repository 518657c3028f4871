use serde_json::json;

use crate::core::store::BotStore;
use crate::core::testkit::{FakeBuildService, FakeIngestionClient, FakeStackOutputs};
use crate::core::workflow::{SyncState, run_sync};

use super::{deps_with, queued_change, seeded_store};

fn build_cause() -> String {
    json!({
        "Build": {
            "Arn": "arn:build:9",
            "Environment": {
                "EnvironmentVariables": [
                    {"Name": "PK", "Value": "u1"},
                    {"Name": "SK", "Value": "u1#BOT#b1"}
                ]
            }
        }
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn build_failure_is_recorded_with_cause_and_arn() {
    let (store, record) = seeded_store().await;
    let builder = FakeBuildService::failing(&build_cause());
    let outputs = FakeStackOutputs::new(&[("KnowledgeBaseId", "kb1"), ("DataSource0", "ds1")]);
    let deps = deps_with(
        store.clone(),
        builder,
        outputs.clone(),
        FakeIngestionClient::completing(),
    );

    let terminal = run_sync(deps, queued_change(&record)).await;
    assert_eq!(terminal, SyncState::Failed);

    let stored = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
    assert_eq!(stored.sync_status, "FAILED");
    assert_eq!(stored.sync_status_reason, build_cause());
    assert_eq!(stored.last_exec_id, "arn:build:9");
    // the workflow stopped at the build step
    assert!(outputs.described.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_outputs_mark_the_record_failed() {
    let (store, record) = seeded_store().await;
    let builder = FakeBuildService::succeeding("arn:build:1");
    // knowledge base present, zero data sources
    let outputs = FakeStackOutputs::new(&[("KnowledgeBaseId", "kb1")]);
    let ingestion = FakeIngestionClient::completing();
    let deps = deps_with(store.clone(), builder, outputs, ingestion.clone());

    let terminal = run_sync(deps, queued_change(&record)).await;
    assert_eq!(terminal, SyncState::Failed);

    let stored = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
    assert_eq!(stored.sync_status, "FAILED");
    assert!(stored.sync_status_reason.contains("required stack outputs missing"));
    assert!(ingestion.started.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ingestion_failure_aborts_the_fan_out() {
    let (store, record) = seeded_store().await;
    let builder = FakeBuildService::succeeding("arn:build:1");
    let outputs = FakeStackOutputs::new(&[
        ("KnowledgeBaseId", "kb1"),
        ("DataSource0", "ds1"),
        ("DataSource1", "ds2"),
        ("DataSource2", "ds3"),
    ]);
    let ingestion = std::sync::Arc::new(FakeIngestionClient::scripted(&[
        ("ds1", &["COMPLETE"]),
        ("ds2", &["IN_PROGRESS", "FAILED"]),
        ("ds3", &["COMPLETE"]),
    ]));
    let deps = deps_with(store.clone(), builder, outputs, ingestion.clone());

    let terminal = run_sync(deps, queued_change(&record)).await;
    assert_eq!(terminal, SyncState::Failed);

    let stored = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
    assert_eq!(stored.sync_status, "FAILED");
    assert_eq!(stored.last_exec_id, "job-ds2");
    assert!(stored.sync_status_reason.contains("chunking error"));
    // the knowledge base ids were persisted before ingestion started
    assert_eq!(stored.knowledge_base_id, "kb1");
    // the third source was never attempted
    assert_eq!(*ingestion.started.lock().unwrap(), vec!["ds1", "ds2"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_event_aborts_without_a_status_write() {
    let (store, record) = seeded_store().await;
    let mut broken = record.clone();
    broken.sk = "not-a-bot-key".to_string();
    let deps = deps_with(
        store.clone(),
        FakeBuildService::succeeding("arn:build:1"),
        FakeStackOutputs::new(&[("KnowledgeBaseId", "kb1"), ("DataSource0", "ds1")]),
        FakeIngestionClient::completing(),
    );

    let terminal = run_sync(deps, queued_change(&broken)).await;
    assert_eq!(terminal, SyncState::Failed);

    // the real record was never touched
    let stored = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
    assert_eq!(stored.sync_status, "QUEUED");
}
