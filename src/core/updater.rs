//! Status updater: the single funnel for durable sync-status writes.
//!
//! Wraps the store's conditional write in a bounded retry (4 attempts, fixed
//! 2-second spacing) and resolves the three update payload shapes (direct,
//! build failure cause, ingestion job failure) to one write each.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::bot::SyncStatus;
use crate::core::retry::RetryPolicy;
use crate::core::store::BotStore;

pub const STATUS_RETRY_ATTEMPTS: u32 = 4;
pub const STATUS_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fields recovered from a build failure cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CauseFields {
    pub pk: String,
    pub sk: String,
    pub build_arn: String,
}

/// Extract PK, SK and the build ARN from a serialized build failure cause.
/// The cause carries the build's environment as `Name`/`Value` pairs under
/// `Build.Environment.EnvironmentVariables`; `Build.Arn` defaults to empty.
pub fn extract_from_cause(cause: &str) -> Result<CauseFields> {
    let cause: serde_json::Value =
        serde_json::from_str(cause).context("build failure cause is not valid JSON")?;
    let env = cause["Build"]["Environment"]["EnvironmentVariables"]
        .as_array()
        .context("cause is missing Build.Environment.EnvironmentVariables")?;

    let lookup = |name: &str| {
        env.iter()
            .find(|var| var["Name"] == name)
            .and_then(|var| var["Value"].as_str())
            .map(str::to_string)
    };

    let (Some(pk), Some(sk)) = (lookup("PK"), lookup("SK")) else {
        bail!("PK or SK not found in cause");
    };
    let build_arn = cause["Build"]["Arn"].as_str().unwrap_or_default().to_string();

    Ok(CauseFields { pk, sk, build_arn })
}

/// The three mutually exclusive status-update request shapes. Build and
/// ingestion failures are matched before the direct shape so a payload that
/// carries a cause is never misread as a direct update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusUpdatePayload {
    BuildFailure {
        cause: String,
    },
    IngestionFailure {
        ingestion_job: IngestionJobEnvelope,
        pk: String,
        sk: String,
    },
    Direct {
        pk: String,
        sk: String,
        sync_status: SyncStatus,
        #[serde(default)]
        sync_status_reason: String,
        #[serde(default)]
        last_exec_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJobEnvelope {
    #[serde(rename = "IngestionJob")]
    pub ingestion_job: IngestionJobFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJobFailure {
    #[serde(rename = "FailureReasons", default)]
    pub failure_reasons: Vec<String>,
    #[serde(rename = "IngestionJobId")]
    pub ingestion_job_id: String,
}

#[derive(Clone)]
pub struct StatusUpdater {
    store: Arc<dyn BotStore>,
    policy: RetryPolicy,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn BotStore>) -> Self {
        Self::with_policy(
            store,
            RetryPolicy::fixed(STATUS_RETRY_ATTEMPTS, STATUS_RETRY_DELAY),
        )
    }

    pub fn with_policy(store: Arc<dyn BotStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Idempotent conditional status write with bounded retry. After the
    /// retry budget is exhausted the last store error propagates to the
    /// caller, which must treat it as a fatal step failure.
    pub async fn update(
        &self,
        pk: &str,
        sk: &str,
        status: SyncStatus,
        reason: &str,
        last_exec_id: &str,
    ) -> Result<()> {
        info!(
            user_id = pk,
            bot_key = sk,
            sync_status = status.as_str(),
            last_exec_id,
            "updating sync status"
        );
        self.policy
            .run(|| self.store.update_sync_status(pk, sk, status, reason, last_exec_id))
            .await
            .context("sync status update failed after retries")
    }

    /// Resolve one payload to one status write.
    pub async fn apply(&self, payload: StatusUpdatePayload) -> Result<()> {
        match payload {
            StatusUpdatePayload::BuildFailure { cause } => {
                let fields = extract_from_cause(&cause)?;
                self.update(
                    &fields.pk,
                    &fields.sk,
                    SyncStatus::Failed,
                    &cause,
                    &fields.build_arn,
                )
                .await
            }
            StatusUpdatePayload::IngestionFailure {
                ingestion_job,
                pk,
                sk,
            } => {
                let job = ingestion_job.ingestion_job;
                self.update(
                    &pk,
                    &sk,
                    SyncStatus::Failed,
                    &format!("{:?}", job.failure_reasons),
                    &job.ingestion_job_id,
                )
                .await
            }
            StatusUpdatePayload::Direct {
                pk,
                sk,
                sync_status,
                sync_status_reason,
                last_exec_id,
            } => {
                self.update(&pk, &sk, sync_status, &sync_status_reason, &last_exec_id)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bot::BotSyncRecord;
    use crate::core::store::{SqliteBotStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cause_json() -> String {
        json!({
            "Build": {
                "Arn": "arn:build:1",
                "Environment": {
                    "EnvironmentVariables": [
                        {"Name": "PK", "Value": "user1", "Type": "PLAINTEXT"},
                        {"Name": "SK", "Value": "BOT#abc", "Type": "PLAINTEXT"},
                        {"Name": "DOCUMENT_BUCKET", "Value": "docs", "Type": "PLAINTEXT"}
                    ]
                }
            }
        })
        .to_string()
    }

    #[test]
    fn extracts_keys_and_arn_from_cause() {
        let fields = extract_from_cause(&cause_json()).unwrap();
        assert_eq!(fields.pk, "user1");
        assert_eq!(fields.sk, "BOT#abc");
        assert_eq!(fields.build_arn, "arn:build:1");
    }

    #[test]
    fn cause_without_keys_is_an_error() {
        let cause = json!({
            "Build": {"Environment": {"EnvironmentVariables": [{"Name": "PK", "Value": "u"}]}}
        })
        .to_string();
        assert!(extract_from_cause(&cause).is_err());
        assert!(extract_from_cause("not json").is_err());
    }

    #[test]
    fn payload_shapes_deserialize_distinctly() {
        let build: StatusUpdatePayload =
            serde_json::from_value(json!({"cause": "{}"})).unwrap();
        assert!(matches!(build, StatusUpdatePayload::BuildFailure { .. }));

        let ingestion: StatusUpdatePayload = serde_json::from_value(json!({
            "pk": "u1",
            "sk": "u1#BOT#b1",
            "ingestion_job": {
                "IngestionJob": {"FailureReasons": ["boom"], "IngestionJobId": "job-1"}
            }
        }))
        .unwrap();
        assert!(matches!(ingestion, StatusUpdatePayload::IngestionFailure { .. }));

        let direct: StatusUpdatePayload = serde_json::from_value(json!({
            "pk": "u1", "sk": "u1#BOT#b1", "sync_status": "RUNNING"
        }))
        .unwrap();
        assert!(matches!(direct, StatusUpdatePayload::Direct { .. }));
    }

    #[tokio::test]
    async fn update_twice_is_idempotent() {
        let store = Arc::new(SqliteBotStore::open_in_memory().unwrap());
        store
            .put(&BotSyncRecord::queued("u1", "b1", json!({}), json!({}), json!({})))
            .await
            .unwrap();
        let updater = StatusUpdater::new(store.clone());
        for _ in 0..2 {
            updater
                .update("u1", "u1#BOT#b1", SyncStatus::Succeeded, "done", "exec-1")
                .await
                .unwrap();
        }
        let record = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, "SUCCEEDED");
        assert_eq!(record.sync_status_reason, "done");
        assert_eq!(record.last_exec_id, "exec-1");
    }

    /// Store that fails a configured number of writes before succeeding.
    struct FlakyStore {
        inner: SqliteBotStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl BotStore for FlakyStore {
        async fn get(&self, pk: &str, sk: &str) -> Result<Option<BotSyncRecord>, StoreError> {
            self.inner.get(pk, sk).await
        }

        async fn put(&self, record: &BotSyncRecord) -> Result<(), StoreError> {
            self.inner.put(record).await
        }

        async fn update_sync_status(
            &self,
            pk: &str,
            sk: &str,
            status: SyncStatus,
            reason: &str,
            last_exec_id: &str,
        ) -> Result<(), StoreError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            self.inner
                .update_sync_status(pk, sk, status, reason, last_exec_id)
                .await
        }

        async fn update_knowledge_base(
            &self,
            pk: &str,
            sk: &str,
            kb: &str,
            ds: &[String],
        ) -> Result<(), StoreError> {
            self.inner.update_knowledge_base(pk, sk, kb, ds).await
        }

        async fn update_guardrail(
            &self,
            pk: &str,
            sk: &str,
            arn: &str,
            version: &str,
        ) -> Result<(), StoreError> {
            self.inner.update_guardrail(pk, sk, arn, version).await
        }

        async fn list_queued(&self) -> Result<Vec<BotSyncRecord>, StoreError> {
            self.inner.list_queued().await
        }

        async fn delete(&self, pk: &str, sk: &str) -> Result<bool, StoreError> {
            self.inner.delete(pk, sk).await
        }
    }

    async fn flaky_store(failures: u32) -> Arc<FlakyStore> {
        let inner = SqliteBotStore::open_in_memory().unwrap();
        inner
            .put(&BotSyncRecord::queued("u1", "b1", json!({}), json!({}), json!({})))
            .await
            .unwrap();
        Arc::new(FlakyStore {
            inner,
            failures: AtomicU32::new(failures),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_fewer_than_four_transient_failures() {
        let store = flaky_store(3).await;
        let updater = StatusUpdater::new(store.clone());
        updater
            .update("u1", "u1#BOT#b1", SyncStatus::Running, "", "")
            .await
            .unwrap();
        let record = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, "RUNNING");
    }

    #[tokio::test(start_paused = true)]
    async fn four_failures_exhaust_the_retry_budget() {
        let store = flaky_store(4).await;
        let updater = StatusUpdater::new(store.clone());
        let result = updater
            .update("u1", "u1#BOT#b1", SyncStatus::Running, "", "")
            .await;
        assert!(result.is_err());
        let record = store.get("u1", "u1#BOT#b1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, "QUEUED");
    }

    #[tokio::test]
    async fn build_failure_payload_marks_record_failed() {
        let store = Arc::new(SqliteBotStore::open_in_memory().unwrap());
        let mut record = BotSyncRecord::queued("user1", "abc", json!({}), json!({}), json!({}));
        record.sk = "BOT#abc".to_string();
        store.put(&record).await.unwrap();

        let updater = StatusUpdater::new(store.clone());
        updater
            .apply(StatusUpdatePayload::BuildFailure {
                cause: cause_json(),
            })
            .await
            .unwrap();

        let record = store.get("user1", "BOT#abc").await.unwrap().unwrap();
        assert_eq!(record.sync_status, "FAILED");
        assert_eq!(record.last_exec_id, "arn:build:1");
        assert!(record.sync_status_reason.contains("EnvironmentVariables"));
    }
}
