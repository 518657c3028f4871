//! Ingestion driver: fans out ingestion jobs over a knowledge base's data
//! sources, one at a time.
//!
//! Concurrency is capped at one job to bound load on the ingestion service.
//! Each job is polled on the configured interval (3 seconds by default)
//! until it reaches a terminal state. A `FAILED` job aborts the whole
//! fan-out immediately without starting the remaining data sources. There is no
//! overall timeout beyond the host's run limit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::retry::Backoff;

pub const JOB_STATUS_COMPLETE: &str = "COMPLETE";
pub const JOB_STATUS_FAILED: &str = "FAILED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    #[serde(rename = "IngestionJobId")]
    pub ingestion_job_id: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "FailureReasons", default)]
    pub failure_reasons: Vec<String>,
}

impl IngestionJob {
    pub fn is_terminal(&self) -> bool {
        self.status == JOB_STATUS_COMPLETE || self.status == JOB_STATUS_FAILED
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("ingestion job {job_id} failed: {reasons:?}")]
    JobFailed {
        job_id: String,
        reasons: Vec<String>,
    },
    #[error("ingestion service error: {0}")]
    Client(#[from] anyhow::Error),
}

#[async_trait]
pub trait IngestionClient: Send + Sync {
    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> anyhow::Result<IngestionJob>;

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        job_id: &str,
    ) -> anyhow::Result<IngestionJob>;
}

/// Run every data source's ingestion job to completion, sequentially. On
/// failure the failing job is surfaced so its id becomes the record's
/// `last_exec_id` and its reasons the stored failure reason.
pub async fn run_ingestion(
    client: &dyn IngestionClient,
    poll: &Backoff,
    knowledge_base_id: &str,
    data_source_ids: &[String],
) -> Result<(), IngestionError> {
    for data_source_id in data_source_ids {
        let mut job = client
            .start_ingestion_job(knowledge_base_id, data_source_id)
            .await?;
        info!(
            knowledge_base_id,
            %data_source_id,
            job_id = %job.ingestion_job_id,
            "ingestion job started"
        );

        let mut attempt = 0;
        while !job.is_terminal() {
            attempt += 1;
            tokio::time::sleep(poll.delay(attempt)).await;
            job = client
                .get_ingestion_job(knowledge_base_id, data_source_id, &job.ingestion_job_id)
                .await?;
            debug!(job_id = %job.ingestion_job_id, status = %job.status, "polled ingestion job");
        }

        if job.status == JOB_STATUS_FAILED {
            return Err(IngestionError::JobFailed {
                job_id: job.ingestion_job_id,
                reasons: job.failure_reasons,
            });
        }
        info!(
            knowledge_base_id,
            %data_source_id,
            job_id = %job.ingestion_job_id,
            "ingestion job complete"
        );
    }
    Ok(())
}

/// HTTP adapter for the ingestion service:
/// POST `/knowledge-bases/{kb}/data-sources/{ds}/ingestion-jobs` to start,
/// GET `.../ingestion-jobs/{id}` to poll. Both return an ingestion job body.
pub struct HttpIngestionClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIngestionClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn jobs_url(&self, knowledge_base_id: &str, data_source_id: &str) -> String {
        format!(
            "{}/knowledge-bases/{}/data-sources/{}/ingestion-jobs",
            self.base_url, knowledge_base_id, data_source_id
        )
    }
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> anyhow::Result<IngestionJob> {
        let job = self
            .http
            .post(self.jobs_url(knowledge_base_id, data_source_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(job)
    }

    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        job_id: &str,
    ) -> anyhow::Result<IngestionJob> {
        let job = self
            .http
            .get(format!(
                "{}/{}",
                self.jobs_url(knowledge_base_id, data_source_id),
                job_id
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(job)
    }
}
