//! Scripted test doubles for the external service seams.
//!
//! Used by unit tests and the crate-level end-to-end tests; kept in the
//! library so both can share one implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::builder::{BuildCompletion, BuildError, BuildRequest, BuildService};
use crate::core::ingestion::{IngestionClient, IngestionJob, JOB_STATUS_FAILED};
use crate::core::outputs::{StackOutputEntry, StackOutputsClient};

/// Build service with a fixed scripted outcome. Requests are captured for
/// assertions.
pub struct FakeBuildService {
    outcome: Mutex<BuildOutcome>,
    pub requests: Mutex<Vec<BuildRequest>>,
}

#[derive(Clone)]
pub enum BuildOutcome {
    Succeed { build_arn: String },
    Fail { cause: String },
}

impl FakeBuildService {
    pub fn succeeding(build_arn: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(BuildOutcome::Succeed {
                build_arn: build_arn.to_string(),
            }),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(cause: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(BuildOutcome::Fail {
                cause: cause.to_string(),
            }),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn run_build(&self, request: &BuildRequest) -> Result<BuildCompletion, BuildError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.outcome.lock().unwrap().clone() {
            BuildOutcome::Succeed { build_arn } => Ok(BuildCompletion { build_arn }),
            BuildOutcome::Fail { cause } => Err(BuildError::Failed { cause }),
        }
    }
}

/// Stack outputs client returning a fixed output list for every stack.
pub struct FakeStackOutputs {
    pub outputs: Mutex<Vec<StackOutputEntry>>,
    pub described: Mutex<Vec<String>>,
}

impl FakeStackOutputs {
    pub fn new(entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(
                entries
                    .iter()
                    .map(|(key, value)| StackOutputEntry {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
            ),
            described: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl StackOutputsClient for FakeStackOutputs {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> anyhow::Result<Vec<StackOutputEntry>> {
        self.described.lock().unwrap().push(stack_name.to_string());
        Ok(self.outputs.lock().unwrap().clone())
    }
}

/// Ingestion client whose job statuses follow a per-data-source script: each
/// poll consumes the next status, and the last entry repeats. Data sources
/// without a script complete on the first poll.
pub struct FakeIngestionClient {
    scripts: HashMap<String, Vec<&'static str>>,
    pub started: Mutex<Vec<String>>,
    pub polls: Mutex<HashMap<String, usize>>,
}

impl FakeIngestionClient {
    pub fn completing() -> Arc<Self> {
        Arc::new(Self::scripted(&[]))
    }

    pub fn scripted(scripts: &[(&str, &[&'static str])]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(ds, statuses)| (ds.to_string(), statuses.to_vec()))
                .collect(),
            started: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
        }
    }

    fn status_for(&self, data_source_id: &str, poll: usize) -> &'static str {
        match self.scripts.get(data_source_id) {
            Some(script) if !script.is_empty() => script[poll.min(script.len() - 1)],
            _ => "COMPLETE",
        }
    }
}

#[async_trait]
impl IngestionClient for FakeIngestionClient {
    async fn start_ingestion_job(
        &self,
        _knowledge_base_id: &str,
        data_source_id: &str,
    ) -> anyhow::Result<IngestionJob> {
        self.started.lock().unwrap().push(data_source_id.to_string());
        Ok(IngestionJob {
            ingestion_job_id: format!("job-{}", data_source_id),
            status: "STARTING".to_string(),
            failure_reasons: Vec::new(),
        })
    }

    async fn get_ingestion_job(
        &self,
        _knowledge_base_id: &str,
        data_source_id: &str,
        job_id: &str,
    ) -> anyhow::Result<IngestionJob> {
        let mut polls = self.polls.lock().unwrap();
        let n = polls.entry(data_source_id.to_string()).or_insert(0);
        let status = self.status_for(data_source_id, *n);
        *n += 1;
        Ok(IngestionJob {
            ingestion_job_id: job_id.to_string(),
            status: status.to_string(),
            failure_reasons: if status == JOB_STATUS_FAILED {
                vec!["chunking error".to_string()]
            } else {
                Vec::new()
            },
        })
    }
}
