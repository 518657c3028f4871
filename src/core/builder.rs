//! Build trigger: runs the external knowledge-base deployment build.
//!
//! The build is parameterized by environment-variable style snapshots of the
//! bot's configuration taken from the triggering change image; the record is
//! not re-read mid-build. The workflow blocks on completion; a failed build
//! surfaces a structured JSON cause that re-identifies the bot (PK/SK pairs
//! in the build environment) and carries the build ARN. Build failures are
//! never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::core::retry::Backoff;
use crate::core::stream::ChangeRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub pk: String,
    pub sk: String,
    pub document_bucket: String,
    pub knowledge: serde_json::Value,
    pub knowledge_base: serde_json::Value,
    pub guardrails: serde_json::Value,
    pub use_standby_replicas: bool,
}

impl BuildRequest {
    /// Snapshot the triggering change image into build parameters.
    pub fn from_change(
        record: &ChangeRecord,
        document_bucket: &str,
        use_standby_replicas: bool,
    ) -> Self {
        let image = &record.dynamodb.new_image;
        Self {
            pk: image.pk.value.clone(),
            sk: image.sk.value.clone(),
            document_bucket: document_bucket.to_string(),
            knowledge: image.knowledge.value.clone(),
            knowledge_base: image.knowledge_base.value.clone(),
            guardrails: image.guardrails_params.value.clone(),
            use_standby_replicas,
        }
    }

    /// The request as `Name`/`Value` environment pairs, the shape the build
    /// runner consumes and the shape failure causes echo back.
    pub fn environment(&self) -> Vec<EnvVar> {
        let json_string = |v: &serde_json::Value| {
            serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string())
        };
        vec![
            EnvVar::new("PK", &self.pk),
            EnvVar::new("SK", &self.sk),
            EnvVar::new("DOCUMENT_BUCKET", &self.document_bucket),
            EnvVar::new("KNOWLEDGE", &json_string(&self.knowledge)),
            EnvVar::new("BEDROCK_KNOWLEDGE_BASE", &json_string(&self.knowledge_base)),
            EnvVar::new("BEDROCK_GUARDRAILS", &json_string(&self.guardrails)),
            EnvVar::new("USE_STANDBY_REPLICAS", &self.use_standby_replicas.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl EnvVar {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildCompletion {
    pub build_arn: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The build ran and failed; `cause` is the serialized structured cause.
    #[error("build failed: {cause}")]
    Failed { cause: String },
    #[error("build service error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Starts the external build and blocks until it reaches a terminal state.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn run_build(&self, request: &BuildRequest) -> Result<BuildCompletion, BuildError>;
}

/// Compose the cause blob for a failed build from its environment and ARN,
/// mirroring what the build runner reports.
pub fn build_failure_cause(build_arn: &str, environment: &[EnvVar]) -> String {
    json!({
        "Build": {
            "Arn": build_arn,
            "Environment": {"EnvironmentVariables": environment}
        }
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
struct StartBuildResponse {
    id: String,
    #[serde(default)]
    arn: String,
}

#[derive(Debug, Deserialize)]
struct BuildStatusResponse {
    status: String,
    #[serde(default)]
    arn: String,
    #[serde(default)]
    cause: Option<serde_json::Value>,
}

/// HTTP adapter for the deployment build runner: POST `/builds` to start,
/// then poll GET `/builds/{id}` until `SUCCEEDED` or `FAILED`.
pub struct HttpBuildService {
    http: reqwest::Client,
    base_url: String,
    poll: Backoff,
}

impl HttpBuildService {
    pub fn new(base_url: &str, poll: Backoff) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll,
        }
    }
}

#[async_trait]
impl BuildService for HttpBuildService {
    async fn run_build(&self, request: &BuildRequest) -> Result<BuildCompletion, BuildError> {
        let environment = request.environment();
        let started: StartBuildResponse = self
            .http
            .post(format!("{}/builds", self.base_url))
            .json(&json!({"environment": environment}))
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?
            .json()
            .await
            .map_err(anyhow::Error::from)?;

        info!(build_id = %started.id, bot_key = %request.sk, "build started");

        let mut attempt = 0;
        loop {
            let status: BuildStatusResponse = self
                .http
                .get(format!("{}/builds/{}", self.base_url, started.id))
                .send()
                .await
                .map_err(anyhow::Error::from)?
                .error_for_status()
                .map_err(anyhow::Error::from)?
                .json()
                .await
                .map_err(anyhow::Error::from)?;

            let arn = if status.arn.is_empty() {
                started.arn.clone()
            } else {
                status.arn.clone()
            };

            match status.status.as_str() {
                "SUCCEEDED" => return Ok(BuildCompletion { build_arn: arn }),
                "FAILED" => {
                    let cause = match status.cause {
                        Some(cause) => cause.to_string(),
                        None => build_failure_cause(&arn, &environment),
                    };
                    return Err(BuildError::Failed { cause });
                }
                _ => {
                    attempt += 1;
                    tokio::time::sleep(self.poll.delay(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bot::BotSyncRecord;
    use crate::core::updater::extract_from_cause;

    fn sample_request() -> BuildRequest {
        let record = BotSyncRecord::queued(
            "u1",
            "b1",
            json!({"source_urls": ["s3://docs/u1/b1/"]}),
            json!({"embeddings_model": "titan_v2"}),
            json!({}),
        );
        let change = ChangeRecord::from_record(&record, "MODIFY");
        BuildRequest::from_change(&change, "insight-docs", true)
    }

    #[test]
    fn snapshot_copies_image_fields() {
        let request = sample_request();
        assert_eq!(request.pk, "u1");
        assert_eq!(request.sk, "u1#BOT#b1");
        assert_eq!(request.document_bucket, "insight-docs");
        assert_eq!(request.knowledge["source_urls"][0], "s3://docs/u1/b1/");
        assert!(request.use_standby_replicas);
    }

    #[test]
    fn environment_serializes_config_as_json_strings() {
        let env = sample_request().environment();
        let knowledge = env.iter().find(|v| v.name == "KNOWLEDGE").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&knowledge.value).unwrap();
        assert_eq!(parsed["source_urls"][0], "s3://docs/u1/b1/");
        assert_eq!(
            env.iter().find(|v| v.name == "USE_STANDBY_REPLICAS").unwrap().value,
            "true"
        );
    }

    #[test]
    fn composed_cause_round_trips_through_extraction() {
        let cause = build_failure_cause("arn:build:9", &sample_request().environment());
        let fields = extract_from_cause(&cause).unwrap();
        assert_eq!(fields.pk, "u1");
        assert_eq!(fields.sk, "u1#BOT#b1");
        assert_eq!(fields.build_arn, "arn:build:9");
    }
}
