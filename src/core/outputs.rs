//! Output fetcher: resolves a completed build's declared infrastructure
//! outputs into a [`StackOutputSet`].
//!
//! The per-bot deployment is addressed by a deterministic stack name derived
//! from the bot id. Exactly one knowledge-base id is required; data source
//! ids are matched by key prefix in describe order (fan-out order only, not
//! a stability contract); guardrail outputs are optional.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::bot::decompose_bot_key;

const KNOWLEDGE_BASE_ID_KEY: &str = "KnowledgeBaseId";
const DATA_SOURCE_KEY_PREFIX: &str = "DataSource";
const GUARDRAIL_ARN_KEY: &str = "GuardrailArn";
const GUARDRAIL_VERSION_KEY: &str = "GuardrailVersion";

pub fn stack_name_for_bot(bot_id: &str) -> String {
    format!("InsightKbStack{}", bot_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutputEntry {
    #[serde(rename = "OutputKey")]
    pub key: String,
    #[serde(rename = "OutputValue")]
    pub value: String,
}

/// Resolved outputs of one completed build. Produced once per run, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutputSet {
    pub knowledge_base_id: String,
    pub data_source_ids: Vec<String>,
    pub guardrail_arn: String,
    pub guardrail_version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("required stack outputs missing for {stack_name}")]
    MissingOutput { stack_name: String },
    #[error("malformed bot key: {0}")]
    BadKey(String),
    #[error("stack outputs client error: {0}")]
    Client(#[from] anyhow::Error),
}

#[async_trait]
pub trait StackOutputsClient: Send + Sync {
    async fn describe_stack(&self, stack_name: &str)
    -> anyhow::Result<Vec<StackOutputEntry>>;
}

/// Resolve the build outputs for the bot identified by `sk`. Missing
/// knowledge-base id or an empty data-source list is a hard failure, routed
/// to the workflow's failure edge and never retried.
pub async fn fetch_outputs(
    client: &dyn StackOutputsClient,
    sk: &str,
) -> Result<StackOutputSet, OutputError> {
    let bot_id = decompose_bot_key(sk).map_err(|_| OutputError::BadKey(sk.to_string()))?;
    let stack_name = stack_name_for_bot(&bot_id);

    info!(%bot_id, %stack_name, "fetching stack outputs");
    let outputs = client.describe_stack(&stack_name).await?;

    let find = |key: &str| {
        outputs
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.clone())
    };

    let knowledge_base_id = find(KNOWLEDGE_BASE_ID_KEY).unwrap_or_default();
    let data_source_ids: Vec<String> = outputs
        .iter()
        .filter(|o| o.key.starts_with(DATA_SOURCE_KEY_PREFIX))
        .map(|o| o.value.clone())
        .collect();

    if knowledge_base_id.is_empty() || data_source_ids.is_empty() {
        return Err(OutputError::MissingOutput { stack_name });
    }

    Ok(StackOutputSet {
        knowledge_base_id,
        data_source_ids,
        guardrail_arn: find(GUARDRAIL_ARN_KEY).unwrap_or_default(),
        guardrail_version: find(GUARDRAIL_VERSION_KEY).unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct DescribeStackResponse {
    outputs: Vec<StackOutputEntry>,
}

/// HTTP adapter over the deployment service's describe endpoint:
/// GET `/stacks/{name}` returning `{"outputs": [{"OutputKey", "OutputValue"}]}`.
pub struct HttpStackOutputsClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpStackOutputsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StackOutputsClient for HttpStackOutputsClient {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> anyhow::Result<Vec<StackOutputEntry>> {
        let response: DescribeStackResponse = self
            .http
            .get(format!("{}/stacks/{}", self.base_url, stack_name))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticOutputs(Vec<StackOutputEntry>);

    #[async_trait]
    impl StackOutputsClient for StaticOutputs {
        async fn describe_stack(
            &self,
            _stack_name: &str,
        ) -> anyhow::Result<Vec<StackOutputEntry>> {
            Ok(self.0.clone())
        }
    }

    fn entry(key: &str, value: &str) -> StackOutputEntry {
        StackOutputEntry {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn stack_name_is_deterministic_per_bot() {
        assert_eq!(stack_name_for_bot("abc123"), "InsightKbStackabc123");
    }

    #[tokio::test]
    async fn resolves_outputs_with_guardrails() {
        let client = StaticOutputs(vec![
            entry("KnowledgeBaseId", "kb1"),
            entry("DataSource0", "ds1"),
            entry("DataSource1", "ds2"),
            entry("GuardrailArn", "arn:guardrail:1"),
            entry("GuardrailVersion", "2"),
            entry("BotId", "b1"),
        ]);
        let outputs = fetch_outputs(&client, "u1#BOT#b1").await.unwrap();
        assert_eq!(outputs.knowledge_base_id, "kb1");
        assert_eq!(outputs.data_source_ids, vec!["ds1", "ds2"]);
        assert_eq!(outputs.guardrail_arn, "arn:guardrail:1");
        assert_eq!(outputs.guardrail_version, "2");
    }

    #[tokio::test]
    async fn guardrail_outputs_default_to_empty() {
        let client = StaticOutputs(vec![
            entry("KnowledgeBaseId", "kb1"),
            entry("DataSource0", "ds1"),
        ]);
        let outputs = fetch_outputs(&client, "u1#BOT#b1").await.unwrap();
        assert_eq!(outputs.guardrail_arn, "");
        assert_eq!(outputs.guardrail_version, "");
    }

    #[tokio::test]
    async fn missing_data_sources_is_a_hard_failure() {
        let client = StaticOutputs(vec![entry("KnowledgeBaseId", "kb1")]);
        let err = fetch_outputs(&client, "u1#BOT#b1").await.unwrap_err();
        assert!(matches!(err, OutputError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn missing_knowledge_base_id_is_a_hard_failure() {
        let client = StaticOutputs(vec![entry("DataSource0", "ds1")]);
        let err = fetch_outputs(&client, "u1#BOT#b1").await.unwrap_err();
        assert!(matches!(err, OutputError::MissingOutput { .. }));
    }
}
