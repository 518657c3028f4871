//! Bot identity and the durable sync record.
//!
//! A bot is addressed by (owner user id, composite sort key). The composite
//! key embeds the owner so records for different users never collide:
//! `{user_id}#BOT#{bot_id}`.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Queued => "QUEUED",
            SyncStatus::Running => "RUNNING",
            SyncStatus::Succeeded => "SUCCEEDED",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "QUEUED" => Some(SyncStatus::Queued),
            "RUNNING" => Some(SyncStatus::Running),
            "SUCCEEDED" => Some(SyncStatus::Succeeded),
            "FAILED" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

pub fn compose_bot_key(user_id: &str, bot_id: &str) -> String {
    format!("{}#BOT#{}", user_id, bot_id)
}

/// Recover the bot id from a composite sort key. The bot id is the segment
/// after the final `#`; external actors may prepend additional scoping
/// segments, so only the tail is significant.
pub fn decompose_bot_key(sk: &str) -> Result<String> {
    let bot_id = sk.rsplit('#').next().unwrap_or_default();
    if bot_id.is_empty() || bot_id == sk {
        bail!("malformed bot key: {}", sk);
    }
    Ok(bot_id.to_string())
}

/// Durable record for one bot's knowledge-base synchronization. `sync_status`
/// is stored as the raw string so externally written variants (for example
/// `QUEUED_RETRY`) survive a round trip; this subsystem only ever writes the
/// four canonical [`SyncStatus`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSyncRecord {
    pub pk: String,
    pub sk: String,
    pub sync_status: String,
    pub sync_status_reason: String,
    pub last_exec_id: String,
    pub knowledge_base_id: String,
    pub data_source_ids: Vec<String>,
    pub guardrail_arn: String,
    pub guardrail_version: String,
    /// Serialized knowledge configuration (source URLs, chunking options).
    pub knowledge: serde_json::Value,
    /// Serialized knowledge-base configuration (embeddings model, analyzer).
    pub knowledge_base_params: serde_json::Value,
    /// Serialized guardrail thresholds.
    pub guardrails_params: serde_json::Value,
}

impl BotSyncRecord {
    /// A freshly registered record, queued for its first sync.
    pub fn queued(
        user_id: &str,
        bot_id: &str,
        knowledge: serde_json::Value,
        knowledge_base_params: serde_json::Value,
        guardrails_params: serde_json::Value,
    ) -> Self {
        Self {
            pk: user_id.to_string(),
            sk: compose_bot_key(user_id, bot_id),
            sync_status: SyncStatus::Queued.as_str().to_string(),
            sync_status_reason: String::new(),
            last_exec_id: String::new(),
            knowledge_base_id: String::new(),
            data_source_ids: Vec::new(),
            guardrail_arn: String::new(),
            guardrail_version: String::new(),
            knowledge,
            knowledge_base_params,
            guardrails_params,
        }
    }

    pub fn bot_id(&self) -> Result<String> {
        decompose_bot_key(&self.sk)
    }
}
