//! Change-feed wire types.
//!
//! Every committed write to the bot store surfaces as one [`ChangeRecord`],
//! shaped like a key-value stream event: attribute values are wrapped
//! (`{"S": ...}` for strings, `{"M": ...}` for maps) and field names are the
//! stored attribute names. Downstream consumers filter on the raw
//! `SyncStatus` string, so the wrappers are preserved rather than flattened.

use serde::{Deserialize, Serialize};

use crate::core::bot::BotSyncRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringAttr {
    #[serde(rename = "S")]
    pub value: String,
}

impl StringAttr {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapAttr {
    #[serde(rename = "M")]
    pub value: serde_json::Value,
}

impl MapAttr {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }
}

/// The record image after the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotImage {
    #[serde(rename = "PK")]
    pub pk: StringAttr,
    #[serde(rename = "SK")]
    pub sk: StringAttr,
    #[serde(rename = "SyncStatus")]
    pub sync_status: StringAttr,
    #[serde(rename = "Knowledge")]
    pub knowledge: MapAttr,
    #[serde(rename = "BedrockKnowledgeBase")]
    pub knowledge_base: MapAttr,
    #[serde(rename = "GuardrailsParams")]
    pub guardrails_params: MapAttr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamView {
    #[serde(rename = "NewImage")]
    pub new_image: BotImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub dynamodb: StreamView,
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(rename = "eventID")]
    pub event_id: String,
}

impl ChangeRecord {
    pub fn from_record(record: &BotSyncRecord, event_name: &str) -> Self {
        Self {
            dynamodb: StreamView {
                new_image: BotImage {
                    pk: StringAttr::new(&record.pk),
                    sk: StringAttr::new(&record.sk),
                    sync_status: StringAttr::new(&record.sync_status),
                    knowledge: MapAttr::new(record.knowledge.clone()),
                    knowledge_base: MapAttr::new(record.knowledge_base_params.clone()),
                    guardrails_params: MapAttr::new(record.guardrails_params.clone()),
                },
            },
            event_name: event_name.to_string(),
            event_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn pk(&self) -> &str {
        &self.dynamodb.new_image.pk.value
    }

    pub fn sk(&self) -> &str {
        &self.dynamodb.new_image.sk.value
    }
}
