//! Bot record commands: register, re-queue, inspect.
//!
//! These are the "external actor" operations the sync subsystem reacts to.
//! They write the store directly; a running engine picks queued records up
//! through its sweep.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::bot::{BotSyncRecord, SyncStatus, compose_bot_key};
use crate::core::config::EngineConfig;
use crate::core::engine::open_store;
use crate::core::store::{BotStore, StoreError};
use crate::core::terminal::{print_status, print_success, print_warn};

/// Bot registration file: identity plus the configuration snapshots that
/// parameterize a knowledge-base build.
#[derive(Debug, Deserialize)]
struct BotFile {
    user_id: String,
    bot_id: String,
    #[serde(default = "empty_table")]
    knowledge: toml::Value,
    #[serde(default = "empty_table")]
    knowledge_base: toml::Value,
    #[serde(default = "empty_table")]
    guardrails: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(Default::default())
}

fn toml_to_json(value: &toml::Value) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

pub async fn run_add_bot(file: &Path, config: &EngineConfig) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading bot file {}", file.display()))?;
    let bot: BotFile =
        toml::from_str(&raw).with_context(|| format!("parsing bot file {}", file.display()))?;

    let record = BotSyncRecord::queued(
        &bot.user_id,
        &bot.bot_id,
        toml_to_json(&bot.knowledge)?,
        toml_to_json(&bot.knowledge_base)?,
        toml_to_json(&bot.guardrails)?,
    );

    let store = open_store(&config.data_dir)?;
    store.put(&record).await?;

    print_success(&format!(
        "Registered bot {} for user {} (sync queued).",
        bot.bot_id, bot.user_id
    ));
    Ok(())
}

pub async fn run_queue_sync(user: &str, bot: &str, config: &EngineConfig) -> Result<()> {
    let store = open_store(&config.data_dir)?;
    let sk = compose_bot_key(user, bot);
    match store
        .update_sync_status(user, &sk, SyncStatus::Queued, "", "")
        .await
    {
        Ok(()) => {
            print_success(&format!("Queued knowledge-base sync for bot {}.", bot));
            Ok(())
        }
        Err(StoreError::RecordNotFound { .. }) => {
            print_warn(&format!(
                "Bot {} is not registered for user {}. Run add-bot first.",
                bot, user
            ));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn run_status(user: &str, bot: &str, config: &EngineConfig) -> Result<()> {
    let store = open_store(&config.data_dir)?;
    let sk = compose_bot_key(user, bot);
    let Some(record) = store.get(user, &sk).await? else {
        print_warn(&format!("Bot {} is not registered for user {}.", bot, user));
        return Ok(());
    };

    print_status("Sync status", &record.sync_status);
    if !record.sync_status_reason.is_empty() {
        print_status("Reason", &record.sync_status_reason);
    }
    if !record.last_exec_id.is_empty() {
        print_status("Last execution", &record.last_exec_id);
    }
    if !record.knowledge_base_id.is_empty() {
        print_status("Knowledge base", &record.knowledge_base_id);
        print_status("Data sources", &record.data_source_ids.join(", "));
    }
    if !record.guardrail_arn.is_empty() {
        print_status(
            "Guardrail",
            &format!("{} (v{})", record.guardrail_arn, record.guardrail_version),
        );
    }
    Ok(())
}
