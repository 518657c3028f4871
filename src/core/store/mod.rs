//! Durable bot store backed by SQLite, with a change feed.
//!
//! One `bot_records` table keyed (pk, sk). List and map fields are stored as
//! JSON text. Every committed write emits a [`ChangeRecord`] into the feed
//! channel obtained via [`SqliteBotStore::subscribe`]; the notifier applies
//! its trigger predicate downstream, so the store emits unconditionally.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::core::bot::{BotSyncRecord, SyncStatus};
use crate::core::stream::ChangeRecord;

/// Feed capacity; a full channel drops the newest change. A dropped change
/// is recovered by the engine's queue sweep or an external re-queue.
const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("bot record not found: pk={pk} sk={sk}")]
    RecordNotFound { pk: String, sk: String },
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable status store for bot sync records. All writes are pure overwrites;
/// calling any method twice with the same arguments leaves the same state.
#[async_trait]
pub trait BotStore: Send + Sync {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<BotSyncRecord>, StoreError>;

    /// Create or replace a full record.
    async fn put(&self, record: &BotSyncRecord) -> Result<(), StoreError>;

    /// Conditional single-row status write. Fails with
    /// [`StoreError::RecordNotFound`] when the key is absent; never creates.
    async fn update_sync_status(
        &self,
        pk: &str,
        sk: &str,
        status: SyncStatus,
        reason: &str,
        last_exec_id: &str,
    ) -> Result<(), StoreError>;

    async fn update_knowledge_base(
        &self,
        pk: &str,
        sk: &str,
        knowledge_base_id: &str,
        data_source_ids: &[String],
    ) -> Result<(), StoreError>;

    async fn update_guardrail(
        &self,
        pk: &str,
        sk: &str,
        guardrail_arn: &str,
        guardrail_version: &str,
    ) -> Result<(), StoreError>;

    /// Records whose raw status begins with `QUEUED`, in key order. Used by
    /// the engine's sweep to pick up writes made by other processes.
    async fn list_queued(&self) -> Result<Vec<BotSyncRecord>, StoreError>;

    async fn delete(&self, pk: &str, sk: &str) -> Result<bool, StoreError>;
}

pub struct SqliteBotStore {
    db: Arc<Mutex<Connection>>,
    changes: Mutex<Option<mpsc::Sender<ChangeRecord>>>,
}

impl SqliteBotStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let db = Connection::open(db_path)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS bot_records (
                pk TEXT NOT NULL,
                sk TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                sync_status_reason TEXT NOT NULL DEFAULT '',
                last_exec_id TEXT NOT NULL DEFAULT '',
                knowledge_base_id TEXT NOT NULL DEFAULT '',
                data_source_ids TEXT NOT NULL DEFAULT '[]',
                guardrail_arn TEXT NOT NULL DEFAULT '',
                guardrail_version TEXT NOT NULL DEFAULT '',
                knowledge TEXT NOT NULL DEFAULT '{}',
                knowledge_base_params TEXT NOT NULL DEFAULT '{}',
                guardrails_params TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (pk, sk)
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            changes: Mutex::new(None),
        })
    }

    /// Open the change feed. Only the most recent subscriber receives
    /// changes; the engine subscribes once at boot.
    pub async fn subscribe(&self) -> mpsc::Receiver<ChangeRecord> {
        let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        *self.changes.lock().await = Some(tx);
        rx
    }

    async fn emit_change(&self, pk: &str, sk: &str, event_name: &str) {
        let record = match self.get(pk, sk).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("change feed: failed to read new image: {}", e);
                return;
            }
        };
        self.emit_change_record(&record, event_name).await;
    }

    async fn emit_change_record(&self, record: &BotSyncRecord, event_name: &str) {
        let guard = self.changes.lock().await;
        if let Some(tx) = guard.as_ref()
            && tx.try_send(ChangeRecord::from_record(record, event_name)).is_err()
        {
            warn!(
                "change feed full, dropping change for pk={} sk={}",
                record.pk, record.sk
            );
        }
    }

    /// Re-emit change records for rows still in a queued status. The engine
    /// calls this at boot and on a periodic sweep so writes made by other
    /// processes, which the in-process feed cannot observe, still trigger.
    pub async fn replay_queued(&self) -> Result<usize, StoreError> {
        let queued = self.list_queued().await?;
        for record in &queued {
            self.emit_change_record(record, "MODIFY").await;
        }
        Ok(queued.len())
    }

    fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            pk: row.get(0)?,
            sk: row.get(1)?,
            sync_status: row.get(2)?,
            sync_status_reason: row.get(3)?,
            last_exec_id: row.get(4)?,
            knowledge_base_id: row.get(5)?,
            data_source_ids: row.get(6)?,
            guardrail_arn: row.get(7)?,
            guardrail_version: row.get(8)?,
            knowledge: row.get(9)?,
            knowledge_base_params: row.get(10)?,
            guardrails_params: row.get(11)?,
        })
    }

    // JSON columns are decoded outside the rusqlite closure so serde errors
    // surface as StoreError::Encoding rather than a column conversion panic.
    fn decode_row(raw: RawRow) -> Result<BotSyncRecord, StoreError> {
        Ok(BotSyncRecord {
            pk: raw.pk,
            sk: raw.sk,
            sync_status: raw.sync_status,
            sync_status_reason: raw.sync_status_reason,
            last_exec_id: raw.last_exec_id,
            knowledge_base_id: raw.knowledge_base_id,
            data_source_ids: serde_json::from_str(&raw.data_source_ids)?,
            guardrail_arn: raw.guardrail_arn,
            guardrail_version: raw.guardrail_version,
            knowledge: serde_json::from_str(&raw.knowledge)?,
            knowledge_base_params: serde_json::from_str(&raw.knowledge_base_params)?,
            guardrails_params: serde_json::from_str(&raw.guardrails_params)?,
        })
    }

    const SELECT_COLUMNS: &'static str = "pk, sk, sync_status, sync_status_reason, last_exec_id, \
         knowledge_base_id, data_source_ids, guardrail_arn, guardrail_version, \
         knowledge, knowledge_base_params, guardrails_params";
}

struct RawRow {
    pk: String,
    sk: String,
    sync_status: String,
    sync_status_reason: String,
    last_exec_id: String,
    knowledge_base_id: String,
    data_source_ids: String,
    guardrail_arn: String,
    guardrail_version: String,
    knowledge: String,
    knowledge_base_params: String,
    guardrails_params: String,
}

#[async_trait]
impl BotStore for SqliteBotStore {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<BotSyncRecord>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM bot_records WHERE pk = ?1 AND sk = ?2",
            Self::SELECT_COLUMNS
        );
        let raw = db
            .query_row(&sql, params![pk, sk], Self::row_to_raw)
            .optional()?;
        raw.map(Self::decode_row).transpose()
    }

    async fn put(&self, record: &BotSyncRecord) -> Result<(), StoreError> {
        {
            let db = self.db.lock().await;
            db.execute(
                "INSERT OR REPLACE INTO bot_records (
                    pk, sk, sync_status, sync_status_reason, last_exec_id,
                    knowledge_base_id, data_source_ids, guardrail_arn, guardrail_version,
                    knowledge, knowledge_base_params, guardrails_params, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, CURRENT_TIMESTAMP)",
                params![
                    record.pk,
                    record.sk,
                    record.sync_status,
                    record.sync_status_reason,
                    record.last_exec_id,
                    record.knowledge_base_id,
                    serde_json::to_string(&record.data_source_ids)?,
                    record.guardrail_arn,
                    record.guardrail_version,
                    serde_json::to_string(&record.knowledge)?,
                    serde_json::to_string(&record.knowledge_base_params)?,
                    serde_json::to_string(&record.guardrails_params)?,
                ],
            )?;
        }
        self.emit_change(&record.pk, &record.sk, "INSERT").await;
        Ok(())
    }

    async fn update_sync_status(
        &self,
        pk: &str,
        sk: &str,
        status: SyncStatus,
        reason: &str,
        last_exec_id: &str,
    ) -> Result<(), StoreError> {
        {
            let db = self.db.lock().await;
            let changed = db.execute(
                "UPDATE bot_records
                 SET sync_status = ?3, sync_status_reason = ?4, last_exec_id = ?5,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE pk = ?1 AND sk = ?2",
                params![pk, sk, status.as_str(), reason, last_exec_id],
            )?;
            if changed == 0 {
                return Err(StoreError::RecordNotFound {
                    pk: pk.to_string(),
                    sk: sk.to_string(),
                });
            }
        }
        self.emit_change(pk, sk, "MODIFY").await;
        Ok(())
    }

    async fn update_knowledge_base(
        &self,
        pk: &str,
        sk: &str,
        knowledge_base_id: &str,
        data_source_ids: &[String],
    ) -> Result<(), StoreError> {
        {
            let db = self.db.lock().await;
            let changed = db.execute(
                "UPDATE bot_records
                 SET knowledge_base_id = ?3, data_source_ids = ?4,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE pk = ?1 AND sk = ?2",
                params![
                    pk,
                    sk,
                    knowledge_base_id,
                    serde_json::to_string(data_source_ids)?
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::RecordNotFound {
                    pk: pk.to_string(),
                    sk: sk.to_string(),
                });
            }
        }
        self.emit_change(pk, sk, "MODIFY").await;
        Ok(())
    }

    async fn update_guardrail(
        &self,
        pk: &str,
        sk: &str,
        guardrail_arn: &str,
        guardrail_version: &str,
    ) -> Result<(), StoreError> {
        {
            let db = self.db.lock().await;
            let changed = db.execute(
                "UPDATE bot_records
                 SET guardrail_arn = ?3, guardrail_version = ?4,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE pk = ?1 AND sk = ?2",
                params![pk, sk, guardrail_arn, guardrail_version],
            )?;
            if changed == 0 {
                return Err(StoreError::RecordNotFound {
                    pk: pk.to_string(),
                    sk: sk.to_string(),
                });
            }
        }
        self.emit_change(pk, sk, "MODIFY").await;
        Ok(())
    }

    async fn list_queued(&self) -> Result<Vec<BotSyncRecord>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM bot_records WHERE sync_status LIKE 'QUEUED%' ORDER BY pk, sk",
            Self::SELECT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_raw)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::decode_row(row?)?);
        }
        Ok(out)
    }

    async fn delete(&self, pk: &str, sk: &str) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM bot_records WHERE pk = ?1 AND sk = ?2",
            params![pk, sk],
        )?;
        Ok(deleted > 0)
    }
}
