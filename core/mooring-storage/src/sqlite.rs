//! SQLite-backed local store.
//!
//! Uses a single connection behind a mutex. Every trait call runs its
//! statements on the blocking pool so the async runtime is never stalled by
//! disk I/O.

use crate::{LocalStore, StorageError, StorageResult, record_id_for};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mooring_types::{ActionId, ActionKind, ActionPatch, CachedRecord, PendingAction, Record, RecordId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cached_records (
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        data TEXT NOT NULL,
        cached_at INTEGER NOT NULL,
        expires_at INTEGER,
        PRIMARY KEY (collection, record_id)
    );

    CREATE TABLE IF NOT EXISTS pending_actions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        collection TEXT NOT NULL,
        payload TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        synced INTEGER NOT NULL DEFAULT 0,
        retry_count INTEGER NOT NULL DEFAULT 0,
        abandoned INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_pending_actions_order
        ON pending_actions (synced, enqueued_at, seq);
";

const ACTION_COLUMNS: &str =
    "seq, id, kind, collection, payload, enqueued_at, synced, retry_count, abandoned, last_error";

/// Local store persisted in a SQLite database file.
#[derive(Clone)]
pub struct SqliteLocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        debug!("Opened local store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get_cached(
        &self,
        collection: &str,
        id: &RecordId,
    ) -> StorageResult<Option<CachedRecord>> {
        let collection = collection.to_string();
        let id = id.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT collection, data, cached_at, expires_at FROM cached_records
                 WHERE collection = ?1 AND record_id = ?2",
                params![collection, id],
                raw_cached,
            )
            .optional()?
            .map(cached_from_raw)
            .transpose()
        })
        .await
    }

    async fn list_cached(&self, collection: &str) -> StorageResult<Vec<CachedRecord>> {
        let collection = collection.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT collection, data, cached_at, expires_at FROM cached_records
                 WHERE collection = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![collection], raw_cached)?;
            let mut result = Vec::new();
            for row in rows {
                result.push(cached_from_raw(row?)?);
            }
            Ok(result)
        })
        .await
    }

    async fn set_cached(
        &self,
        collection: &str,
        record: &Record,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let id = record_id_for(collection, record)?;
        let entry = CachedRecord::new(collection, record.clone(), expires_at);
        let data = serde_json::to_string(&entry.record)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO cached_records (collection, record_id, data, cached_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (collection, record_id) DO UPDATE SET
                    data = excluded.data,
                    cached_at = excluded.cached_at,
                    expires_at = excluded.expires_at",
                params![
                    entry.collection,
                    id.as_str(),
                    data,
                    entry.cached_at.timestamp_micros(),
                    entry.expires_at.map(|t| t.timestamp_micros()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_cached(&self, collection: &str, id: &RecordId) -> StorageResult<()> {
        let collection = collection.to_string();
        let id = id.as_str().to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM cached_records WHERE collection = ?1 AND record_id = ?2",
                params![collection, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_cached(
        &self,
        collection: Option<&str>,
        expired_only: bool,
    ) -> StorageResult<usize> {
        let collection = collection.map(str::to_string);
        let now = Utc::now().timestamp_micros();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM cached_records
                 WHERE (?1 IS NULL OR collection = ?1)
                   AND (?2 = 0 OR (expires_at IS NOT NULL AND expires_at <= ?3))",
                params![collection, expired_only, now],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn append_pending_action(&self, action: PendingAction) -> StorageResult<PendingAction> {
        let payload = serde_json::to_string(&action.payload)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO pending_actions
                    (id, kind, collection, payload, enqueued_at, synced, retry_count, abandoned, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    action.id.to_string(),
                    action.kind.as_str(),
                    action.collection,
                    payload,
                    action.enqueued_at.timestamp_micros(),
                    action.synced,
                    action.retry_count,
                    action.abandoned,
                    action.last_error,
                ],
            )?;
            let mut stored = action;
            stored.seq = u64::try_from(conn.last_insert_rowid())
                .map_err(|e| StorageError::InvalidData(format!("negative seq: {e}")))?;
            Ok(stored)
        })
        .await
    }

    async fn get_pending_action(&self, id: &ActionId) -> StorageResult<Option<PendingAction>> {
        let id = id.to_string();
        self.run(move |conn| select_action(conn, &id)).await
    }

    async fn list_pending_actions(&self, synced: bool) -> StorageResult<Vec<PendingAction>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM pending_actions
                 WHERE synced = ?1 ORDER BY enqueued_at, seq"
            ))?;
            let rows = stmt.query_map(params![synced], raw_action)?;
            let mut result = Vec::new();
            for row in rows {
                result.push(action_from_raw(row?)?);
            }
            Ok(result)
        })
        .await
    }

    async fn update_pending_action(
        &self,
        id: &ActionId,
        patch: &ActionPatch,
    ) -> StorageResult<PendingAction> {
        let id = id.to_string();
        let patch = patch.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut action =
                select_action(&tx, &id)?.ok_or_else(|| StorageError::NotFound(id.clone()))?;
            if patch.apply(&mut action) {
                tx.execute(
                    "UPDATE pending_actions
                     SET payload = ?2, synced = ?3, retry_count = ?4, abandoned = ?5, last_error = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        serde_json::to_string(&action.payload)?,
                        action.synced,
                        action.retry_count,
                        action.abandoned,
                        action.last_error,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(action)
        })
        .await
    }

    async fn delete_synced_actions(&self) -> StorageResult<usize> {
        self.run(|conn| {
            let removed = conn.execute(
                "DELETE FROM pending_actions WHERE synced = 1 AND abandoned = 0",
                [],
            )?;
            Ok(removed)
        })
        .await
    }
}

// ── Row mapping ──────────────────────────────────────────────────

type RawCached = (String, String, i64, Option<i64>);

type RawAction = (
    i64,
    String,
    String,
    String,
    String,
    i64,
    bool,
    u32,
    bool,
    Option<String>,
);

fn raw_cached(row: &Row<'_>) -> rusqlite::Result<RawCached> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn cached_from_raw((collection, data, cached_at, expires_at): RawCached) -> StorageResult<CachedRecord> {
    Ok(CachedRecord {
        collection,
        record: serde_json::from_str(&data)?,
        cached_at: from_micros(cached_at)?,
        expires_at: expires_at.map(from_micros).transpose()?,
    })
}

fn raw_action(row: &Row<'_>) -> rusqlite::Result<RawAction> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn action_from_raw(raw: RawAction) -> StorageResult<PendingAction> {
    let (seq, id, kind, collection, payload, enqueued_at, synced, retry_count, abandoned, last_error) =
        raw;
    Ok(PendingAction {
        id: id
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("invalid action id {id}: {e}")))?,
        kind: kind
            .parse::<ActionKind>()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?,
        collection,
        payload: serde_json::from_str(&payload)?,
        enqueued_at: from_micros(enqueued_at)?,
        seq: u64::try_from(seq).map_err(|e| StorageError::InvalidData(format!("seq: {e}")))?,
        synced,
        retry_count,
        abandoned,
        last_error,
    })
}

fn select_action(conn: &Connection, id: &str) -> StorageResult<Option<PendingAction>> {
    conn.query_row(
        &format!("SELECT {ACTION_COLUMNS} FROM pending_actions WHERE id = ?1"),
        params![id],
        raw_action,
    )
    .optional()?
    .map(action_from_raw)
    .transpose()
}

fn from_micros(micros: i64) -> StorageResult<DateTime<Utc>> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| StorageError::InvalidData(format!("invalid timestamp: {micros}")))
}
