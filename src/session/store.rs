//! Session persistence with `SQLite`.

use crate::session::{SessionId, SessionRecord, SleepQuality};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

const SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str = "SELECT id, start_time_ms, end_time_ms, quality FROM sleep_sessions";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Background storage task failed: {0}")]
    Background(String),
}

/// Durable storage of sleep sessions.
///
/// Every method may be awaited concurrently. `subscribe` exposes the full
/// history (newest first); implementations publish the refreshed history on
/// it before a mutating call returns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new record and return the id the store assigned to it.
    async fn insert(&self, record: &SessionRecord) -> Result<SessionId, StorageError>;

    /// Overwrite the stored record with the same id.
    async fn update(&self, record: &SessionRecord) -> Result<(), StorageError>;

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StorageError>;

    /// The most recently created record, if any.
    async fn most_recent(&self) -> Result<Option<SessionRecord>, StorageError>;

    /// All records, newest first.
    async fn all(&self) -> Result<Vec<SessionRecord>, StorageError>;

    /// Erase every record.
    async fn clear_all(&self) -> Result<(), StorageError>;

    /// Live view of `all()`.
    fn subscribe(&self) -> watch::Receiver<Vec<SessionRecord>>;
}

pub struct SqliteSessionStore {
    db: Arc<Mutex<Connection>>,
    history_tx: Arc<watch::Sender<Vec<SessionRecord>>>,
}

impl SqliteSessionStore {
    /// Open or create a session store at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InvalidData(format!(
                    "Failed to create session directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;

        tracing::debug!(path = %path.display(), "Opened session store");
        Self::from_connection(db)
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self, StorageError> {
        init_schema(&db)?;
        let history = load_all(&db)?;
        let (history_tx, _) = watch::channel(history);

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            history_tx: Arc::new(history_tx),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_db<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| StorageError::Background("connection lock poisoned".to_string()))?;
            op(&conn)
        })
        .await
        .map_err(|e| StorageError::Background(e.to_string()))?
    }

    /// Run a mutating `op`, then publish the resulting history while the
    /// connection is still locked so subscribers see writes in commit order.
    async fn mutate<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let history_tx = Arc::clone(&self.history_tx);
        self.with_db(move |conn| {
            let result = op(conn)?;
            let history = load_all(conn)?;
            history_tx.send_replace(history);
            Ok(result)
        })
        .await
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, record: &SessionRecord) -> Result<SessionId, StorageError> {
        let record = record.clone();
        let id = self
            .mutate(move |conn| {
                conn.execute(
                    "INSERT INTO sleep_sessions (start_time_ms, end_time_ms, quality)
                     VALUES (?1, ?2, ?3)",
                    params![
                        record.start_time_ms,
                        record.end_time_ms,
                        record.quality.map(SleepQuality::score)
                    ],
                )?;
                Ok(SessionId(conn.last_insert_rowid()))
            })
            .await?;
        tracing::debug!(%id, "Inserted sleep session");
        Ok(id)
    }

    async fn update(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let record = record.clone();
        self.mutate(move |conn| {
            let affected = conn.execute(
                "UPDATE sleep_sessions
                 SET start_time_ms = ?1, end_time_ms = ?2, quality = ?3
                 WHERE id = ?4",
                params![
                    record.start_time_ms,
                    record.end_time_ms,
                    record.quality.map(SleepQuality::score),
                    record.id.0
                ],
            )?;
            if affected == 0 {
                return Err(StorageError::NotFound(record.id));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StorageError> {
        self.with_db(move |conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    params![id.0],
                    read_row,
                )
                .optional()?;
            row.map(into_record).transpose()
        })
        .await
    }

    async fn most_recent(&self) -> Result<Option<SessionRecord>, StorageError> {
        self.with_db(|conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT 1"),
                    [],
                    read_row,
                )
                .optional()?;
            row.map(into_record).transpose()
        })
        .await
    }

    async fn all(&self) -> Result<Vec<SessionRecord>, StorageError> {
        self.with_db(load_all).await
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let deleted = self
            .mutate(|conn| Ok(conn.execute("DELETE FROM sleep_sessions", [])?))
            .await?;
        tracing::info!(deleted, "Cleared sleep history");
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<SessionRecord>> {
        self.history_tx.subscribe()
    }
}

fn init_schema(db: &Connection) -> Result<(), StorageError> {
    let version: i32 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    // Migration v0 -> v1: Initial schema
    if version < SCHEMA_VERSION {
        // AUTOINCREMENT keeps ids from being reused after a clear.
        db.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS sleep_sessions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time_ms INTEGER NOT NULL,
                end_time_ms   INTEGER NOT NULL,
                quality       INTEGER
            );

            PRAGMA user_version = 1;
            ",
        )?;
    }

    Ok(())
}

type RawRow = (i64, i64, i64, Option<i64>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record(
    (id, start_time_ms, end_time_ms, quality): RawRow,
) -> Result<SessionRecord, StorageError> {
    if end_time_ms < start_time_ms {
        return Err(StorageError::InvalidData(format!(
            "Session {id} ends before it starts"
        )));
    }

    let quality = quality
        .map(|q| {
            u8::try_from(q)
                .map_err(|_| format!("Sleep quality out of range: {q}"))
                .and_then(SleepQuality::try_from)
                .map_err(StorageError::InvalidData)
        })
        .transpose()?;

    Ok(SessionRecord {
        id: SessionId(id),
        start_time_ms,
        end_time_ms,
        quality,
    })
}

fn load_all(conn: &Connection) -> Result<Vec<SessionRecord>, StorageError> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC"))?;

    let records: Result<Vec<SessionRecord>, StorageError> = stmt
        .query_map([], read_row)?
        .map(|r| into_record(r?))
        .collect();

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn closed(start: i64, end: i64) -> SessionRecord {
        SessionRecord {
            end_time_ms: end,
            ..SessionRecord::new(start)
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = SqliteSessionStore::open_in_memory().unwrap();

        let first = store.insert(&SessionRecord::new(100)).await.unwrap();
        let second = store.insert(&SessionRecord::new(200)).await.unwrap();

        assert!(first.is_assigned());
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_most_recent_and_all_are_newest_first() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        assert!(store.most_recent().await.unwrap().is_none());

        store.insert(&closed(100, 500)).await.unwrap();
        let latest = store.insert(&SessionRecord::new(600)).await.unwrap();

        let recent = store.most_recent().await.unwrap().unwrap();
        assert_eq!(recent.id, latest);
        assert!(recent.is_in_progress());

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, latest);
        assert_eq!(all[1].end_time_ms, 500);
    }

    #[tokio::test]
    async fn test_update_and_get() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let id = store.insert(&SessionRecord::new(100)).await.unwrap();

        let mut record = store.get(id).await.unwrap().unwrap();
        record.end_time_ms = 900;
        record.quality = Some(SleepQuality::PrettyGood);
        store.update(&record).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.get(SessionId(id.0 + 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let mut record = SessionRecord::new(100);
        record.id = SessionId(42);

        assert!(matches!(
            store.update(&record).await,
            Err(StorageError::NotFound(SessionId(42)))
        ));
    }

    #[tokio::test]
    async fn test_clear_all_does_not_reuse_ids() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let before = store.insert(&SessionRecord::new(100)).await.unwrap();
        store.insert(&SessionRecord::new(200)).await.unwrap();

        store.clear_all().await.unwrap();
        assert!(store.all().await.unwrap().is_empty());
        assert!(store.most_recent().await.unwrap().is_none());

        let after = store.insert(&SessionRecord::new(300)).await.unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_subscribe_sees_mutations() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        let id = store.insert(&SessionRecord::new(100)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].id, id);

        store.clear_all().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_persists_records() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("sleep.db");

        let id = {
            let store = SqliteSessionStore::open(&db_path).unwrap();
            store.insert(&closed(1_000, 2_000)).await.unwrap()
        };

        let store = SqliteSessionStore::open(&db_path).unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.start_time_ms, 1_000);
        assert_eq!(loaded.end_time_ms, 2_000);
        assert_eq!(store.subscribe().borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_rejected() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store
            .with_db(|conn| {
                conn.execute(
                    "INSERT INTO sleep_sessions (start_time_ms, end_time_ms, quality)
                     VALUES (10, 5, 9)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(
            store.most_recent().await,
            Err(StorageError::InvalidData(_))
        ));
    }
}
