//! # SQLite
//!
//! Relational store behind the sync endpoint.
//!
//! ## Tables
//!
//! - One table per content collection, `id TEXT PRIMARY KEY`
//! - `settings (key TEXT PRIMARY KEY, value TEXT)` for flat key/value pairs
//!
//! ## Access
//!
//! - Read only from this crate, writes belong to the CRUD endpoints
//! - One read only connection per request, opened on the blocking pool
//! - A sync request reads every table inside one read transaction, so all
//!   collections come from the same database state
//! - Opening the file or the transaction failing means "store unreachable",
//!   a single broken table only fails its own entry
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use collections::{Collection, CollectionSet};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};
use tokio::task::spawn_blocking;
use tracing::info;

use crate::{error::StoreError, utils::row_to_record};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
}

/// Everything one sync request asked for, each read failing on its own.
#[derive(Debug, Default)]
pub struct ReadBatch {
    pub collections: Vec<(Collection, Result<Vec<Record>, StoreError>)>,
    /// `None` when no settings derived collection was requested.
    pub settings: Option<Result<Vec<Setting>, StoreError>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails when the store cannot be reached at all.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Reads the requested collections from one consistent view.
    ///
    /// Only fails as a whole when the store is unreachable.
    async fn read(&self, requested: &CollectionSet) -> Result<ReadBatch, StoreError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS policies (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        detail TEXT,
        status TEXT DEFAULT 'Pending',
        percent INTEGER DEFAULT 0,
        image TEXT,
        created_at INTEGER,
        updated_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS members (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        role TEXT,
        image TEXT,
        bio TEXT,
        created_at INTEGER,
        updated_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS complaints (
        id TEXT PRIMARY KEY,
        ticket_id TEXT UNIQUE,
        topic TEXT NOT NULL,
        name TEXT,
        detail TEXT,
        status TEXT DEFAULT 'Pending',
        response TEXT,
        timestamp INTEGER,
        created_at TEXT
    );
    CREATE TABLE IF NOT EXISTS activities (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        detail TEXT,
        category TEXT,
        image TEXT,
        created_at INTEGER,
        updated_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS qa (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        answer TEXT,
        status TEXT DEFAULT 'Pending',
        timestamp INTEGER,
        created_at TEXT
    );
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        date TEXT,
        time TEXT,
        location TEXT,
        description TEXT,
        category TEXT,
        created_at INTEGER,
        updated_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_complaints_ticket ON complaints(ticket_id);
    CREATE INDEX IF NOT EXISTS idx_complaints_status ON complaints(status);
    CREATE INDEX IF NOT EXISTS idx_qa_status ON qa(status);
    CREATE INDEX IF NOT EXISTS idx_events_date ON events(date);
";

pub struct SqliteStore {
    path: PathBuf,
    qa_limit: u32,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>, qa_limit: u32) -> Self {
        Self {
            path: path.into(),
            qa_limit,
        }
    }

    /// Creates missing tables and indexes. Existing data is left alone.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let path = self.path.clone();

        spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;

            info!("Schema ready at {}", path.display());
            Ok(())
        })
        .await?
    }

    async fn with_connection<T, F>(&self, read: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();

        spawn_blocking(move || -> Result<T, StoreError> {
            let conn = open_read_only(&path)?;
            read(&conn)
        })
        .await?
    }
}

fn open_read_only(path: &Path) -> Result<Connection, StoreError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))
}

/// `SELECT` for a table backed collection, `None` for settings derived ones.
pub fn list_query(collection: Collection, qa_limit: u32) -> Option<String> {
    let query = match collection {
        Collection::Policies => "SELECT * FROM policies ORDER BY created_at DESC".to_string(),
        Collection::Members => "SELECT * FROM members ORDER BY created_at DESC".to_string(),
        Collection::Complaints => "SELECT * FROM complaints ORDER BY timestamp DESC".to_string(),
        Collection::Activities => "SELECT * FROM activities ORDER BY created_at DESC".to_string(),
        Collection::Qa => format!("SELECT * FROM qa ORDER BY timestamp DESC LIMIT {qa_limit}"),
        Collection::Events => "SELECT * FROM events ORDER BY date ASC".to_string(),
        Collection::Announcement | Collection::Maintenance => return None,
    };

    Some(query)
}

fn list_with(conn: &Connection, query: &str) -> Result<Vec<Record>, StoreError> {
    let mut statement = conn.prepare(query)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let records = statement
        .query_map([], |row| row_to_record(row, &columns))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

fn settings_with(conn: &Connection) -> Result<Vec<Setting>, StoreError> {
    let mut statement = conn.prepare("SELECT key, value FROM settings")?;

    let settings = statement
        .query_map([], |row| {
            Ok(Setting {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(settings)
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(unavailable)?;
            Ok(())
        })
        .await
    }

    async fn read(&self, requested: &CollectionSet) -> Result<ReadBatch, StoreError> {
        let requested = requested.clone();
        let qa_limit = self.qa_limit;

        self.with_connection(move |conn| {
            let tx = conn.unchecked_transaction().map_err(unavailable)?;

            // First read pins the snapshot every later read sees.
            tx.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(unavailable)?;

            let collections = requested
                .iter()
                .filter_map(|c| list_query(c, qa_limit).map(|query| (c, query)))
                .map(|(collection, query)| (collection, list_with(&tx, &query)))
                .collect();

            let settings = requested.wants_settings().then(|| settings_with(&tx));

            // Read only, nothing to commit. Dropping rolls back.
            Ok(ReadBatch {
                collections,
                settings,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("council.db");

        let conn = Connection::open(&path).expect("open sqlite");
        conn.execute_batch(SCHEMA).expect("schema");
        conn.execute_batch(
            "INSERT INTO events (id, title, date) VALUES ('e2', 'Later', '2025-02-01');
             INSERT INTO events (id, title, date) VALUES ('e1', 'Sooner', '2025-01-01');
             INSERT INTO qa (id, question, timestamp) VALUES ('q1', 'old', 1);
             INSERT INTO qa (id, question, timestamp) VALUES ('q2', 'new', 2);
             INSERT INTO qa (id, question, timestamp) VALUES ('q3', 'newest', 3);
             INSERT INTO settings (key, value) VALUES ('maintenance', 'true');",
        )
        .expect("seed");

        (dir, SqliteStore::new(path, 2))
    }

    fn ids(batch: &ReadBatch, collection: Collection) -> Vec<Value> {
        batch
            .collections
            .iter()
            .find(|(c, _)| *c == collection)
            .and_then(|(_, records)| records.as_ref().ok())
            .map(|records| records.iter().map(|r| r["id"].clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_events_ascending_by_date() {
        let (_dir, store) = seeded_store();

        let batch = store
            .read(&CollectionSet::only([Collection::Events]))
            .await
            .expect("read events");

        assert_eq!(
            ids(&batch, Collection::Events),
            vec![Value::from("e1"), Value::from("e2")]
        );
        assert!(batch.settings.is_none());
    }

    #[tokio::test]
    async fn test_qa_is_capped_newest_first() {
        let (_dir, store) = seeded_store();

        let batch = store
            .read(&CollectionSet::only([Collection::Qa]))
            .await
            .expect("read qa");

        assert_eq!(
            ids(&batch, Collection::Qa),
            vec![Value::from("q3"), Value::from("q2")]
        );
    }

    #[tokio::test]
    async fn test_settings_rows() {
        let (_dir, store) = seeded_store();

        let batch = store
            .read(&CollectionSet::only([Collection::Maintenance]))
            .await
            .expect("read settings");

        assert!(batch.collections.is_empty());
        assert_eq!(
            batch.settings.expect("settings requested").expect("settings"),
            vec![Setting {
                key: "maintenance".to_string(),
                value: Some("true".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_database_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(dir.path().join("absent.db"), 50);

        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.read(&CollectionSet::All).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_not_a_database_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![b'x'; 4096]).expect("write garbage");
        let store = SqliteStore::new(path, 50);

        assert!(matches!(
            store.read(&CollectionSet::All).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_one_batch_covers_every_request_and_isolates_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partial.db");
        Connection::open(&path)
            .expect("open sqlite")
            .execute_batch(
                "CREATE TABLE members (id TEXT PRIMARY KEY, name TEXT, created_at INTEGER);
                 INSERT INTO members VALUES ('m1', 'Ann', 1);",
            )
            .expect("seed");
        let store = SqliteStore::new(path, 50);

        let batch = store
            .read(&CollectionSet::parse(Some("members,events,settings")))
            .await
            .expect("read");

        let read: Vec<Collection> = batch.collections.iter().map(|(c, _)| *c).collect();
        assert_eq!(read, vec![Collection::Members, Collection::Events]);
        assert_eq!(ids(&batch, Collection::Members), vec![Value::from("m1")]);
        assert!(matches!(
            batch.collections[1].1,
            Err(StoreError::Query(_))
        ));
        assert!(matches!(batch.settings, Some(Err(StoreError::Query(_)))));
    }

    #[test]
    fn test_settings_collections_have_no_query() {
        assert!(list_query(Collection::Announcement, 50).is_none());
        assert!(list_query(Collection::Maintenance, 50).is_none());
        assert!(list_query(Collection::Qa, 7)
            .expect("qa query")
            .ends_with("LIMIT 7"));
    }
}
