pub mod queries;

use crate::ledger::store::{RecordStore, StorageKey};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct RecordMetaRow {
    pub namespace: String,
    pub record_id: String,
    pub updated_at: i64,
    pub payload_bytes: i64,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })
    }

    pub fn read_record(&self, namespace: &str, record_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT payload FROM records WHERE namespace = ?1 AND record_id = ?2",
                params![namespace, record_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read record: {namespace}_{record_id}"))
    }

    pub fn write_record(&self, namespace: &str, record_id: &str, payload: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO records (namespace, record_id, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, record_id)
                 DO UPDATE SET payload=excluded.payload, updated_at=excluded.updated_at",
                params![namespace, record_id, payload, Utc::now().timestamp()],
            )
            .with_context(|| format!("Failed to write record: {namespace}_{record_id}"))?;

        Ok(())
    }

    pub fn remove_record(&self, namespace: &str, record_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM records WHERE namespace = ?1 AND record_id = ?2",
                params![namespace, record_id],
            )
            .with_context(|| format!("Failed to remove record: {namespace}_{record_id}"))
    }

    pub fn list_records(&self, namespace: &str) -> Result<Vec<RecordMetaRow>> {
        let mut statement = self.conn.prepare(
            "SELECT namespace, record_id, updated_at, length(payload)
             FROM records
             WHERE namespace = ?1
             ORDER BY updated_at DESC, record_id ASC",
        )?;

        let rows = statement
            .query_map(params![namespace], |row| {
                Ok(RecordMetaRow {
                    namespace: row.get(0)?,
                    record_id: row.get(1)?,
                    updated_at: row.get(2)?,
                    payload_bytes: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list records")?;

        Ok(rows)
    }
}

/// SQLite-backed [`RecordStore`]. A connection is opened per operation.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl RecordStore for SqliteRecordStore {
    fn read(&self, key: &StorageKey) -> Result<Option<String>> {
        Database::open(&self.db_path)?.read_record(&key.namespace, &key.id)
    }

    fn write(&self, key: &StorageKey, payload: &str) -> Result<()> {
        Database::open(&self.db_path)?.write_record(&key.namespace, &key.id, payload)
    }

    fn remove(&self, key: &StorageKey) -> Result<()> {
        Database::open(&self.db_path)?
            .remove_record(&key.namespace, &key.id)
            .map(|_| ())
    }

    fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let records = Database::open(&self.db_path)?.list_records(namespace)?;

        Ok(records
            .into_iter()
            .map(|record| record.record_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, SqliteRecordStore};
    use crate::ledger::store::{RecordStore, StorageKey};

    #[test]
    fn write_overwrites_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::new(dir.path().join("db").join("challenge.db"));
        let key = StorageKey::new("todayChallengeApp", "42");

        assert!(store.read(&key).unwrap().is_none());
        store.write(&key, r#"{"v":1}"#).unwrap();
        store.write(&key, r#"{"v":2}"#).unwrap();

        assert_eq!(store.read(&key).unwrap().as_deref(), Some(r#"{"v":2}"#));
        assert_eq!(
            store.list_ids("todayChallengeApp").unwrap(),
            vec!["42".to_string()]
        );
    }

    #[test]
    fn remove_only_touches_one_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("challenge.db");
        let store = SqliteRecordStore::new(&path);

        store.write(&StorageKey::new("auth_user", "current"), "{}").unwrap();
        store.write(&StorageKey::new("todayChallengeApp", "current"), "{}").unwrap();
        store.remove(&StorageKey::new("auth_user", "current")).unwrap();

        let database = Database::open(&path).unwrap();
        assert!(database.read_record("auth_user", "current").unwrap().is_none());
        assert_eq!(database.list_records("todayChallengeApp").unwrap().len(), 1);
    }
}
