use crate::error::AppError;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, error, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS datasets (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_datasets_created_at ON datasets (created_at);
";

/// Ownership record for one persisted table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed store of [`DatasetRecord`]s. `created_at` is kept as Unix milliseconds.
pub struct DatasetRegistry {
    conn: Mutex<Connection>,
}

impl DatasetRegistry {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        info!("Opening dataset registry at {:?}", path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            error!("Failed to open dataset registry: {}", e);
            AppError::Database(e)
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, record: &DatasetRecord) -> Result<(), AppError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO datasets (id, user_id, filename, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.user_id,
                record.filename,
                record.created_at.timestamp_millis()
            ],
        )?;
        debug!("Registered dataset {} for user {}", record.id, record.user_id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<DatasetRecord>, AppError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, user_id, filename, created_at FROM datasets WHERE id = ?1",
                params![id],
                read_row,
            )
            .optional()?;
        row.map(into_record).transpose()
    }

    pub fn contains(&self, id: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row("SELECT 1 FROM datasets WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Deletes the record for `id`. Returns whether a record was removed.
    pub fn remove(&self, id: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM datasets WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Records created strictly before `cutoff`, oldest first.
    pub fn created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<DatasetRecord>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, filename, created_at FROM datasets
             WHERE created_at < ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![cutoff.timestamp_millis()], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_record).collect()
    }

    pub fn count(&self) -> Result<usize, AppError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM datasets", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

type RawRecord = (String, String, String, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record((id, user_id, filename, created_at): RawRecord) -> Result<DatasetRecord, AppError> {
    let created_at = Utc.timestamp_millis_opt(created_at).single().ok_or_else(|| {
        AppError::Internal(format!("Dataset {} has an out-of-range timestamp", id))
    })?;
    Ok(DatasetRecord {
        id,
        user_id,
        filename,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, created_at: DateTime<Utc>) -> DatasetRecord {
        DatasetRecord {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            filename: "sales.csv".to_string(),
            created_at,
        }
    }

    #[test]
    fn insert_get_remove() {
        let registry = DatasetRegistry::open_in_memory().unwrap();
        let now = Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap();

        registry.insert(&record("abc", now)).unwrap();
        assert_eq!(registry.get("abc").unwrap(), Some(record("abc", now)));
        assert!(registry.contains("abc").unwrap());

        assert!(registry.remove("abc").unwrap());
        assert!(!registry.remove("abc").unwrap());
        assert_eq!(registry.get("abc").unwrap(), None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = DatasetRegistry::open_in_memory().unwrap();
        registry.insert(&record("dup", Utc::now())).unwrap();
        assert!(matches!(
            registry.insert(&record("dup", Utc::now())),
            Err(AppError::Database(_))
        ));
    }

    #[test]
    fn created_before_is_strict_and_ordered() {
        let registry = DatasetRegistry::open_in_memory().unwrap();
        let now = Utc::now();
        registry.insert(&record("newer", now - Duration::hours(25))).unwrap();
        registry.insert(&record("older", now - Duration::hours(30))).unwrap();
        registry.insert(&record("fresh", now - Duration::hours(23))).unwrap();

        let cutoff = now - Duration::hours(24);
        let ids: Vec<String> = registry
            .created_before(cutoff)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        assert_eq!(ids, vec!["older", "newer"]);
        assert_eq!(registry.count().unwrap(), 3);
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("datasets.sqlite3");

        DatasetRegistry::open(&path).unwrap().insert(&record("kept", Utc::now())).unwrap();

        assert!(DatasetRegistry::open(&path).unwrap().contains("kept").unwrap());
    }
}
