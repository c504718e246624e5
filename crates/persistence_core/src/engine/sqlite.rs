//! SQLite storage engine.
//!
//! # Responsibility
//! - Open file or in-memory SQLite stores bound to one schema.
//! - Configure connection pragmas and apply layout migrations.
//! - Persist managed objects as JSON rows and commit change sets atomically.
//!
//! # Invariants
//! - Returned stores have `foreign_keys=ON` and migrations fully applied.
//! - The schema fingerprint recorded on first open must match later opens.
//! - A failed open leaves no new file and no new metadata behind.
//!
//! # See also
//! - engine/migrations/0001_store_layout.sql

use super::migrations::apply_migrations;
use super::{EngineError, EngineResult, StorageEngine, Store, StoreInitializationError, StoreLocation};
use crate::model::change_set::{Change, ChangeSet};
use crate::model::object::{FetchRequest, ManagedObject, ObjectId, Values};
use crate::schema::Schema;
use log::{debug, error, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SCHEMA_FINGERPRINT_KEY: &str = "schema_fingerprint";
const SCHEMA_NAME_KEY: &str = "schema_name";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite journal mode applied to file stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Delete,
    Wal,
}

impl JournalMode {
    fn as_pragma(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Wal => "WAL",
        }
    }
}

/// Engine factory for SQLite-backed stores.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    busy_timeout: Duration,
    journal_mode: JournalMode,
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: JournalMode::default(),
        }
    }
}

impl SqliteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_journal_mode(mut self, journal_mode: JournalMode) -> Self {
        self.journal_mode = journal_mode;
        self
    }

    /// Opens a concrete `SqliteStore`.
    ///
    /// # Side effects
    /// - Creates the store file when missing.
    /// - Emits `store_open` logging events with duration and status.
    pub fn open_store(
        &self,
        location: &StoreLocation,
        schema: &Schema,
    ) -> Result<SqliteStore, StoreInitializationError> {
        let started_at = Instant::now();
        let mode = mode_label(location);
        info!("event=store_open module=engine status=start mode={mode}");

        match self.open_store_inner(location, schema) {
            Ok(store) => {
                info!(
                    "event=store_open module=engine status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(store)
            }
            Err(err) => {
                error!(
                    "event=store_open module=engine status=error mode={mode} duration_ms={} error_code={} error={}",
                    started_at.elapsed().as_millis(),
                    error_code(&err),
                    err
                );
                Err(err)
            }
        }
    }

    fn open_store_inner(
        &self,
        location: &StoreLocation,
        schema: &Schema,
    ) -> Result<SqliteStore, StoreInitializationError> {
        schema
            .validate()
            .map_err(StoreInitializationError::InvalidSchema)?;

        let mut conn = match location {
            StoreLocation::InMemory => Connection::open_in_memory()?,
            StoreLocation::File(path) => {
                preflight_file_location(path)?;
                let existed = path.exists();
                let opened = Connection::open(path)
                    .map_err(StoreInitializationError::from)
                    .and_then(|mut conn| {
                        self.bootstrap_connection(&mut conn, location, schema)
                            .map(|()| conn)
                    });
                return match opened {
                    Ok(conn) => Ok(SqliteStore::new(conn, location.clone(), schema.clone())),
                    Err(err) => {
                        if !existed {
                            remove_created_files(path);
                        }
                        Err(err)
                    }
                };
            }
        };

        self.bootstrap_connection(&mut conn, location, schema)?;
        Ok(SqliteStore::new(conn, location.clone(), schema.clone()))
    }

    fn bootstrap_connection(
        &self,
        conn: &mut Connection,
        location: &StoreLocation,
        schema: &Schema,
    ) -> Result<(), StoreInitializationError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(self.busy_timeout)?;
        if matches!(location, StoreLocation::File(_)) {
            let mode: String = conn.query_row(
                &format!("PRAGMA journal_mode = {};", self.journal_mode.as_pragma()),
                [],
                |row| row.get(0),
            )?;
            debug!("event=store_open module=engine status=configured journal_mode={mode}");
        }

        let tx = conn.transaction()?;
        apply_migrations(&tx)?;
        check_schema_fingerprint(&tx, schema)?;
        tx.commit()?;
        Ok(())
    }
}

impl StorageEngine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open(
        &self,
        location: &StoreLocation,
        schema: &Schema,
    ) -> Result<Arc<dyn Store>, StoreInitializationError> {
        let store = self.open_store(location, schema)?;
        Ok(Arc::new(store))
    }
}

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: StoreLocation,
    schema: Schema,
}

impl SqliteStore {
    fn new(conn: Connection, location: StoreLocation, schema: Schema) -> Self {
        Self {
            conn: Mutex::new(conn),
            location,
            schema,
        }
    }

    /// Returns the number of persisted objects of `entity`.
    pub fn count(&self, entity: &str) -> EngineResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE entity = ?1;",
            [entity],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl Store for SqliteStore {
    fn location(&self) -> &StoreLocation {
        &self.location
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get(&self, id: ObjectId) -> EngineResult<Option<ManagedObject>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, entity, data FROM objects WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_object_row(row)?)),
            None => Ok(None),
        }
    }

    fn fetch(&self, request: &FetchRequest) -> EngineResult<Vec<ManagedObject>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, entity, data FROM objects WHERE entity = ?1 ORDER BY id ASC;")?;
        let mut rows = stmt.query([request.entity.as_str()])?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next()? {
            objects.push(parse_object_row(row)?);
        }
        Ok(request.apply(objects))
    }

    fn commit(&self, changes: &ChangeSet) -> EngineResult<()> {
        let started_at = Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (id, change) in changes.iter() {
            match change {
                Change::Insert(object) | Change::Update(object) => {
                    let data = serde_json::to_string(&object.values)?;
                    tx.execute(
                        "INSERT INTO objects (id, entity, data)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE SET
                            entity = excluded.entity,
                            data = excluded.data,
                            updated_at = (strftime('%s', 'now') * 1000);",
                        params![id.to_string(), object.entity.as_str(), data],
                    )?;
                }
                Change::Delete { .. } => {
                    tx.execute("DELETE FROM objects WHERE id = ?1;", [id.to_string()])?;
                }
            }
        }
        tx.commit()?;
        debug!(
            "event=store_commit module=engine status=ok changes={} duration_ms={}",
            changes.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

fn preflight_file_location(path: &Path) -> Result<(), StoreInitializationError> {
    let unwritable = |reason: &str| StoreInitializationError::Unwritable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.as_os_str().is_empty() {
        return Err(unwritable("path is empty"));
    }
    if path.is_dir() {
        return Err(unwritable("path names a directory"));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(unwritable("parent directory does not exist"));
        }
    }
    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.permissions().readonly() {
            return Err(unwritable("store file is read-only"));
        }
    }
    Ok(())
}

fn check_schema_fingerprint(
    conn: &Connection,
    schema: &Schema,
) -> Result<(), StoreInitializationError> {
    let expected = schema.fingerprint();
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = ?1;",
            [SCHEMA_FINGERPRINT_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(stored) if stored == expected => Ok(()),
        Some(stored) => Err(StoreInitializationError::IncompatibleSchema { stored, expected }),
        None => {
            conn.execute(
                "INSERT INTO store_metadata (key, value) VALUES (?1, ?2), (?3, ?4);",
                params![
                    SCHEMA_FINGERPRINT_KEY,
                    expected,
                    SCHEMA_NAME_KEY,
                    schema.name.as_str()
                ],
            )?;
            Ok(())
        }
    }
}

fn parse_object_row(row: &Row<'_>) -> EngineResult<ManagedObject> {
    let id_text: String = row.get("id")?;
    let id = ObjectId::parse(&id_text).ok_or_else(|| {
        EngineError::InvalidData(format!("invalid object id `{id_text}` in objects.id"))
    })?;
    let data: String = row.get("data")?;
    let values: Values = serde_json::from_str(&data)?;
    Ok(ManagedObject {
        id,
        entity: row.get("entity")?,
        values,
    })
}

fn remove_created_files(path: &Path) {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }
    for candidate in candidates {
        if candidate.exists() {
            let _ = std::fs::remove_file(&candidate);
        }
    }
}

fn mode_label(location: &StoreLocation) -> &'static str {
    match location {
        StoreLocation::File(_) => "file",
        StoreLocation::InMemory => "memory",
    }
}

fn error_code(err: &StoreInitializationError) -> &'static str {
    match err {
        StoreInitializationError::Unwritable { .. } => "store_unwritable",
        StoreInitializationError::IncompatibleSchema { .. } => "schema_incompatible",
        StoreInitializationError::UnsupportedFormatVersion { .. } => "format_unsupported",
        StoreInitializationError::InvalidSchema(_) => "schema_invalid",
        StoreInitializationError::QueueUnavailable(_) => "queue_unavailable",
        StoreInitializationError::Engine(_) => "store_bootstrap_failed",
    }
}

#[cfg(test)]
mod tests {
    use super::{preflight_file_location, SqliteEngine};
    use crate::engine::{Store, StoreInitializationError, StoreLocation};
    use crate::model::change_set::{Change, ChangeSet};
    use crate::model::object::{values, FetchRequest, ManagedObject};
    use crate::schema::{AttributeType, EntityDescription, Schema};

    fn schema() -> Schema {
        Schema::new("notes").with_entity(
            EntityDescription::new("Note")
                .attribute("title", AttributeType::Text)
                .optional_attribute("pinned", AttributeType::Boolean),
        )
    }

    #[test]
    fn preflight_rejects_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("store.sqlite");
        assert!(matches!(
            preflight_file_location(&path),
            Err(StoreInitializationError::Unwritable { .. })
        ));
    }

    #[test]
    fn commit_applies_inserts_updates_and_deletes() {
        let store = SqliteEngine::new()
            .open_store(&StoreLocation::InMemory, &schema())
            .unwrap();

        let keep = ManagedObject::new("Note", values([("title", "keep")]));
        let stale = ManagedObject::new("Note", values([("title", "stale")]));
        let mut first = ChangeSet::new();
        first.record(keep.id, Change::Insert(keep.clone()));
        first.record(stale.id, Change::Insert(stale.clone()));
        store.commit(&first).unwrap();
        assert_eq!(store.count("Note").unwrap(), 2);

        let mut edited = keep.clone();
        edited.values.insert("pinned".to_string(), true.into());
        let mut second = ChangeSet::new();
        second.record(keep.id, Change::Update(edited.clone()));
        second.record(
            stale.id,
            Change::Delete {
                entity: "Note".to_string(),
            },
        );
        store.commit(&second).unwrap();

        assert_eq!(store.get(keep.id).unwrap(), Some(edited));
        assert_eq!(store.get(stale.id).unwrap(), None);
        let pinned = store
            .fetch(&FetchRequest::new("Note").filter("pinned", true))
            .unwrap();
        assert_eq!(pinned.len(), 1);
    }
}
