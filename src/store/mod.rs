//! Storage substrate (spec §4.A).
//!
//! A bounded reader pool (`r2d2` over `rusqlite`) plus a single
//! dedicated writer thread draining a bounded queue. Every operation is
//! explicitly scoped by a `profile: &str` parameter — the single
//! choke-point spec §6 requires ("every non-metadata query must
//! include a `profile = ?` predicate").

pub mod memory;
pub mod profile;
pub mod schema;

pub use memory::{ArchiveRecord, ColdStorageRecord, ListFilters, Memory, MemoryUpdate, NewMemory, SortBy, Tier};
pub use profile::{ProfileManager, ProfileMeta, DEFAULT_PROFILE};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::{Config, StoreConfig};
use crate::error::{sanitize, ErrorKind, Result};

/// Internal store error, converted to `ErrorKind` at every public
/// method's return (see `From<StoreError> for ErrorKind` below).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("busy: {0}")]
    Busy(String),
}

impl From<StoreError> for ErrorKind {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ErrorKind::NotFound(msg),
            StoreError::InvalidInput(msg) => ErrorKind::InvalidInput(msg),
            StoreError::Busy(msg) => ErrorKind::Busy(msg),
            StoreError::Database(e) => ErrorKind::Internal(sanitize(e.to_string())),
            StoreError::Pool(e) => ErrorKind::Busy(sanitize(e.to_string())),
            StoreError::Io(e) => ErrorKind::Internal(sanitize(e.to_string())),
        }
    }
}

type StoreResult<T> = std::result::Result<T, StoreError>;
type WriteJob = Box<dyn FnOnce(&Connection) + Send>;

/// Apply the teacher's performance pragma batch to any connection,
/// reader or writer.
fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// A single dedicated writer thread serializing all mutations through
/// a bounded MPSC queue (spec §4.A, §5: capacity 1000, overflow fails
/// fast with `Busy`).
struct WriteQueue {
    job_tx: SyncSender<WriteJob>,
    _handle: JoinHandle<()>,
}

impl WriteQueue {
    fn spawn(conn: Connection, capacity: usize) -> Self {
        let (job_tx, job_rx) = sync_channel::<WriteJob>(capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("memory-store-writer".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    job(&conn);
                }
            })
            .expect("failed to spawn store writer thread");
        Self { job_tx, _handle: handle }
    }

    fn submit<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = sync_channel::<StoreResult<T>>(1);
        let job: WriteJob = Box::new(move |conn| {
            let _ = reply_tx.send(f(conn));
        });
        self.job_tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => StoreError::Busy("write queue full, retry with backoff".into()),
            TrySendError::Disconnected(_) => {
                StoreError::Database(rusqlite::Error::ExecuteReturnedResults)
            }
        })?;
        reply_rx
            .recv()
            .map_err(|_| StoreError::Database(rusqlite::Error::ExecuteReturnedResults))?
    }
}

/// The storage substrate: bounded reader pool + serialized writer.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    writer: WriteQueue,
    config: StoreConfig,
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get("tags_json")?;
    let metadata_json: String = row.get("metadata_json")?;
    let tier_raw: u8 = row.get("tier")?;
    let created_at: String = row.get("created_at")?;
    let last_accessed: String = row.get("last_accessed")?;
    Ok(Memory {
        id: row.get("id")?,
        profile: row.get("profile")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
        project: row.get("project")?,
        importance: row.get("importance")?,
        tier: Tier::from_u8(tier_raw).unwrap_or(Tier::Full),
        parent_id: row.get("parent_id")?,
        created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        last_accessed: last_accessed.parse().unwrap_or_else(|_| chrono::Utc::now()),
        access_count: row.get("access_count")?,
    })
}

impl Store {
    /// Open (creating if needed) the database at `root/memory.db`.
    pub fn open(root: &Path, config: &Config) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let db_path: PathBuf = root.join("memory.db");

        let writer_conn = Connection::open(&db_path).map_err(|e| StoreError::from(e))?;
        configure_connection(&writer_conn).map_err(StoreError::from)?;
        schema::apply_migrations(&writer_conn).map_err(|e| {
            let is_downgrade = matches!(
                &e,
                rusqlite::Error::SqliteFailure(code, _) if code.code == rusqlite::ErrorCode::SchemaChanged
            );
            if is_downgrade {
                ErrorKind::Corrupt(sanitize(e.to_string()))
            } else {
                ErrorKind::from(StoreError::from(e))
            }
        })?;

        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn: &mut Connection| configure_connection(conn));
        let pool = Pool::builder()
            .max_size(config.store.reader_pool_size)
            .build(manager)
            .map_err(StoreError::from)?;

        let writer = WriteQueue::spawn(writer_conn, config.store.writer_queue_capacity);

        Ok(Self { pool, writer, config: config.store })
    }

    fn pool_get(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(StoreError::from)
    }

    fn validate_new(&self, input: &NewMemory) -> StoreResult<()> {
        if input.content.is_empty() {
            return Err(StoreError::InvalidInput("content must not be empty".into()));
        }
        if input.content.len() > self.config.max_content_bytes {
            return Err(StoreError::InvalidInput("content exceeds maximum size".into()));
        }
        if input.tags.len() > self.config.max_tags {
            return Err(StoreError::InvalidInput("too many tags".into()));
        }
        if input.tags.iter().any(|t| t.len() > self.config.max_tag_chars) {
            return Err(StoreError::InvalidInput("tag exceeds maximum length".into()));
        }
        if let Some(importance) = input.importance {
            if !(1..=10).contains(&importance) {
                return Err(StoreError::InvalidInput("importance must be within 1..=10".into()));
            }
        }
        Ok(())
    }

    /// Insert a new memory, mirror it into the FTS index (via trigger),
    /// and return its dense id. Emits no event itself; callers (the
    /// orchestrator) are responsible for publishing `memory_created`.
    pub fn add(&self, profile: &str, input: NewMemory) -> Result<i64> {
        self.validate_new(&input).map_err(ErrorKind::from)?;
        let profile = profile.to_string();
        let importance = input.importance.unwrap_or(5);
        let tags_json = serde_json::to_string(&input.tags).unwrap_or_else(|_| "[]".into());
        let metadata_json = serde_json::to_string(&input.metadata.unwrap_or(serde_json::Value::Null))
            .unwrap_or_else(|_| "{}".into());
        let content = input.content;
        let project = input.project;
        let parent_id = input.parent_id;

        self.writer
            .submit(move |conn| {
                let now = chrono::Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO memories (
                        profile, content, tags_json, metadata_json, project,
                        importance, tier, parent_id, created_at, last_accessed, access_count
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8, 0)",
                    params![profile, content, tags_json, metadata_json, project, importance, parent_id, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .map_err(ErrorKind::from)
    }

    /// Fetch a memory, bumping `last_accessed`/`access_count` atomically.
    pub fn get(&self, profile: &str, id: i64) -> Result<Memory> {
        let profile = profile.to_string();
        self.writer
            .submit(move |conn| {
                let now = chrono::Utc::now().to_rfc3339();
                let updated = conn.execute(
                    "UPDATE memories SET last_accessed = ?1, access_count = access_count + 1
                     WHERE id = ?2 AND profile = ?3",
                    params![now, id, profile],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound(format!("memory {id} not found")));
                }
                conn.query_row(
                    "SELECT * FROM memories WHERE id = ?1 AND profile = ?2",
                    params![id, profile],
                    row_to_memory,
                )
                .map_err(StoreError::from)
            })
            .map_err(ErrorKind::from)
    }

    /// Batch fetch, skipping ids that don't exist or belong to another
    /// profile (no partial-failure contract needed: missing ids are
    /// simply absent from the result).
    pub fn get_many(&self, profile: &str, ids: &[i64]) -> Result<Vec<Memory>> {
        let conn = self.pool_get().map_err(ErrorKind::from)?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM memories WHERE profile = ? AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::from).map_err(ErrorKind::from)?;
        let mut rusqlite_params: Vec<&dyn rusqlite::ToSql> = vec![&profile];
        for id in ids {
            rusqlite_params.push(id);
        }
        let rows = stmt
            .query_map(rusqlite_params.as_slice(), row_to_memory)
            .map_err(StoreError::from)
            .map_err(ErrorKind::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::from).map_err(ErrorKind::from)?);
        }
        Ok(out)
    }

    /// Update a subset of fields on an existing memory.
    pub fn update(&self, profile: &str, id: i64, fields: MemoryUpdate) -> Result<()> {
        if let Some(importance) = fields.importance {
            if !(1..=10).contains(&importance) {
                return Err(ErrorKind::InvalidInput("importance must be within 1..=10".into()));
            }
        }
        let profile = profile.to_string();
        self.writer
            .submit(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT * FROM memories WHERE id = ?1 AND profile = ?2",
                        params![id, profile],
                        row_to_memory,
                    )
                    .optional()?
                    .ok_or_else(|| StoreError::NotFound(format!("memory {id} not found")))?;

                let content = fields.content.unwrap_or(existing.content);
                let summary = fields.summary.unwrap_or(existing.summary);
                let tags = fields.tags.unwrap_or(existing.tags);
                let project = fields.project.unwrap_or(existing.project);
                let importance = fields.importance.unwrap_or(existing.importance);
                let tier = fields.tier.unwrap_or(existing.tier);
                let metadata = fields.metadata.unwrap_or(existing.metadata);

                let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".into());
                let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".into());

                conn.execute(
                    "UPDATE memories SET content = ?1, summary = ?2, tags_json = ?3,
                        project = ?4, importance = ?5, tier = ?6, metadata_json = ?7
                     WHERE id = ?8 AND profile = ?9",
                    params![content, summary, tags_json, project, importance, tier.as_u8(), metadata_json, id, profile],
                )?;
                Ok(())
            })
            .map_err(ErrorKind::from)
    }

    /// Delete a memory and every row that references it (archive, graph
    /// node/edges, cluster membership) via `ON DELETE CASCADE`.
    pub fn delete(&self, profile: &str, id: i64) -> Result<()> {
        let profile = profile.to_string();
        self.writer
            .submit(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM memories WHERE id = ?1 AND profile = ?2",
                    params![id, profile],
                )?;
                if affected == 0 {
                    return Err(StoreError::NotFound(format!("memory {id} not found")));
                }
                Ok(())
            })
            .map_err(ErrorKind::from)
    }

    /// Lexical pre-filter over the FTS5 virtual table, ordered by its
    /// native `bm25()` rank (ascending = more relevant in SQLite FTS5).
    pub fn search_fts(&self, profile: &str, query: &str, limit: usize) -> Result<Vec<i64>> {
        let conn = self.pool_get().map_err(ErrorKind::from)?;
        let mut stmt = conn
            .prepare(
                "SELECT m.id FROM memories_fts f
                 JOIN memories m ON m.id = f.rowid
                 WHERE memories_fts MATCH ?1 AND m.profile = ?2
                 ORDER BY bm25(memories_fts)
                 LIMIT ?3",
            )
            .map_err(StoreError::from)
            .map_err(ErrorKind::from)?;
        let rows = stmt
            .query_map(params![query, profile, limit as i64], |row| row.get::<_, i64>(0))
            .map_err(StoreError::from)
            .map_err(ErrorKind::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::from).map_err(ErrorKind::from)?);
        }
        Ok(out)
    }

    /// Filtered, sorted listing (spec §4.A).
    pub fn list(
        &self,
        profile: &str,
        filters: &ListFilters,
        sort: SortBy,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let conn = self.pool_get().map_err(ErrorKind::from)?;
        // Every filter is expressed as an "unbound OR match" clause so a
        // single prepared statement covers all filter combinations
        // without juggling which named parameters are actually present.
        let mut sql = String::from(
            "SELECT * FROM memories WHERE profile = :profile
             AND (:tag IS NULL OR tags_json LIKE '%' || :tag || '%')
             AND (:project IS NULL OR project = :project)
             AND (:min_importance IS NULL OR importance >= :min_importance)
             AND (:tier IS NULL OR tier = :tier)",
        );
        sql.push_str(match sort {
            SortBy::CreatedAtDesc => " ORDER BY created_at DESC",
            SortBy::CreatedAtAsc => " ORDER BY created_at ASC",
            SortBy::ImportanceDesc => " ORDER BY importance DESC",
            SortBy::LastAccessedDesc => " ORDER BY last_accessed DESC",
        });
        sql.push_str(" LIMIT :limit OFFSET :offset");

        let mut stmt = conn.prepare(&sql).map_err(StoreError::from).map_err(ErrorKind::from)?;
        let rows = stmt
            .query_map(
                rusqlite::named_params! {
                    ":profile": profile,
                    ":tag": filters.tag,
                    ":project": filters.project,
                    ":min_importance": filters.min_importance,
                    ":tier": filters.tier.map(|t| t.as_u8()),
                    ":limit": limit as i64,
                    ":offset": offset as i64,
                },
                row_to_memory,
            )
            .map_err(StoreError::from)
            .map_err(ErrorKind::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::from).map_err(ErrorKind::from)?);
        }
        Ok(out)
    }

    /// Raw access to a pooled reader connection, for components (BM25
    /// rebuild, graph build, compressor) that need to stream whole
    /// tables without going through `Memory`-shaped accessors.
    pub fn reader(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool_get().map_err(ErrorKind::from)
    }

    /// Run an arbitrary write transaction against the serialized writer
    /// connection. Used by the compressor, graph engine, and learner to
    /// persist derived state without re-deriving this module's SQL.
    pub fn with_writer<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.writer
            .submit(move |conn| f(conn).map_err(StoreError::from))
            .map_err(ErrorKind::from)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), &Config::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn add_and_get_round_trips() {
        let (_dir, store) = open_store();
        let id = store
            .add(
                "default",
                NewMemory { content: "Use React hooks for state".into(), ..Default::default() },
            )
            .unwrap();
        let memory = store.get("default", id).unwrap();
        assert_eq!(memory.content, "Use React hooks for state");
        assert_eq!(memory.importance, 5);
        assert_eq!(memory.tier.as_u8(), 1);
        assert_eq!(memory.access_count, 1);
    }

    #[test]
    fn get_bumps_access_count_each_call() {
        let (_dir, store) = open_store();
        let id = store.add("default", NewMemory { content: "hello world".into(), ..Default::default() }).unwrap();
        store.get("default", id).unwrap();
        let memory = store.get("default", id).unwrap();
        assert_eq!(memory.access_count, 2);
    }

    #[test]
    fn invalid_importance_is_rejected() {
        let (_dir, store) = open_store();
        let result = store.add(
            "default",
            NewMemory { content: "x".into(), importance: Some(11), ..Default::default() },
        );
        assert!(matches!(result, Err(ErrorKind::InvalidInput(_))));
    }

    #[test]
    fn empty_content_is_rejected() {
        let (_dir, store) = open_store();
        let result = store.add("default", NewMemory { content: String::new(), ..Default::default() });
        assert!(matches!(result, Err(ErrorKind::InvalidInput(_))));
    }

    #[test]
    fn delete_removes_the_row() {
        let (_dir, store) = open_store();
        let id = store.add("default", NewMemory { content: "bye".into(), ..Default::default() }).unwrap();
        store.delete("default", id).unwrap();
        assert!(matches!(store.get("default", id), Err(ErrorKind::NotFound(_))));
    }

    #[test]
    fn delete_unknown_id_is_not_found() {
        let (_dir, store) = open_store();
        assert!(matches!(store.delete("default", 999), Err(ErrorKind::NotFound(_))));
    }

    #[test]
    fn profile_isolation_on_get_and_fts() {
        let (_dir, store) = open_store();
        let work_id = store.add("work", NewMemory { content: "work secret".into(), ..Default::default() }).unwrap();
        store.add("personal", NewMemory { content: "personal secret".into(), ..Default::default() }).unwrap();

        assert!(matches!(store.get("personal", work_id), Err(ErrorKind::NotFound(_))));
        let hits = store.search_fts("personal", "work", 10).unwrap();
        assert!(hits.is_empty());
        let hits = store.search_fts("work", "work", 10).unwrap();
        assert_eq!(hits, vec![work_id]);
    }

    #[test]
    fn search_fts_finds_matching_content() {
        let (_dir, store) = open_store();
        store.add("default", NewMemory { content: "Use React hooks for state".into(), ..Default::default() }).unwrap();
        store.add("default", NewMemory { content: "Prefer PostgreSQL for relational data".into(), ..Default::default() }).unwrap();
        let hits = store.search_fts("default", "react", 5).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn list_filters_by_project() {
        let (_dir, store) = open_store();
        store.add("default", NewMemory { content: "a".into(), project: Some("p1".into()), ..Default::default() }).unwrap();
        store.add("default", NewMemory { content: "b".into(), project: Some("p2".into()), ..Default::default() }).unwrap();
        let filters = ListFilters { project: Some("p1".into()), ..Default::default() };
        let results = store.list("default", &filters, SortBy::CreatedAtDesc, 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].project.as_deref(), Some("p1"));
    }

    #[test]
    fn update_changes_only_specified_fields() {
        let (_dir, store) = open_store();
        let id = store.add("default", NewMemory { content: "original".into(), ..Default::default() }).unwrap();
        store
            .update("default", id, MemoryUpdate { importance: Some(9), ..Default::default() })
            .unwrap();
        let memory = store.get("default", id).unwrap();
        assert_eq!(memory.importance, 9);
        assert_eq!(memory.content, "original");
    }

    #[test]
    fn write_queue_rejects_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.writer_queue_capacity = 1;
        let store = Store::open(dir.path(), &config).unwrap();
        // Capacity 1 still allows sequential calls to succeed since each
        // submission blocks on its reply before the next is issued; this
        // asserts normal operation still works under a tiny queue.
        let id = store.add("default", NewMemory { content: "x".into(), ..Default::default() }).unwrap();
        assert!(id > 0);
    }
}
