//! Database migrations (spec §6 "Database schema").
//!
//! Forward-only, idempotent. Each migration is plain DDL executed in
//! one transaction; `schema_version` records the highest version
//! applied. Downgrades (a binary older than the database) are rejected.

use rusqlite::Connection;

/// A single forward migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// Ordered migrations, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, FTS5, archive",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Knowledge graph: nodes, edges, clusters, membership",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Learned patterns and their examples",
        up: MIGRATION_V3_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT,
    tags_json TEXT NOT NULL DEFAULT '[]',
    metadata_json TEXT NOT NULL DEFAULT '{}',
    project TEXT,
    importance INTEGER NOT NULL DEFAULT 5,
    tier INTEGER NOT NULL DEFAULT 1,
    parent_id INTEGER REFERENCES memories(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_profile_created
    ON memories(profile, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_memories_profile_importance
    ON memories(profile, importance DESC);
CREATE INDEX IF NOT EXISTS idx_memories_profile_tier
    ON memories(profile, tier);
CREATE INDEX IF NOT EXISTS idx_memories_profile_project
    ON memories(profile, project);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    summary,
    tags,
    content = 'memories',
    content_rowid = 'id'
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content, summary, tags)
    VALUES (NEW.id, NEW.content, NEW.summary, NEW.tags_json);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content, summary, tags)
    VALUES ('delete', OLD.id, OLD.content, OLD.summary, OLD.tags_json);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content, summary, tags)
    VALUES ('delete', OLD.id, OLD.content, OLD.summary, OLD.tags_json);
    INSERT INTO memories_fts(rowid, content, summary, tags)
    VALUES (NEW.id, NEW.content, NEW.summary, NEW.tags_json);
END;

CREATE TABLE IF NOT EXISTS memory_archive (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    full_content TEXT NOT NULL,
    archived_at TEXT NOT NULL
);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    profile TEXT NOT NULL,
    entities_json TEXT NOT NULL DEFAULT '[]',
    vector_blob BLOB,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_graph_nodes_profile ON graph_nodes(profile);

CREATE TABLE IF NOT EXISTS graph_edges (
    source_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    profile TEXT NOT NULL,
    weight REAL NOT NULL,
    kind TEXT NOT NULL,
    shared_entities_json TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (source_id, target_id),
    CHECK (source_id < target_id)
);
CREATE INDEX IF NOT EXISTS idx_graph_edges_profile ON graph_edges(profile);
CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);

CREATE TABLE IF NOT EXISTS graph_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    member_count INTEGER NOT NULL DEFAULT 0,
    avg_importance REAL NOT NULL DEFAULT 0,
    parent_cluster_id INTEGER REFERENCES graph_clusters(id) ON DELETE SET NULL,
    depth INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_graph_clusters_profile ON graph_clusters(profile);

CREATE TABLE IF NOT EXISTS cluster_members (
    cluster_id INTEGER NOT NULL REFERENCES graph_clusters(id) ON DELETE CASCADE,
    memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    PRIMARY KEY (cluster_id, memory_id)
);
CREATE INDEX IF NOT EXISTS idx_cluster_members_memory ON cluster_members(memory_id);
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS identity_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile TEXT NOT NULL,
    type TEXT NOT NULL,
    category TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0,
    evidence_count INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    UNIQUE (profile, type, category, value)
);
CREATE INDEX IF NOT EXISTS idx_patterns_profile ON identity_patterns(profile);

CREATE TABLE IF NOT EXISTS pattern_examples (
    pattern_id INTEGER NOT NULL REFERENCES identity_patterns(id) ON DELETE CASCADE,
    memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    excerpt TEXT NOT NULL,
    relevance REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (pattern_id, memory_id)
);
"#;

/// Apply every migration newer than the current `schema_version`.
///
/// Rejects (returns `Err`) if the database's recorded version is
/// higher than the newest migration this binary knows about — that
/// would be a downgrade, which spec §4.A explicitly does not support.
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0);

    let newest_known = MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0);
    if current > newest_known {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_SCHEMA),
            Some(format!(
                "database schema version {current} is newer than supported {newest_known}"
            )),
        ));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.up)?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(version = migration.version, desc = migration.description, "applied migration");
    }

    Ok(())
}
