//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Entities, Observations, Relations
    r#"
    -- ============================================
    -- Entities: file-backed nodes in the knowledge graph
    -- ============================================

    CREATE TABLE entities (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        permalink        TEXT UNIQUE,
        title            TEXT NOT NULL,
        entity_type      TEXT NOT NULL DEFAULT 'note',
        file_path        TEXT NOT NULL UNIQUE,
        content_type     TEXT NOT NULL DEFAULT 'text/markdown',
        checksum         TEXT,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE INDEX idx_entities_permalink ON entities(permalink);
    CREATE INDEX idx_entities_title ON entities(title);
    CREATE INDEX idx_entities_type ON entities(entity_type);

    -- ============================================
    -- Observations: categorized assertions owned by an entity
    -- ============================================

    CREATE TABLE observations (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id        INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        category         TEXT NOT NULL,
        content          TEXT NOT NULL,

        UNIQUE(entity_id, category, content)
    );

    CREATE INDEX idx_observations_entity ON observations(entity_id);

    -- ============================================
    -- Relations: directed, typed edges between entities.
    -- to_id is a weak reference: ON DELETE SET NULL instead of cascade,
    -- so a relation survives its target's deletion as an unresolved
    -- forward reference (to_name is always preserved).
    -- ============================================

    CREATE TABLE relations (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        from_id          INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        to_id            INTEGER REFERENCES entities(id) ON DELETE SET NULL,
        to_name          TEXT NOT NULL,
        relation_type    TEXT NOT NULL,
        context          TEXT
    );

    CREATE INDEX idx_relations_from ON relations(from_id);
    CREATE INDEX idx_relations_to ON relations(to_id);
    CREATE INDEX idx_relations_to_name ON relations(to_name);
    CREATE UNIQUE INDEX idx_relations_resolved
        ON relations(from_id, to_id, relation_type) WHERE to_id IS NOT NULL;
    CREATE UNIQUE INDEX idx_relations_pending
        ON relations(from_id, to_name, relation_type) WHERE to_id IS NULL;
    "#,
    // Version 2: FTS5 search index, kept consistent with entities/
    // observations/relations by the search indexer rather than by triggers,
    // so a sync that fails mid-cycle never leaves the index half-written
    // for a row the graph tables don't yet agree on.
    r#"
    CREATE VIRTUAL TABLE search_index USING fts5(
        title,
        content,
        permalink UNINDEXED,
        file_path UNINDEXED,
        item_type UNINDEXED,
        entity_id UNINDEXED,
        from_id UNINDEXED,
        to_id UNINDEXED,
        relation_type UNINDEXED,
        created_at UNINDEXED,
        updated_at UNINDEXED
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
