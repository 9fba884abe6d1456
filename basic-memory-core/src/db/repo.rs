//! Database repository layer
//!
//! Provides query and insert operations for entities, observations, and
//! relations, plus the forward-reference and permalink-collision
//! resolution primitives the sync orchestrator composes into the
//! two-pass protocol.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

/// Fields needed to upsert an entity by `file_path`. Distinct from
/// [`Entity`] because `id`/`checksum` are assigned by the store, not the
/// caller.
///
/// `created`/`modified` are the entity's frontmatter-declared timestamps,
/// already falling back to filesystem ctime/mtime by the time the caller
/// builds this (see [`crate::scan::file_times`]). `None` only when
/// neither source is available (e.g. an in-memory test fixture), in
/// which case the store stamps `Utc::now()`.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub permalink: Option<String>,
    pub title: String,
    pub entity_type: String,
    pub file_path: String,
    pub content_type: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use, e.g. the search indexer)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Entity operations
    // ============================================

    /// Insert a new entity row with a null checksum; the caller commits
    /// the checksum once the entity's relations are fully written.
    pub fn insert_entity(&self, entity: &NewEntity) -> Result<Entity> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let created_at = entity.created.unwrap_or(now);
        let updated_at = entity.modified.unwrap_or(now);
        conn.execute(
            r#"
            INSERT INTO entities (permalink, title, entity_type, file_path, content_type, checksum, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)
            "#,
            params![
                entity.permalink,
                entity.title,
                entity.entity_type,
                entity.file_path,
                entity.content_type,
                created_at.to_rfc3339(),
                updated_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Entity {
            id,
            permalink: entity.permalink.clone(),
            title: entity.title.clone(),
            entity_type: entity.entity_type.clone(),
            file_path: entity.file_path.clone(),
            content_type: entity.content_type.clone(),
            checksum: None,
            created_at,
            updated_at,
        })
    }

    /// Update an existing entity's mutable fields in place (identified by
    /// `file_path`), without touching its checksum or `created_at`.
    pub fn update_entity_fields(&self, id: i64, entity: &NewEntity) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated_at = entity.modified.unwrap_or_else(Utc::now);
        conn.execute(
            r#"
            UPDATE entities SET
                permalink = ?2,
                title = ?3,
                entity_type = ?4,
                file_path = ?5,
                content_type = ?6,
                checksum = NULL,
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                id,
                entity.permalink,
                entity.title,
                entity.entity_type,
                entity.file_path,
                entity.content_type,
                updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Commit the final checksum for an entity (last step of phase 5).
    pub fn set_entity_checksum(&self, id: i64, checksum: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE entities SET checksum = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, checksum, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Rewrite an entity's `file_path` (move) preserving everything else.
    pub fn update_entity_path(&self, id: i64, new_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE entities SET file_path = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, new_path, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Clear an entity's permalink (used when a moved opaque file has no
    /// frontmatter to recompute one from).
    pub fn clear_entity_permalink(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE entities SET permalink = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_entity_permalink(&self, id: i64, permalink: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE entities SET permalink = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, permalink, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM entities WHERE id = ?", [id], Self::row_to_entity)
            .optional()
            .map_err(Error::from)
    }

    pub fn find_by_permalink(&self, permalink: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM entities WHERE permalink = ?",
            [permalink],
            Self::row_to_entity,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn find_by_title(&self, title: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM entities WHERE title = ?", [title], Self::row_to_entity)
            .optional()
            .map_err(Error::from)
    }

    pub fn find_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM entities WHERE file_path = ?",
            [file_path],
            Self::row_to_entity,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Entities whose permalink matches a shell glob (`*`, `?`).
    pub fn find_by_permalink_glob(&self, pattern: &str) -> Result<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM entities WHERE permalink GLOB ?")?;
        let rows = stmt
            .query_map([pattern], Self::row_to_entity)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn all_file_checksums(&self) -> Result<std::collections::HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT file_path, checksum FROM entities WHERE checksum IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| {
                let path: String = row.get(0)?;
                let checksum: String = row.get(1)?;
                Ok((path, checksum))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete an entity and its owned rows by `file_path`. Cascades to
    /// observations and outgoing relations; incoming relations have
    /// their `to_id` cleared by the `ON DELETE SET NULL` foreign key,
    /// preserving `to_name`.
    pub fn delete_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        let entity = conn
            .query_row(
                "SELECT * FROM entities WHERE file_path = ?",
                [file_path],
                Self::row_to_entity,
            )
            .optional()?;
        if let Some(ref e) = entity {
            conn.execute("DELETE FROM entities WHERE id = ?", [e.id])?;
        }
        Ok(entity)
    }

    /// Returns `candidate` if free, else the first `candidate-N` (N >= 1)
    /// that is not already taken.
    pub fn allocate_unique_permalink(&self, candidate: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let taken = |p: &str| -> Result<bool> {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entities WHERE permalink = ?",
                [p],
                |r| r.get(0),
            )?;
            Ok(exists > 0)
        };

        if !taken(candidate)? {
            return Ok(candidate.to_string());
        }
        for n in 1..10_000 {
            let attempt = format!("{}-{}", candidate, n);
            if !taken(&attempt)? {
                return Ok(attempt);
            }
        }
        Err(Error::Conflict {
            permalink: candidate.to_string(),
            attempts: 10_000,
        })
    }

    fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
        let created_at_str: String = row.get("created_at")?;
        let updated_at_str: String = row.get("updated_at")?;
        Ok(Entity {
            id: row.get("id")?,
            permalink: row.get("permalink")?,
            title: row.get("title")?,
            entity_type: row.get("entity_type")?,
            file_path: row.get("file_path")?,
            content_type: row.get("content_type")?,
            checksum: row.get("checksum")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ============================================
    // Observation operations
    // ============================================

    /// Atomically replace an entity's observations, deduplicating by
    /// `(category, content)`.
    pub fn replace_observations(&self, entity_id: i64, observations: &[ParsedObservation]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM observations WHERE entity_id = ?", [entity_id])?;

        let mut seen = std::collections::HashSet::new();
        for obs in observations {
            let key = (obs.category.clone(), obs.content.clone());
            if !seen.insert(key) {
                continue;
            }
            tx.execute(
                r#"
                INSERT INTO observations (entity_id, category, content)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(entity_id, category, content) DO NOTHING
                "#,
                params![entity_id, obs.category, obs.content],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_observations(&self, entity_id: i64) -> Result<Vec<Observation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM observations WHERE entity_id = ? ORDER BY id")?;
        let rows = stmt
            .query_map([entity_id], Self::row_to_observation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn row_to_observation(row: &Row) -> rusqlite::Result<Observation> {
        Ok(Observation {
            id: row.get("id")?,
            entity_id: row.get("entity_id")?,
            category: row.get("category")?,
            content: row.get("content")?,
        })
    }

    // ============================================
    // Relation operations
    // ============================================

    /// Atomically replace an entity's outgoing relations, deduplicating
    /// by `(relation_type, to_name)`. Each relation is (re)resolved
    /// against `to_id` via `resolved_id`, which the orchestrator
    /// computes through the link resolver before calling this.
    pub fn replace_relations(
        &self,
        from_id: i64,
        relations: &[(ParsedRelation, Option<i64>)],
    ) -> Result<Vec<Relation>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM relations WHERE from_id = ?", [from_id])?;

        let mut seen = std::collections::HashSet::new();
        let mut inserted = Vec::new();
        for (rel, resolved_id) in relations {
            let key = (rel.relation_type.clone(), rel.target.clone());
            if !seen.insert(key) {
                continue;
            }
            tx.execute(
                r#"
                INSERT INTO relations (from_id, to_id, to_name, relation_type, context)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![from_id, resolved_id, rel.target, rel.relation_type, rel.context],
            )?;
            let id = tx.last_insert_rowid();
            inserted.push(Relation {
                id,
                from_id,
                to_id: *resolved_id,
                to_name: rel.target.clone(),
                relation_type: rel.relation_type.clone(),
                context: rel.context.clone(),
            });
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Relations still pointing at `to_name` with no resolved target.
    /// Called after each entity's relations are written, with the
    /// entity's own permalink and title, to bind forward references that
    /// named this entity before it existed.
    pub fn resolve_pending(&self, to_name: &str, resolved_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM relations WHERE to_id IS NULL AND to_name = ?",
        )?;
        let ids: Vec<i64> = stmt
            .query_map([to_name], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        for id in &ids {
            conn.execute(
                "UPDATE relations SET to_id = ?2 WHERE id = ?1",
                params![id, resolved_id],
            )?;
        }
        Ok(ids)
    }

    pub fn outgoing_relations(&self, entity_id: i64) -> Result<Vec<Relation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM relations WHERE from_id = ? ORDER BY id")?;
        let rows = stmt
            .query_map([entity_id], Self::row_to_relation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn incoming_relations(&self, entity_id: i64) -> Result<Vec<Relation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM relations WHERE to_id = ? ORDER BY id")?;
        let rows = stmt
            .query_map([entity_id], Self::row_to_relation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn row_to_relation(row: &Row) -> rusqlite::Result<Relation> {
        Ok(Relation {
            id: row.get("id")?,
            from_id: row.get("from_id")?,
            to_id: row.get("to_id")?,
            to_name: row.get("to_name")?,
            relation_type: row.get("relation_type")?,
            context: row.get("context")?,
        })
    }

    // ============================================
    // Bookkeeping
    // ============================================

    pub fn count_entities(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?)
    }

    pub fn count_observations(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?)
    }

    pub fn count_relations(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM relations", [], |r| r.get(0))?)
    }

    /// Entities with a null checksum: the signature of a sync that was
    /// interrupted before phase 5 committed.
    pub fn entities_with_null_checksum(&self) -> Result<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM entities WHERE checksum IS NULL")?;
        let rows = stmt
            .query_map([], Self::row_to_entity)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
