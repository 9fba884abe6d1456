//! Full-text search indexing
//!
//! Maintains the `search_index` FTS5 virtual table alongside the
//! relational tables. An entity, its observations, and its resolved
//! outgoing relations are each indexed as their own row so a query for
//! a relation type or an observation category can match directly.
//! Unresolved relations (`to_id` still null, a forward reference
//! waiting on a target that hasn't synced yet) are left out: there's
//! nothing to search until they resolve.

use crate::db::Database;
use crate::error::Result;
use crate::types::{Entity, Relation, SearchItemType, SearchQuery, SearchResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Index (or re-index) everything owned by `entity`: the entity itself,
/// its observations, and its resolved outgoing relations. Callers first
/// delete the entity's previous rows via [`delete_by_entity_id`].
pub fn index_entity(
    conn: &Connection,
    entity: &Entity,
    observations: &[(String, String)],
    relations: &[Relation],
) -> Result<()> {
    delete_by_entity_id(conn, entity.id)?;

    conn.execute(
        r#"
        INSERT INTO search_index
            (title, content, permalink, file_path, item_type, entity_id, from_id, to_id, relation_type, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 'entity', ?5, NULL, NULL, NULL, ?6, ?7)
        "#,
        params![
            entity.title,
            entity.title,
            entity.permalink,
            entity.file_path,
            entity.id,
            entity.created_at.to_rfc3339(),
            entity.updated_at.to_rfc3339(),
        ],
    )?;

    for (category, content) in observations {
        conn.execute(
            r#"
            INSERT INTO search_index
                (title, content, permalink, file_path, item_type, entity_id, from_id, to_id, relation_type, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'observation', ?5, NULL, NULL, NULL, ?6, ?6)
            "#,
            params![
                category,
                content,
                entity.permalink,
                entity.file_path,
                entity.id,
                entity.updated_at.to_rfc3339(),
            ],
        )?;
    }

    for rel in relations.iter().filter(|r| r.to_id.is_some()) {
        conn.execute(
            r#"
            INSERT INTO search_index
                (title, content, permalink, file_path, item_type, entity_id, from_id, to_id, relation_type, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'relation', ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
            params![
                rel.relation_type,
                rel.to_name,
                entity.permalink,
                entity.file_path,
                entity.id,
                rel.from_id,
                rel.to_id,
                rel.relation_type,
                entity.updated_at.to_rfc3339(),
            ],
        )?;
    }

    Ok(())
}

pub fn delete_by_entity_id(conn: &Connection, entity_id: i64) -> Result<()> {
    conn.execute("DELETE FROM search_index WHERE entity_id = ?", [entity_id])?;
    Ok(())
}

pub fn delete_by_permalink(conn: &Connection, permalink: &str) -> Result<()> {
    conn.execute("DELETE FROM search_index WHERE permalink = ?", [permalink])?;
    Ok(())
}

/// Run a search against the index. `query.text` is escaped for FTS5's
/// query mini-language before binding; an absent `text` matches
/// everything (subject to `types`/`after` filters), ordered by recency.
pub fn search(conn: &Connection, query: &SearchQuery) -> Result<Vec<SearchResult>> {
    let mut sql = String::from(
        "SELECT rowid, title, content, permalink, file_path, item_type, entity_id, from_id, to_id, relation_type, created_at, updated_at",
    );

    let mut conditions: Vec<String> = Vec::new();
    let has_text = query.text.as_ref().map(|t| !t.trim().is_empty()).unwrap_or(false);

    if has_text {
        sql.push_str(", bm25(search_index) AS rank FROM search_index WHERE search_index MATCH ?");
    } else {
        sql.push_str(", 0.0 AS rank FROM search_index WHERE 1 = 1");
    }

    if !query.types.is_empty() {
        let list = query
            .types
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        conditions.push(format!("item_type IN ({})", list));
    }
    if query.after.is_some() {
        conditions.push("updated_at >= ?".to_string());
    }

    for cond in &conditions {
        sql.push_str(" AND ");
        sql.push_str(cond);
    }

    sql.push_str(" ORDER BY rank LIMIT ? OFFSET ?");

    let mut stmt = conn.prepare(&sql)?;

    let escaped_text = query.text.as_deref().map(escape_fts5_query);
    let page_size = query.page_size.max(1) as i64;
    let offset = (query.page * page_size.max(0) as usize) as i64;

    let rows = if has_text {
        let text = escaped_text.unwrap();
        if let Some(after) = query.after {
            stmt.query_map(
                params![text, after.to_rfc3339(), page_size, offset],
                row_to_search_result,
            )?
            .filter_map(|r| r.ok())
            .collect()
        } else {
            stmt.query_map(params![text, page_size, offset], row_to_search_result)?
                .filter_map(|r| r.ok())
                .collect()
        }
    } else if let Some(after) = query.after {
        stmt.query_map(params![after.to_rfc3339(), page_size, offset], row_to_search_result)?
            .filter_map(|r| r.ok())
            .collect()
    } else {
        stmt.query_map(params![page_size, offset], row_to_search_result)?
            .filter_map(|r| r.ok())
            .collect()
    };
    Ok(rows)
}

fn row_to_search_result(row: &Row) -> rusqlite::Result<SearchResult> {
    let item_type_str: String = row.get("item_type")?;
    let item_type = item_type_str.parse().unwrap_or(SearchItemType::Entity);
    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;
    Ok(SearchResult {
        item_type,
        id: row.get("rowid")?,
        entity_id: row.get("entity_id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        permalink: row.get("permalink")?,
        file_path: row.get("file_path")?,
        from_id: row.get("from_id")?,
        to_id: row.get("to_id")?,
        relation_type: row.get("relation_type")?,
        score: row.get("rank")?,
        updated_at: parse_timestamp(&updated_at_str, &created_at_str),
    })
}

fn parse_timestamp(updated: &str, created: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(updated)
        .or_else(|_| DateTime::parse_from_rfc3339(created))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Escape a user-supplied string for use in an FTS5 `MATCH` query: tokens
/// containing anything other than alphanumerics are double-quoted, with
/// internal quotes doubled.
pub fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            if tok.chars().all(|c| c.is_alphanumeric()) {
                tok.to_string()
            } else {
                format!("\"{}\"", tok.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A pending write to the search index, queued by the sync orchestrator
/// once an entity's row in the relational tables has committed.
pub enum IndexOp {
    Index {
        entity: Entity,
        observations: Vec<(String, String)>,
        relations: Vec<Relation>,
    },
    DeleteEntity(i64),
    DeletePermalink(String),
    /// Not a write; lets a caller block until every op queued before it
    /// has been applied, without waiting for the indexer to be dropped.
    Barrier(std::sync::mpsc::Sender<()>),
}

/// Runs [`IndexOp`]s on a single background worker thread, so the sync
/// orchestrator's per-entity transaction can commit without waiting for
/// the index write. A bounded channel feeds a loop that drains pending
/// operations and applies them to the database.
pub struct SearchIndexer {
    tx: SyncSender<IndexOp>,
    worker: Option<JoinHandle<()>>,
}

impl SearchIndexer {
    pub fn spawn(db: Arc<Database>) -> Self {
        let (tx, rx) = sync_channel::<IndexOp>(256);
        let worker = std::thread::spawn(move || {
            while let Ok(op) = rx.recv() {
                if let Err(e) = apply(&db, op) {
                    tracing::warn!(error = %e, "search index write failed");
                }
            }
        });
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Queue an index write. Never blocks the caller on disk I/O; only
    /// blocks if the channel's bounded buffer is full.
    pub fn submit(&self, op: IndexOp) {
        if self.tx.send(op).is_err() {
            tracing::warn!("search indexer worker thread has exited; dropping index op");
        }
    }

    /// Block until every op submitted before this call has been applied.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        if self.tx.send(IndexOp::Barrier(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.recv();
    }
}

impl Drop for SearchIndexer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn apply(db: &Database, op: IndexOp) -> Result<()> {
    let conn = db.connection();
    match op {
        IndexOp::Index {
            entity,
            observations,
            relations,
        } => index_entity(&conn, &entity, &observations, &relations),
        IndexOp::DeleteEntity(id) => delete_by_entity_id(&conn, id),
        IndexOp::DeletePermalink(permalink) => delete_by_permalink(&conn, &permalink),
        IndexOp::Barrier(ack) => {
            let _ = ack.send(());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewEntity;
    use crate::types::ParsedRelation;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_index_and_search_entity() {
        let db = setup();
        let entity = db
            .insert_entity(&NewEntity {
                permalink: Some("notes/a".into()),
                title: "Design Notes".into(),
                entity_type: "note".into(),
                file_path: "notes/a.md".into(),
                content_type: "text/markdown".into(),
                created: None,
                modified: None,
            })
            .unwrap();
        {
            let conn = db.connection();
            index_entity(&conn, &entity, &[], &[]).unwrap();
        }

        let conn = db.connection();
        let results = search(
            &conn,
            &SearchQuery {
                text: Some("Design".into()),
                page_size: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Design Notes");
    }

    #[test]
    fn test_escape_fts5_query_quotes_special_tokens() {
        assert_eq!(escape_fts5_query("hello world"), "hello world");
        assert_eq!(escape_fts5_query("foo(bar)"), "\"foo(bar)\"");
    }

    #[test]
    fn test_delete_by_entity_id_removes_all_rows() {
        let db = setup();
        let entity = db
            .insert_entity(&NewEntity {
                permalink: Some("notes/a".into()),
                title: "A".into(),
                entity_type: "note".into(),
                file_path: "notes/a.md".into(),
                content_type: "text/markdown".into(),
                created: None,
                modified: None,
            })
            .unwrap();
        let rel = Relation {
            id: 0,
            from_id: entity.id,
            to_id: None,
            to_name: "b".into(),
            relation_type: ParsedRelation {
                relation_type: "depends_on".into(),
                target: "b".into(),
                context: None,
            }
            .relation_type,
            context: None,
        };
        {
            let conn = db.connection();
            index_entity(&conn, &entity, &[("note".into(), "text".into())], &[rel]).unwrap();
            delete_by_entity_id(&conn, entity.id).unwrap();
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM search_index", [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_index_entity_skips_unresolved_relations() {
        let db = setup();
        let entity = db
            .insert_entity(&NewEntity {
                permalink: Some("notes/a".into()),
                title: "A".into(),
                entity_type: "note".into(),
                file_path: "notes/a.md".into(),
                content_type: "text/markdown".into(),
                created: None,
                modified: None,
            })
            .unwrap();
        let unresolved = Relation {
            id: 0,
            from_id: entity.id,
            to_id: None,
            to_name: "missing-target".into(),
            relation_type: "depends_on".into(),
            context: None,
        };
        let resolved = Relation {
            id: 0,
            from_id: entity.id,
            to_id: Some(99),
            to_name: "known-target".into(),
            relation_type: "depends_on".into(),
            context: None,
        };

        let conn = db.connection();
        index_entity(&conn, &entity, &[], &[unresolved, resolved]).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM search_index WHERE item_type = 'relation'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_search_indexer_applies_queued_ops() {
        let db = Arc::new(setup());
        let entity = db
            .insert_entity(&NewEntity {
                permalink: Some("notes/a".into()),
                title: "Queued".into(),
                entity_type: "note".into(),
                file_path: "notes/a.md".into(),
                content_type: "text/markdown".into(),
                created: None,
                modified: None,
            })
            .unwrap();

        let indexer = SearchIndexer::spawn(db.clone());
        indexer.submit(IndexOp::Index {
            entity: entity.clone(),
            observations: vec![],
            relations: vec![],
        });
        drop(indexer); // joins the worker, guaranteeing the write lands

        let conn = db.connection();
        let results = search(
            &conn,
            &SearchQuery {
                text: Some("Queued".into()),
                page_size: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(results.len(), 1);
    }
}
