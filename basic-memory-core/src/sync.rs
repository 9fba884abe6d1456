//! Sync orchestration
//!
//! [`SyncCoordinator::sync_all`] drives the full two-pass protocol that
//! brings the database in line with the files under the project root:
//!
//! 0. Scan the tree and diff against stored checksums.
//! 1. Delete entities for files that disappeared.
//! 2. Rewrite `file_path` for files that moved (matched by checksum).
//! 3. Parse every new/modified file into a [`ParsedEntity`].
//! 4. Pass one: upsert every entity's own fields (no relations yet), so
//!    forward references from earlier files in this sync can find the
//!    entities that later files introduce. If permalink collision
//!    resolution picks a value different from what's in the file's own
//!    frontmatter, the file is rewritten on disk with the allocated
//!    permalink — the only mutation sync performs on a source file.
//! 5. Pass two: resolve and write each entity's relations, committing
//!    the entity's checksum last so an interrupted sync leaves a
//!    detectable trail (`checksum IS NULL`).
//! 6. Queue a re-index of everything touched onto the background search
//!    indexer.
//!
//! Per-file parse/write errors are collected into [`SyncReport::errors`]
//! rather than aborting the run; a file that can't be read or hashed
//! during the scan phase is a fatal error for the whole sync, since at
//! that point we don't even know what changed.

use crate::db::{Database, NewEntity};
use crate::error::Result;
use crate::link_resolver::LinkResolver;
use crate::markdown::parse_entity;
use crate::scan::{diff_changes, file_times, scan_tree};
use crate::search::{IndexOp, SearchIndexer};
use crate::types::{ParsedEntity, SyncReport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct SyncCoordinator {
    db: Arc<Database>,
    indexer: SearchIndexer,
    root: PathBuf,
}

impl SyncCoordinator {
    pub fn new(db: Arc<Database>, root: impl Into<PathBuf>) -> Self {
        let indexer = SearchIndexer::spawn(db.clone());
        Self {
            db,
            indexer,
            root: root.into(),
        }
    }

    /// Block until every search-index write queued by the sync just run
    /// has been applied. Mainly useful for tests and for `status`-style
    /// commands that want a read-your-writes view right after a sync.
    pub fn flush_index(&self) {
        self.indexer.flush();
    }

    pub fn sync_all(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        // Phase 0: scan and diff.
        let scan = scan_tree(&self.root)?;
        let stored = self.db.all_file_checksums()?;
        let changes = diff_changes(&scan, &stored);

        report.checksums = scan.clone();

        // Phase 1: deletions.
        for path in &changes.deleted {
            if let Err(e) = self.delete_file(path) {
                report.errors.push((path.clone(), e.to_string()));
                continue;
            }
            report.deleted.push(path.clone());
        }

        // Phase 2: moves.
        for (old_path, new_path) in &changes.moves {
            if let Err(e) = self.move_file(old_path, new_path) {
                report.errors.push((new_path.clone(), e.to_string()));
                continue;
            }
            report.moves.push((old_path.clone(), new_path.clone()));
        }

        // Phase 3: parse every new/modified file.
        let mut parsed: HashMap<String, ParsedEntity> = HashMap::new();
        let mut touched: Vec<String> = Vec::new();
        touched.extend(changes.new.iter().cloned());
        touched.extend(changes.modified.iter().cloned());

        for path in &touched {
            match self.read_and_parse(path) {
                Ok(entity) => {
                    parsed.insert(path.clone(), entity);
                }
                Err(e) => report.errors.push((path.clone(), e.to_string())),
            }
        }

        // Phase 4: upsert entity fields (no relations) for every parsed
        // file, so later files' forward references can resolve against
        // entities introduced earlier in this same sync. A permalink
        // collision may cause the file's frontmatter to be rewritten on
        // disk, in which case the checksum committed in phase 5 must
        // reflect the rewritten bytes, not the pre-rewrite scan.
        let mut entity_ids: HashMap<String, i64> = HashMap::new();
        let mut rewritten_checksums: HashMap<String, String> = HashMap::new();
        for path in &touched {
            let Some(entity) = parsed.get(path) else {
                continue;
            };
            match self.upsert_entity_fields(path, entity) {
                Ok((id, rewritten)) => {
                    entity_ids.insert(path.clone(), id);
                    if let Some(checksum) = rewritten {
                        rewritten_checksums.insert(path.clone(), checksum);
                    }
                }
                Err(e) => report.errors.push((path.clone(), e.to_string())),
            }
        }

        // Phase 5: resolve and write relations, then commit checksums.
        let resolver = LinkResolver::new(&self.db);
        for path in &touched {
            let Some(entity) = parsed.get(path) else {
                continue;
            };
            let Some(&entity_id) = entity_ids.get(path) else {
                continue;
            };
            let checksum = rewritten_checksums
                .get(path)
                .cloned()
                .or_else(|| scan.get(path).cloned())
                .unwrap_or_default();
            if let Err(e) =
                self.write_relations_and_checksum(entity_id, entity, &checksum, &resolver)
            {
                report.errors.push((path.clone(), e.to_string()));
                continue;
            }
            if changes.new.contains(path) {
                report.new.push(path.clone());
            } else {
                report.modified.push(path.clone());
            }
        }

        // Phase 6: queue a re-index for everything just written. Runs on
        // the indexer's background thread; by the time this function
        // returns the relational tables are consistent but the search
        // index may still be catching up.
        for (path, &entity_id) in &entity_ids {
            if let Err(e) = self.queue_reindex(entity_id) {
                report.errors.push((path.clone(), e.to_string()));
            }
        }

        Ok(report)
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        if let Some(entity) = self.db.delete_by_file_path(path)? {
            self.indexer.submit(IndexOp::DeleteEntity(entity.id));
        }
        Ok(())
    }

    /// Rewrite `file_path` for a moved entity. Its permalink from
    /// frontmatter is preserved if present; if absent, it's cleared for
    /// opaque files and recomputed from the new path for Markdown files.
    fn move_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let Some(entity) = self.db.find_by_file_path(old_path)? else {
            return Ok(());
        };
        self.db.update_entity_path(entity.id, new_path)?;

        if !new_path.ends_with(".md") {
            self.db.clear_entity_permalink(entity.id)?;
        } else {
            let has_permalink = self
                .read_and_parse(new_path)
                .ok()
                .map(|p| p.frontmatter.permalink.is_some())
                .unwrap_or(false);
            if !has_permalink {
                let derived = derive_permalink(new_path);
                let allocated = self.db.allocate_unique_permalink(&derived)?;
                self.db.set_entity_permalink(entity.id, &allocated)?;
            }
        }

        self.queue_reindex(entity.id)?;
        Ok(())
    }

    fn read_and_parse(&self, path: &str) -> Result<ParsedEntity> {
        let full_path: PathBuf = [self.root.as_path(), Path::new(path)].iter().collect();
        let bytes = std::fs::read(&full_path).map_err(|e| crate::error::Error::Scan {
            path: full_path.clone(),
            source: e,
        })?;
        Ok(parse_entity(path, &bytes))
    }

    /// Returns the entity's id and, if a permalink collision forced a
    /// frontmatter rewrite, the checksum of the rewritten file.
    fn upsert_entity_fields(&self, path: &str, entity: &ParsedEntity) -> Result<(i64, Option<String>)> {
        let existing = self.db.find_by_file_path(path)?;

        let permalink = match (&entity.frontmatter.permalink, &existing) {
            (Some(candidate), Some(e)) => match &e.permalink {
                Some(current) if current == candidate => Some(current.clone()),
                // An already-known entity asking for a permalink another
                // entity holds keeps its own permalink rather than being
                // pushed onto a suffixed variant of someone else's slug —
                // only brand-new entities get suffixed on collision.
                Some(current) => {
                    let taken_elsewhere = self
                        .db
                        .find_by_permalink(candidate)?
                        .map(|other| other.id != e.id)
                        .unwrap_or(false);
                    if taken_elsewhere {
                        Some(current.clone())
                    } else {
                        Some(candidate.clone())
                    }
                }
                None => Some(self.db.allocate_unique_permalink(candidate)?),
            },
            (Some(candidate), None) => Some(self.db.allocate_unique_permalink(candidate)?),
            (None, Some(e)) => e.permalink.clone(),
            (None, None) => Some(self.db.allocate_unique_permalink(&derive_permalink(path))?),
        };

        let mut rewritten_checksum = None;
        if let Some(allocated) = &permalink {
            let needs_rewrite = path.ends_with(".md")
                && entity.frontmatter.permalink.as_deref() != Some(allocated.as_str());
            if needs_rewrite {
                rewritten_checksum = Some(self.rewrite_permalink_on_disk(path, allocated)?);
            }
        }

        let (created, modified) = self.entity_timestamps(path, entity);

        let new_entity = NewEntity {
            permalink,
            title: entity.title.clone(),
            entity_type: entity
                .entity_type
                .clone()
                .unwrap_or_else(|| "note".to_string()),
            file_path: entity.file_path.clone(),
            content_type: entity.content_type.clone(),
            created,
            modified,
        };

        let id = match existing {
            Some(e) => {
                self.db.update_entity_fields(e.id, &new_entity)?;
                e.id
            }
            None => self.db.insert_entity(&new_entity)?.id,
        };
        Ok((id, rewritten_checksum))
    }

    /// An entity's `created`/`modified`, each taken from frontmatter if
    /// present, else the file's own ctime/mtime.
    fn entity_timestamps(
        &self,
        path: &str,
        entity: &ParsedEntity,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        if entity.frontmatter.created.is_some() && entity.frontmatter.modified.is_some() {
            return (entity.frontmatter.created, entity.frontmatter.modified);
        }
        let full_path: PathBuf = [self.root.as_path(), Path::new(path)].iter().collect();
        let (fs_created, fs_modified) = file_times(&full_path)
            .map(|(c, m)| (Some(c), Some(m)))
            .unwrap_or((None, None));
        (
            entity.frontmatter.created.or(fs_created),
            entity.frontmatter.modified.or(fs_modified),
        )
    }

    /// Rewrite the file's `permalink:` frontmatter key to match the
    /// allocated permalink. The only mutation sync performs on a source
    /// file. Returns the checksum of the rewritten bytes so the caller
    /// can commit it instead of the pre-rewrite checksum from the scan.
    fn rewrite_permalink_on_disk(&self, path: &str, permalink: &str) -> Result<String> {
        let full_path: PathBuf = [self.root.as_path(), Path::new(path)].iter().collect();
        let bytes = std::fs::read(&full_path).map_err(|e| crate::error::Error::Scan {
            path: full_path.clone(),
            source: e,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let rewritten = crate::markdown::rewrite_permalink(&text, permalink);
        std::fs::write(&full_path, rewritten.as_bytes()).map_err(|e| crate::error::Error::Scan {
            path: full_path.clone(),
            source: e,
        })?;
        Ok(crate::hash::hash_bytes(rewritten.as_bytes()))
    }

    fn write_relations_and_checksum(
        &self,
        entity_id: i64,
        entity: &ParsedEntity,
        checksum: &str,
        resolver: &LinkResolver,
    ) -> Result<()> {
        self.db.replace_observations(entity_id, &entity.observations)?;

        let mut resolved = Vec::with_capacity(entity.relations.len());
        for rel in &entity.relations {
            let target = resolver.resolve(&rel.target)?.map(|e| e.id);
            resolved.push((rel.clone(), target));
        }
        self.db.replace_relations(entity_id, &resolved)?;

        if let Some(found) = self.db.find_by_id(entity_id)? {
            if let Some(permalink) = &found.permalink {
                self.db.resolve_pending(permalink, entity_id)?;
            }
            self.db.resolve_pending(&found.title, entity_id)?;
        }

        self.db.set_entity_checksum(entity_id, checksum)?;
        Ok(())
    }

    fn queue_reindex(&self, entity_id: i64) -> Result<()> {
        let Some(entity) = self.db.find_by_id(entity_id)? else {
            return Ok(());
        };
        let observations = self
            .db
            .get_observations(entity_id)?
            .into_iter()
            .map(|o| (o.category, o.content))
            .collect::<Vec<_>>();
        let relations = self.db.outgoing_relations(entity_id)?;
        self.indexer.submit(IndexOp::Index {
            entity,
            observations,
            relations,
        });
        Ok(())
    }
}

/// Derive a permalink from a file path: lowercase, replace whitespace
/// and underscores with hyphens, keep `/` as a segment separator, and
/// strip the extension.
pub fn derive_permalink(file_path: &str) -> String {
    let without_ext = match file_path.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_path,
    };
    without_ext
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .collect()
}
