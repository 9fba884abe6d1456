//! Relation target resolution
//!
//! Turns a relation's raw target text (as written after `[[...]]` in a
//! Markdown file) into an entity, if one can be found. Tried in order:
//! exact permalink match, exact title match, then a fuzzy match over
//! full-text search results.
//!
//! The fuzzy pass runs the raw target through the search index (entities
//! only), seeds each candidate's score from its search rank, and
//! multiplies that score by `0.5` for every whitespace-separated token
//! of the (lowercased) target that the candidate's last permalink
//! segment also contains, and by `0.2` on top of that if the candidate
//! matches the raw target exactly after normalization. Lower is better
//! — the candidate list is sorted ascending and the first
//! (lowest-scoring, best-matching) entry wins.

use crate::error::Result;
use crate::search::search as run_search;
use crate::types::{Entity, SearchItemType, SearchQuery, SearchResult};
use crate::db::Database;

pub struct LinkResolver<'a> {
    db: &'a Database,
}

impl<'a> LinkResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve a relation's raw target to an entity, or `None` if
    /// nothing matches closely enough to call it a link.
    pub fn resolve(&self, raw: &str) -> Result<Option<Entity>> {
        if let Some(entity) = self.db.find_by_permalink(raw)? {
            return Ok(Some(entity));
        }
        if let Some(entity) = self.db.find_by_title(raw)? {
            return Ok(Some(entity));
        }
        self.fuzzy_match(raw)
    }

    /// How many search hits the fuzzy pass re-ranks. The search index
    /// already orders by bm25 rank; this just needs to be generous
    /// enough that the re-ranking has more than the single top hit to
    /// work with.
    const FUZZY_CANDIDATE_LIMIT: usize = 50;

    fn fuzzy_match(&self, raw: &str) -> Result<Option<Entity>> {
        let results: Vec<SearchResult> = {
            let conn = self.db.connection();
            run_search(
                &conn,
                &SearchQuery {
                    text: Some(raw.to_string()),
                    types: vec![SearchItemType::Entity],
                    page: 0,
                    page_size: Self::FUZZY_CANDIDATE_LIMIT,
                    ..Default::default()
                },
            )?
        };
        if results.is_empty() {
            return Ok(None);
        }

        let normalized_target = normalize(raw);
        let target_tokens = tokenize(&normalized_target);

        let mut scored: Vec<(f64, i64)> = results
            .into_iter()
            .filter_map(|result| {
                let permalink = result.permalink.clone()?;
                let entity_id = result.entity_id?;
                let last_segment = permalink.rsplit('/').next().unwrap_or(&permalink);
                let score = score_candidate(result.score, &normalized_target, &target_tokens, last_segment)?;
                Some((score, entity_id))
            })
            .collect();

        if scored.is_empty() {
            return Ok(None);
        }

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        self.db.find_by_id(scored[0].1)
    }
}

fn normalize(s: &str) -> String {
    s.to_lowercase()
}

fn tokenize(s: &str) -> Vec<&str> {
    s.split_whitespace().collect()
}

/// Score a single search result's last permalink segment against the
/// target, seeded from the result's own search rank. Returns `None` if
/// there's no token overlap at all (not a candidate worth considering).
fn score_candidate(base_score: f64, normalized_target: &str, target_tokens: &[&str], candidate_segment: &str) -> Option<f64> {
    let candidate_lower = candidate_segment.to_lowercase();
    let mut score = base_score;
    let mut any_match = false;

    for token in target_tokens {
        if candidate_lower.contains(token) {
            score *= 0.5;
            any_match = true;
        }
    }

    if !any_match {
        return None;
    }

    if candidate_lower == *normalized_target {
        score *= 0.2;
    }

    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewEntity;
    use crate::search::index_entity;

    fn db_with(entities: &[(&str, &str)]) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        for (permalink, title) in entities {
            let entity = db
                .insert_entity(&NewEntity {
                    permalink: Some(permalink.to_string()),
                    title: title.to_string(),
                    entity_type: "note".to_string(),
                    file_path: format!("{}.md", permalink),
                    content_type: "text/markdown".to_string(),
                    created: None,
                    modified: None,
                })
                .unwrap();
            let conn = db.connection();
            index_entity(&conn, &entity, &[], &[]).unwrap();
        }
        db
    }

    #[test]
    fn test_exact_permalink_match() {
        let db = db_with(&[("notes/target-doc", "Target Doc")]);
        let resolver = LinkResolver::new(&db);
        let found = resolver.resolve("notes/target-doc").unwrap().unwrap();
        assert_eq!(found.title, "Target Doc");
    }

    #[test]
    fn test_exact_title_match() {
        let db = db_with(&[("notes/target-doc", "Target Doc")]);
        let resolver = LinkResolver::new(&db);
        let found = resolver.resolve("Target Doc").unwrap().unwrap();
        assert_eq!(found.permalink.as_deref(), Some("notes/target-doc"));
    }

    #[test]
    fn test_fuzzy_match_prefers_more_token_overlap() {
        let db = db_with(&[
            ("notes/design-doc", "Design Doc"),
            ("notes/design-doc-for-search", "Design Doc For Search"),
        ]);
        let resolver = LinkResolver::new(&db);
        let found = resolver.resolve("design doc for search").unwrap().unwrap();
        assert_eq!(found.permalink.as_deref(), Some("notes/design-doc-for-search"));
    }

    #[test]
    fn test_no_match_returns_none() {
        let db = db_with(&[("notes/a", "A")]);
        let resolver = LinkResolver::new(&db);
        assert!(resolver.resolve("completely-unrelated-xyz").unwrap().is_none());
    }
}
