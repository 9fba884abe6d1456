//! Graph context assembly
//!
//! Resolves a `memory://` URI to one or more primary entities, then
//! expands outward through relations up to a given depth, producing a
//! [`GraphContext`] snapshot suitable for handing to an external reader
//! (an LLM, a UI) that needs the neighborhood around a note rather than
//! the whole graph.

use crate::db::Database;
use crate::error::Result;
use crate::types::{ContextMetadata, Entity, GraphContext, MemoryUrl};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashSet, VecDeque};

/// How far back `parse_timeframe` looks when given no argument or an
/// expression it can't parse.
pub const DEFAULT_TIMEFRAME_DAYS: i64 = 7;

/// Parse a time-frame expression into an absolute instant: compact
/// (`7d`, `24h`, `30m`) or natural-language (`today`, `yesterday`,
/// `last week`, `N days ago`, `N months ago`) forms, case-insensitive.
/// An expression matching neither form falls back to the `7d` default
/// rather than erroring, per the documented grammar.
pub fn parse_timeframe(raw: &str) -> DateTime<Utc> {
    let now = Utc::now();
    let trimmed = raw.trim().to_lowercase();

    parse_compact(&trimmed, now)
        .or_else(|| parse_natural(&trimmed, now))
        .unwrap_or_else(|| now - Duration::days(DEFAULT_TIMEFRAME_DAYS))
}

fn parse_compact(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if s.len() < 2 {
        return None;
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    let n: i64 = digits.parse().ok()?;
    let delta = match unit {
        "d" => Duration::days(n),
        "h" => Duration::hours(n),
        "m" => Duration::minutes(n),
        _ => return None,
    };
    Some(now - delta)
}

fn parse_natural(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if s == "today" {
        return Some(start_of_day(now));
    }
    if s == "yesterday" {
        return Some(start_of_day(now - Duration::days(1)));
    }
    if s == "last week" {
        return Some(now - Duration::weeks(1));
    }
    if let Some(n) = s.strip_suffix(" days ago").or_else(|| s.strip_suffix(" day ago")) {
        return Some(now - Duration::days(n.trim().parse().ok()?));
    }
    if let Some(n) = s.strip_suffix(" months ago").or_else(|| s.strip_suffix(" month ago")) {
        let months: i64 = n.trim().parse().ok()?;
        return Some(now - Duration::days(months * 30));
    }
    None
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = at.date_naive().and_hms_opt(0, 0, 0).expect("midnight is always valid");
    Utc.from_utc_datetime(&midnight)
}

pub struct ContextBuilder<'a> {
    db: &'a Database,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Build the context around the entity (or glob of entities) named
    /// by `uri`, expanding `depth` hops through relations. `since`
    /// restricts both the primary and related entities to those touched
    /// at or after the given time; an intermediate node on a BFS path
    /// must also satisfy `since` for the path to continue past it.
    pub fn build(
        &self,
        uri: &str,
        depth: u32,
        since: Option<DateTime<Utc>>,
        max_related: usize,
    ) -> Result<GraphContext> {
        let url = MemoryUrl::parse(uri);

        let mut primary = if url.is_pattern() {
            self.db.find_by_permalink_glob(&url.relative_path)?
        } else {
            self.db
                .find_by_permalink(&url.relative_path)?
                .into_iter()
                .collect()
        };

        if let Some(since) = since {
            primary.retain(|e| e.updated_at >= since);
        }

        let matched_entities = primary.len();
        let primary_ids: HashSet<i64> = primary.iter().map(|e| e.id).collect();

        let related = self.expand(&primary, depth, since, max_related, &primary_ids)?;
        let total_entities = primary.len() + related.len();

        Ok(GraphContext {
            primary_entities: primary,
            related_entities: related,
            metadata: ContextMetadata {
                uri: uri.to_string(),
                depth,
                timeframe: since.map(|s| s.to_rfc3339()).unwrap_or_default(),
                generated_at: Utc::now(),
                matched_entities,
                total_entities,
            },
        })
    }

    /// BFS out from `roots`, admitting a node only if it satisfies
    /// `since` (when present). Because intermediate nodes must also
    /// satisfy `since`, a timeframe filter can prune an otherwise-
    /// reachable entity if the path to it runs through a stale node.
    fn expand(
        &self,
        roots: &[Entity],
        depth: u32,
        since: Option<DateTime<Utc>>,
        max_related: usize,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<Entity>> {
        let mut visited: HashSet<i64> = exclude.clone();
        let mut queue: VecDeque<(i64, u32)> = roots.iter().map(|e| (e.id, 0)).collect();
        let mut related = Vec::new();

        while let Some((entity_id, current_depth)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }
            if related.len() >= max_related {
                break;
            }

            let mut neighbor_ids: Vec<i64> = Vec::new();
            for rel in self.db.outgoing_relations(entity_id)? {
                if let Some(to_id) = rel.to_id {
                    neighbor_ids.push(to_id);
                }
            }
            for rel in self.db.incoming_relations(entity_id)? {
                neighbor_ids.push(rel.from_id);
            }

            for neighbor_id in neighbor_ids {
                if visited.contains(&neighbor_id) {
                    continue;
                }
                let Some(entity) = self.db.find_by_id(neighbor_id)? else {
                    continue;
                };
                if let Some(since) = since {
                    if entity.updated_at < since {
                        continue;
                    }
                }
                visited.insert(neighbor_id);
                related.push(entity);
                if related.len() >= max_related {
                    break;
                }
                queue.push_back((neighbor_id, current_depth + 1));
            }
        }

        Ok(related)
    }
}
