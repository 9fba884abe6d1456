//! Core domain types for basic-memory
//!
//! These types represent the canonical knowledge-graph model that sync
//! materializes from a directory of Markdown (and opaque binary) files.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Entity** | A file-backed node in the knowledge graph (a note, or an opaque file) |
//! | **Observation** | A categorized assertion attached to an entity (`- [category] text`) |
//! | **Relation** | A directed, typed edge between entities (`- relation_type [[target]]`) |
//! | **Permalink** | The canonical, unique string identifier for an entity |
//! | **Forward reference** | A relation whose target entity doesn't exist yet |
//!
//! ### Permalink vs file_path
//!
//! `file_path` is where the entity lives on disk, relative to the project
//! root. `permalink` is the stable identifier callers use to address the
//! entity regardless of where the file moves to. The two are related but
//! independent: a move changes `file_path` without necessarily changing
//! `permalink` (see [`crate::sync`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================
// Entities
// ============================================

/// A node in the knowledge graph, backed by a file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Database ID (auto-incremented)
    pub id: i64,
    /// Canonical, unique identifier for this entity
    pub permalink: Option<String>,
    /// Human-readable title
    pub title: String,
    /// Free-string tag from frontmatter (`knowledge`, `note`, ...); defaults to `note`
    pub entity_type: String,
    /// Repository-relative path (unique)
    pub file_path: String,
    /// MIME type: `text/markdown` for `.md`, probed otherwise
    pub content_type: String,
    /// Hex-encoded content hash. Null only while a sync of this entity is
    /// in progress (see [`crate::sync`]).
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Observations
// ============================================

/// A categorized assertion attached to an entity.
///
/// Parsed from a `- [category] text` bullet under an entity's
/// `## Observations` section. Any non-empty category string is accepted
/// verbatim, including ones containing spaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Observation {
    /// Database ID (auto-incremented)
    pub id: i64,
    /// Owning entity (lifetime tied to the entity; cascade-deleted with it)
    pub entity_id: i64,
    /// The bracketed tag, verbatim
    pub category: String,
    /// The remaining text, trimmed
    pub content: String,
}

// ============================================
// Relations
// ============================================

/// A directed, typed edge between entities.
///
/// Parsed from a `- relation_type [[target]]` bullet under an entity's
/// `## Relations` section. `to_id` is a weak reference: it is cleared
/// (set to `None`) rather than cascade-deleted when its target
/// disappears, and `to_name` is always preserved so the relation can be
/// re-resolved later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Relation {
    /// Database ID (auto-incremented)
    pub id: i64,
    /// Source entity (required)
    pub from_id: i64,
    /// Target entity, if resolved
    pub to_id: Option<i64>,
    /// String target as parsed; preserved even after resolution
    pub to_name: String,
    /// Relation type, e.g. `depends_on`
    pub relation_type: String,
    /// Optional free text captured from a trailing `# comment`
    pub context: Option<String>,
}

// ============================================
// Markdown parsing
// ============================================

/// Frontmatter recognized keys plus any unrecognized keys preserved
/// verbatim, so a later rewrite (permalink normalization) never drops
/// user data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub permalink: Option<String>,
    pub tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Any other `key: value` pairs found in the block, in file order.
    pub extra: Vec<(String, String)>,
}

/// A parsed observation, prior to being assigned an `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObservation {
    pub category: String,
    pub content: String,
}

/// A parsed relation, prior to being assigned a `from_id` or resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRelation {
    pub relation_type: String,
    pub target: String,
    pub context: Option<String>,
}

/// The result of parsing one file into entity shape.
#[derive(Debug, Clone)]
pub struct ParsedEntity {
    pub file_path: String,
    pub title: String,
    pub entity_type: Option<String>,
    pub content_type: String,
    pub frontmatter: Frontmatter,
    pub observations: Vec<ParsedObservation>,
    pub relations: Vec<ParsedRelation>,
}

// ============================================
// Sync
// ============================================

/// One cycle's outcome, returned by [`crate::sync::SyncCoordinator::sync_all`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub moves: Vec<(String, String)>,
    /// checksum computed for each new/modified path during the scan
    pub checksums: HashMap<String, String>,
    /// per-file failures that did not abort the whole cycle
    pub errors: Vec<(String, String)>,
}

impl SyncReport {
    pub fn total_changes(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.moves.len()
    }
}

// ============================================
// Search
// ============================================

/// The kind of row a search hit or context-graph node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchItemType {
    Entity,
    Observation,
    Relation,
}

impl SearchItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchItemType::Entity => "entity",
            SearchItemType::Observation => "observation",
            SearchItemType::Relation => "relation",
        }
    }
}

impl std::str::FromStr for SearchItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(SearchItemType::Entity),
            "observation" => Ok(SearchItemType::Observation),
            "relation" => Ok(SearchItemType::Relation),
            _ => Err(format!("unknown search item type: {}", s)),
        }
    }
}

impl std::fmt::Display for SearchItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single full-text search or graph-traversal hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub item_type: SearchItemType,
    pub id: i64,
    pub entity_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub permalink: Option<String>,
    pub file_path: Option<String>,
    pub from_id: Option<i64>,
    pub to_id: Option<i64>,
    pub relation_type: Option<String>,
    /// lower is a closer match
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a search-index query.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub types: Vec<SearchItemType>,
    pub after: Option<DateTime<Utc>>,
    pub page: usize,
    pub page_size: usize,
}

// ============================================
// Context
// ============================================

/// A resolved `memory://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryUrl {
    /// The logical project label before the first `/`; ignored by resolution
    pub host: String,
    /// Everything after the host, used to match permalinks/globs
    pub relative_path: String,
}

impl MemoryUrl {
    /// Parse a `memory://host/relative/path` URI. A bare `relative/path`
    /// with no scheme is also accepted, with an empty host.
    pub fn parse(raw: &str) -> Self {
        let without_scheme = raw.strip_prefix("memory://").unwrap_or(raw);
        match without_scheme.split_once('/') {
            Some((host, rest)) => MemoryUrl {
                host: host.to_string(),
                relative_path: rest.to_string(),
            },
            None => MemoryUrl {
                host: String::new(),
                relative_path: without_scheme.to_string(),
            },
        }
    }

    /// Whether the relative path contains glob characters.
    pub fn is_pattern(&self) -> bool {
        self.relative_path.contains('*') || self.relative_path.contains('?')
    }
}

/// The result of [`crate::context::build_context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphContext {
    pub primary_entities: Vec<Entity>,
    pub related_entities: Vec<Entity>,
    pub metadata: ContextMetadata,
}

/// Metadata describing how a [`GraphContext`] was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub uri: String,
    pub depth: u32,
    pub timeframe: String,
    pub generated_at: DateTime<Utc>,
    pub matched_entities: usize,
    pub total_entities: usize,
}
