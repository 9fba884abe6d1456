//! End-to-end sync/search/context scenarios, exercised through the
//! public API rather than internal unit tests: write files to a temp
//! directory, run [`SyncCoordinator::sync_all`], and inspect the
//! resulting graph.

use basic_memory_core::{Config, ContextBuilder, Database, SyncCoordinator};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn open_db() -> Arc<Database> {
    let db = Database::open_in_memory().expect("open in-memory database");
    db.migrate().expect("run migrations");
    Arc::new(db)
}

fn coordinator(db: Arc<Database>, dir: &TempDir) -> SyncCoordinator {
    SyncCoordinator::new(db, dir.path().to_path_buf())
}

#[test]
fn test_forward_reference_resolves_across_two_syncs() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("source.md"),
        "---\npermalink: source\n---\n# Source\n## Relations\n- depends_on [[target-doc]]\n",
    )
    .unwrap();
    let report = c.sync_all().unwrap();
    assert!(report.errors.is_empty());

    let source = db.find_by_permalink("source").unwrap().unwrap();
    let relations = db.outgoing_relations(source.id).unwrap();
    assert_eq!(relations.len(), 1);
    assert!(relations[0].to_id.is_none());
    assert_eq!(relations[0].to_name, "target-doc");

    fs::write(
        dir.path().join("target_doc.md"),
        "---\npermalink: target-doc\n---\n# Target Doc\n",
    )
    .unwrap();
    c.sync_all().unwrap();

    let relations = db.outgoing_relations(source.id).unwrap();
    assert_eq!(relations.len(), 1);
    assert!(relations[0].to_id.is_some());
    assert_eq!(relations[0].to_name, "target-doc");
}

#[test]
fn test_circular_dependency_both_entities_linked() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("a.md"),
        "---\npermalink: a\n---\n# A\n## Relations\n- relates_to [[b]]\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.md"),
        "---\npermalink: b\n---\n# B\n## Relations\n- relates_to [[a]]\n",
    )
    .unwrap();

    let report = c.sync_all().unwrap();
    assert!(report.errors.is_empty());

    let a = db.find_by_permalink("a").unwrap().unwrap();
    let b = db.find_by_permalink("b").unwrap().unwrap();

    let a_out = db.outgoing_relations(a.id).unwrap();
    let b_out = db.outgoing_relations(b.id).unwrap();
    assert_eq!(a_out.len(), 1);
    assert_eq!(b_out.len(), 1);
    assert_eq!(a_out[0].to_id, Some(b.id));
    assert_eq!(b_out[0].to_id, Some(a.id));

    let a_in = db.incoming_relations(a.id).unwrap();
    let b_in = db.incoming_relations(b.id).unwrap();
    assert_eq!(a_in.len(), 1);
    assert_eq!(b_in.len(), 1);
}

#[test]
fn test_permalink_collision_newcomer_gets_suffixed() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(dir.path().join("one.md"), "---\npermalink: one\n---\n# One\n").unwrap();
    c.sync_all().unwrap();

    fs::write(dir.path().join("new.md"), "---\npermalink: one\n---\n# New\n").unwrap();
    c.sync_all().unwrap();

    let new_entity = db.find_by_file_path("new.md").unwrap().unwrap();
    assert_eq!(new_entity.permalink.as_deref(), Some("one-1"));
    assert_eq!(db.find_by_permalink("one").unwrap().unwrap().file_path, "one.md");
}

#[test]
fn test_duplicate_observations_and_relations_deduplicated() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("note.md"),
        "---\npermalink: note\n---\n# Note\n\
         ## Observations\n- [design] X\n- [design] X\n\
         ## Relations\n- depends_on [[t]]\n- depends_on [[t]]\n",
    )
    .unwrap();
    c.sync_all().unwrap();

    let entity = db.find_by_permalink("note").unwrap().unwrap();
    let observations = db.get_observations(entity.id).unwrap();
    let relations = db.outgoing_relations(entity.id).unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(relations.len(), 1);
}

#[test]
fn test_invalid_category_bullets() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("note.md"),
        "---\npermalink: note\n---\n# Note\n## Observations\n- [a space category] Fine\n- plain text with no brackets\n",
    )
    .unwrap();
    c.sync_all().unwrap();

    let entity = db.find_by_permalink("note").unwrap().unwrap();
    let observations = db.get_observations(entity.id).unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].category, "a space category");
}

#[test]
fn test_timeframe_filter_prunes_stale_related_entity() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("root.md"),
        "---\npermalink: root\n---\n# Root\n## Relations\n- relates_to [[related1]]\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("related1.md"),
        "---\npermalink: related1\n---\n# Related1\n",
    )
    .unwrap();
    c.sync_all().unwrap();

    // Push related1 10 days into the past so a 7-day window excludes it,
    // while root itself stays recent and still resolves as primary.
    let related1 = db.find_by_permalink("related1").unwrap().unwrap();
    let old = chrono::Utc::now() - chrono::Duration::days(10);
    let conn = db.connection();
    conn.execute(
        "UPDATE entities SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![old.to_rfc3339(), related1.id],
    )
    .unwrap();
    drop(conn);

    let builder = ContextBuilder::new(&db);
    let since = chrono::Utc::now() - chrono::Duration::days(7);
    let context = builder
        .build("memory://project/root", 2, Some(since), 10)
        .unwrap();

    assert_eq!(context.primary_entities.len(), 1);
    assert!(context.related_entities.is_empty());
}

#[test]
fn test_non_markdown_files_become_opaque_entities() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(dir.path().join("doc.pdf"), b"%PDF-1.4 fake").unwrap();
    fs::write(dir.path().join("img.png"), b"\x89PNG fake").unwrap();
    let report = c.sync_all().unwrap();
    assert!(report.errors.is_empty());

    assert_eq!(db.count_entities().unwrap(), 2);
    let pdf = db.find_by_file_path("doc.pdf").unwrap().unwrap();
    let png = db.find_by_file_path("img.png").unwrap().unwrap();
    assert_eq!(pdf.content_type, "application/pdf");
    assert_eq!(png.content_type, "image/png");
    assert_eq!(db.get_observations(pdf.id).unwrap().len(), 0);
    assert_eq!(db.outgoing_relations(pdf.id).unwrap().len(), 0);
}

#[test]
fn test_dotfiles_never_become_entities() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(dir.path().join(".hidden.md"), "# Hidden\n").unwrap();
    fs::write(dir.path().join("visible.md"), "# Visible\n").unwrap();
    c.sync_all().unwrap();

    assert_eq!(db.count_entities().unwrap(), 1);
    assert!(db.find_by_file_path("visible.md").unwrap().is_some());
}

#[test]
fn test_empty_repository_syncs_without_error() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    let report = c.sync_all().unwrap();
    assert_eq!(report.total_changes(), 0);
    assert!(report.errors.is_empty());
}

#[test]
fn test_sync_twice_is_idempotent_end_to_end() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("a.md"),
        "---\npermalink: a\n---\n# A\n## Relations\n- relates_to [[b]]\n",
    )
    .unwrap();
    fs::write(dir.path().join("b.md"), "---\npermalink: b\n---\n# B\n").unwrap();

    c.sync_all().unwrap();
    let second = c.sync_all().unwrap();

    assert_eq!(second.total_changes(), 0);
    assert!(second.errors.is_empty());
}

#[test]
fn test_search_finds_entity_after_sync() {
    let dir = TempDir::new().unwrap();
    let db = open_db();
    let c = coordinator(db.clone(), &dir);

    fs::write(
        dir.path().join("design.md"),
        "---\npermalink: design\n---\n# Design Notes\nUses SQLite for storage.\n",
    )
    .unwrap();
    c.sync_all().unwrap();
    c.flush_index();

    let conn = db.connection();
    let results = basic_memory_core::search::search(
        &conn,
        &basic_memory_core::SearchQuery {
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
fn test_config_load_against_missing_file_returns_default() {
    // `load()` checks its fixed config path first and falls back to
    // `Config::default()` rather than erroring when nothing is there —
    // this holds in any environment without a basic-memory.toml at the
    // XDG config location, which a test sandbox never has.
    let config = Config::load().expect("load() should not error when no config file exists");
    assert_eq!(config.logging.level, Config::default().logging.level);
}
