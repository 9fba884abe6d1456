//! basic-memory - local knowledge-graph sync engine
//!
//! Thin CLI over `basic-memory-core`: sync a directory of Markdown notes
//! into a SQLite-backed knowledge graph, search it, and build context
//! around a `memory://` URI.

use anyhow::{Context, Result};
use basic_memory_core::{Config, ContextBuilder, Database, SyncCoordinator};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "basic-memory")]
#[command(about = "Sync a directory of Markdown notes into a local knowledge graph")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync the project root into the knowledge graph
    Sync {
        /// Project root to sync (overrides the config file)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Keep watching for file changes after the initial sync
        #[arg(long)]
        watch: bool,
    },
    /// Print entity/observation/relation counts
    Status,
    /// Full-text search over entities, observations, and relations
    Search {
        query: String,
        #[arg(long = "type")]
        item_type: Option<String>,
        /// Only match items updated at or after this RFC3339 timestamp
        #[arg(long)]
        after: Option<String>,
    },
    /// Build a graph context around a memory:// URI
    Context {
        uri: String,
        #[arg(long, default_value = "2")]
        depth: u32,
        /// How far back to look: `7d`/`24h`/`30m`, or natural language
        /// like `today`, `yesterday`, `last week`, `3 days ago`, `2
        /// months ago`. Defaults to `7d`; an unrecognized value also
        /// falls back to `7d`.
        #[arg(long, default_value = "7d")]
        timeframe: String,
        #[arg(long)]
        max_related: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        basic_memory_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    match args.command {
        Command::Sync { root, watch } => {
            let root = root.unwrap_or(config.project.root);
            run_sync(db.clone(), &root, watch || config.sync.watch)
        }
        Command::Status => run_status(&db),
        Command::Search { query, item_type, after } => run_search(&db, &query, item_type, after),
        Command::Context { uri, depth, timeframe, max_related } => run_context(
            &db,
            &uri,
            depth,
            &timeframe,
            max_related.unwrap_or(config.search.max_related_default),
        ),
    }
}

fn run_sync(db: Arc<Database>, root: &PathBuf, watch: bool) -> Result<()> {
    let coordinator = SyncCoordinator::new(db, root.clone());

    let report = sync_once(&coordinator)?;
    coordinator.flush_index();
    print_report(&report);

    if !watch {
        return Ok(());
    }

    println!("\nWatching {} for changes. Press Ctrl+C to stop.", root.display());
    run_watch(&coordinator, root)
}

fn sync_once(coordinator: &SyncCoordinator) -> Result<basic_memory_core::SyncReport> {
    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_message("syncing...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let result = coordinator.sync_all().context("sync failed");
    spinner.finish_and_clear();
    result
}

fn run_watch(coordinator: &SyncCoordinator, root: &PathBuf) -> Result<()> {
    use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(Duration::from_millis(500), tx)
        .context("failed to start file watcher")?;
    debouncer
        .watcher()
        .watch(root, RecursiveMode::Recursive)
        .context("failed to watch project root")?;

    for events in rx {
        let Ok(events) = events else { continue };
        if events.is_empty() {
            continue;
        }
        let report = sync_once(coordinator)?;
        coordinator.flush_index();
        if report.total_changes() > 0 {
            let timestamp = chrono::Local::now().format("%H:%M:%S");
            println!("[{}] synced {} change(s)", timestamp, report.total_changes());
            print_report(&report);
        }
    }

    Ok(())
}

fn run_status(db: &Database) -> Result<()> {
    let entities = db.count_entities().context("failed to count entities")?;
    let observations = db.count_observations().context("failed to count observations")?;
    let relations = db.count_relations().context("failed to count relations")?;
    let pending = db
        .entities_with_null_checksum()
        .context("failed to check for interrupted syncs")?;

    println!("Entities:     {}", entities);
    println!("Observations: {}", observations);
    println!("Relations:    {}", relations);
    if !pending.is_empty() {
        println!(
            "\nWarning: {} entit{} left over from an interrupted sync (checksum not committed)",
            pending.len(),
            if pending.len() == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}

fn run_search(db: &Database, query: &str, item_type: Option<String>, after: Option<String>) -> Result<()> {
    let types = match item_type {
        Some(t) => vec![t.parse().map_err(|e: String| anyhow::anyhow!(e))?],
        None => Vec::new(),
    };
    let after = after
        .map(|a| {
            chrono::DateTime::parse_from_rfc3339(&a)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .context("--after must be an RFC3339 timestamp")
        })
        .transpose()?;

    let search_query = basic_memory_core::SearchQuery {
        text: Some(query.to_string()),
        types,
        after,
        page: 0,
        page_size: 20,
    };

    let conn = db.connection();
    let results = basic_memory_core::search::search(&conn, &search_query).context("search failed")?;
    drop(conn);

    if results.is_empty() {
        println!("No results for {:?}", query);
        return Ok(());
    }

    for r in results {
        println!("[{}] {} ({})", r.item_type, r.title, r.permalink.as_deref().unwrap_or("-"));
        if !r.content.is_empty() {
            println!("    {}", r.content);
        }
    }
    Ok(())
}

fn run_context(
    db: &Database,
    uri: &str,
    depth: u32,
    timeframe: &str,
    max_related: usize,
) -> Result<()> {
    let since = basic_memory_core::context::parse_timeframe(timeframe);

    let builder = ContextBuilder::new(db);
    let context = builder
        .build(uri, depth, Some(since), max_related)
        .context("context build failed")?;

    println!(
        "Primary entities ({}):",
        context.metadata.matched_entities
    );
    for e in &context.primary_entities {
        println!("  - {} ({})", e.title, e.permalink.as_deref().unwrap_or("-"));
    }
    println!("\nRelated entities ({}):", context.related_entities.len());
    for e in &context.related_entities {
        println!("  - {} ({})", e.title, e.permalink.as_deref().unwrap_or("-"));
    }
    Ok(())
}

fn print_report(report: &basic_memory_core::SyncReport) {
    println!("  new:      {}", report.new.len());
    println!("  modified: {}", report.modified.len());
    println!("  deleted:  {}", report.deleted.len());
    println!("  moved:    {}", report.moves.len());
    if !report.errors.is_empty() {
        println!("  errors:");
        for (path, err) in &report.errors {
            println!("    {}: {}", path, err);
        }
    }
}
