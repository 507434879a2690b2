//! SnipMaster CLI - Command line front end for the snippet store.
//!
//! Snippets are saved locally first and pushed to the configured remote
//! on `sync`. The cache commands exercise the request router against the
//! configured origin.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use http::header::{HeaderValue, CACHE_CONTROL};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use snipmaster_app::{AppConfig, SnipMaster, StatusSummary};
use snipmaster_cache::{classify, CacheRequest};
use snipmaster_common::{Language, Record, RecordDraft, RecordId};
use snipmaster_storage::{LegacySource, MigrationOutcome};
use snipmaster_sync::{wait_for_pass_end, DeferOutcome, SingleSyncOutcome, SyncEvent};

/// How long `sync` follows a pass handed to the background worker.
const DEFERRED_SYNC_WAIT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "snipmaster")]
#[command(about = "SnipMaster - Offline-first code snippet manager")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: platform data directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Start without network access; nothing is pushed.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Save a new snippet.
    Add {
        /// Snippet code (use --file to read it from disk).
        code: Option<String>,

        /// Read the code from a file; the language is guessed from its name.
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(short, long)]
        language: Option<Language>,

        #[arg(short = 'g', long)]
        category: Option<String>,
    },

    /// Change an existing snippet.
    Edit {
        id: RecordId,

        code: Option<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(short, long)]
        language: Option<Language>,

        #[arg(short = 'g', long)]
        category: Option<String>,
    },

    /// List snippets.
    List {
        /// Only this language.
        #[arg(short, long)]
        language: Option<Language>,

        /// Only snippets waiting for sync.
        #[arg(short, long)]
        pending: bool,

        /// Only the N most recently modified.
        #[arg(short, long)]
        recent: Option<usize>,
    },

    /// Print one snippet.
    Show { id: RecordId },

    /// Delete a snippet.
    Rm { id: RecordId },

    /// Push pending snippets to the remote.
    Sync {
        /// Sync just this snippet.
        id: Option<RecordId>,

        /// Also retry snippets set aside after repeated failures.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Show store and sync status.
    Status,

    /// Import a legacy snippet list.
    Migrate {
        /// Exported JSON list; without it the store's own legacy key is used.
        #[arg(long)]
        legacy: Option<PathBuf>,
    },

    /// Show which caching strategy a request would get.
    Route {
        url: Url,

        /// Treat as a page navigation.
        #[arg(long)]
        navigate: bool,

        /// Send `Cache-Control: no-cache`.
        #[arg(long)]
        no_cache: bool,
    },

    /// Fetch the app shell into the cache and activate this cache version.
    Install,

    /// Answer a request through the cache router.
    Fetch { url: Url },

    /// Generate shell completions.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    match cli.command {
        Commands::Init { force } => cmd_init(&config_path, force),

        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "snipmaster",
                &mut std::io::stdout(),
            );
            Ok(())
        }

        Commands::Route {
            url,
            navigate,
            no_cache,
        } => cmd_route(url, navigate, no_cache),

        command => {
            let mut config = AppConfig::load(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?;
            if cli.offline {
                config.online = false;
            }

            let app = SnipMaster::open(config)
                .await
                .context("Failed to open snippet store")?;
            let result = run(&app, command).await;
            app.shutdown().await;
            result
        }
    }
}

async fn run(app: &SnipMaster, command: Commands) -> Result<()> {
    match command {
        Commands::Add {
            code,
            file,
            language,
            category,
        } => cmd_add(app, code, file, language, category).await,

        Commands::Edit {
            id,
            code,
            file,
            language,
            category,
        } => cmd_edit(app, &id, code, file, language, category).await,

        Commands::List {
            language,
            pending,
            recent,
        } => cmd_list(app, language, pending, recent).await,

        Commands::Show { id } => cmd_show(app, &id).await,

        Commands::Rm { id } => {
            app.delete(&id).await.context("Failed to delete snippet")?;
            println!("Deleted {}", id);
            Ok(())
        }

        Commands::Sync { id, retry_failed } => cmd_sync(app, id, retry_failed).await,

        Commands::Status => cmd_status(app).await,

        Commands::Migrate { legacy } => cmd_migrate(app, legacy.as_deref()).await,

        Commands::Install => cmd_install(app).await,

        Commands::Fetch { url } => cmd_fetch(app, url).await,

        Commands::Init { .. } | Commands::Route { .. } | Commands::Completions { .. } => {
            anyhow::bail!("This command does not use the snippet store")
        }
    }
}

/// Write the default configuration.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let config = AppConfig::in_dir(dir);
    config.save(path).context("Failed to write configuration")?;

    println!("Configuration written to {}", path.display());
    println!("  Backend: {}", config.backend);
    Ok(())
}

/// Resolve code and language from the positional argument or a file.
async fn read_code(
    code: Option<String>,
    file: Option<&Path>,
    language: Option<Language>,
) -> Result<(Option<String>, Option<Language>)> {
    match (code, file) {
        (Some(_), Some(_)) => anyhow::bail!("Give either code or --file, not both"),
        (Some(code), None) => Ok((Some(code), language)),
        (None, Some(file)) => {
            let code = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let guessed = file
                .file_name()
                .map(|name| Language::from_filename(&name.to_string_lossy()));
            Ok((Some(code), language.or(guessed)))
        }
        (None, None) => Ok((None, language)),
    }
}

async fn cmd_add(
    app: &SnipMaster,
    code: Option<String>,
    file: Option<PathBuf>,
    language: Option<Language>,
    category: Option<String>,
) -> Result<()> {
    let (code, language) = read_code(code, file.as_deref(), language).await?;
    let code = code.context("Nothing to save: give the code or --file")?;

    let mut draft = RecordDraft::new(code, language.unwrap_or_default());
    if let Some(category) = category {
        draft = draft.with_category(category);
    }

    let record = app.save(draft).await.context("Failed to save snippet")?;
    info!("Saved snippet {}", record.id);

    println!("Snippet saved: {}", record.id);
    println!("  Language: {}", record.language);
    println!("  Category: {}", record.category);
    Ok(())
}

async fn cmd_edit(
    app: &SnipMaster,
    id: &RecordId,
    code: Option<String>,
    file: Option<PathBuf>,
    language: Option<Language>,
    category: Option<String>,
) -> Result<()> {
    let existing = app
        .get(id)
        .await?
        .with_context(|| format!("No snippet with id {}", id))?;

    let (code, language) = read_code(code, file.as_deref(), language).await?;
    let mut draft = RecordDraft::from(existing);
    if let Some(code) = code {
        draft.code = code;
    }
    if let Some(language) = language {
        draft.language = language;
    }
    if let Some(category) = category {
        draft.category = Some(category);
    }

    let record = app.save(draft).await.context("Failed to update snippet")?;
    println!("Snippet updated: {} ({})", record.id, record.sync_status);
    Ok(())
}

fn summary_line(record: &Record) -> String {
    let first = record.code.lines().next().unwrap_or("");
    let mut preview: String = first.chars().take(50).collect();
    if first.chars().count() > 50 || record.code.lines().nth(1).is_some() {
        preview.push_str("...");
    }
    format!(
        "{:<15} {:<11} {:<12} {:<8} {}",
        record.id.as_str(),
        record.language.as_str(),
        record.category,
        record.sync_status.as_str(),
        preview
    )
}

async fn cmd_list(
    app: &SnipMaster,
    language: Option<Language>,
    pending: bool,
    recent: Option<usize>,
) -> Result<()> {
    let mut records = match (language, recent) {
        (Some(language), _) => app.list_by_language(language).await?,
        (None, Some(limit)) => app.recent(limit).await?,
        (None, None) => app.list().await?,
    };
    if pending {
        records.retain(Record::is_pending);
    }
    if let (Some(_), Some(limit)) = (language, recent) {
        records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        records.truncate(limit);
    }

    if records.is_empty() {
        println!("No snippets.");
        return Ok(());
    }
    for record in &records {
        println!("{}", summary_line(record));
    }
    Ok(())
}

async fn cmd_show(app: &SnipMaster, id: &RecordId) -> Result<()> {
    let record = app
        .get(id)
        .await?
        .with_context(|| format!("No snippet with id {}", id))?;

    println!("Snippet {}", record.id);
    println!("  Language: {}", record.language);
    println!("  Category: {}", record.category);
    println!("  Created: {}", record.created);
    println!("  Modified: {}", record.last_modified);
    println!("  Status: {}", record.sync_status);
    if record.sync_failures > 0 {
        println!("  Failed attempts: {}", record.sync_failures);
    }
    println!();
    println!("{}", record.code);
    Ok(())
}

async fn cmd_sync(app: &SnipMaster, id: Option<RecordId>, retry_failed: bool) -> Result<()> {
    if !app.connectivity().is_online() {
        println!("Offline: changes stay queued until the next sync.");
        return Ok(());
    }

    if retry_failed {
        let requeued = app.requeue_failed().await?;
        if requeued > 0 {
            println!("Requeued {} failed snippets", requeued);
        }
    }

    if let Some(id) = id {
        match app.sync_single(&id).await? {
            SingleSyncOutcome::Synced => println!("Synced {}", id),
            SingleSyncOutcome::NothingToDo => println!("{} has nothing to sync", id),
            SingleSyncOutcome::Superseded => {
                println!("{} was changed during sync and stays pending", id)
            }
            SingleSyncOutcome::Failed(reason) => anyhow::bail!("Sync of {} failed: {}", id, reason),
        }
        return Ok(());
    }

    let mut events = app.subscribe();
    match app.sync_or_defer().await.context("Sync failed")? {
        DeferOutcome::Deferred => {
            println!("Sync handed to the background worker");
            let last = wait_for_pass_end(&mut events, DEFERRED_SYNC_WAIT, |status| {
                println!("[{}] {}", status.status, status.message)
            })
            .await;
            if last.is_none() {
                println!("Sync continues in the background");
            }
        }
        DeferOutcome::Ran(report) => {
            loop {
                match events.try_recv() {
                    Ok(SyncEvent::Status(status)) => {
                        println!("[{}] {}", status.status, status.message)
                    }
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            println!(
                "{} of {} snippets synced, {} failed",
                report.succeeded, report.total, report.failed
            );
        }
    }
    Ok(())
}

fn print_status(status: &StatusSummary) {
    println!("Backend: {}", status.backend);
    println!("Connection: {}", if status.online { "online" } else { "offline" });
    println!("Snippets: {}", status.total);
    println!("  Pending: {}", status.pending);
    println!("  Synced: {}", status.synced);
    println!("  Failed: {}", status.failed);
    match status.last_sync {
        Some(time) => println!("Last sync: {}", time.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last sync: never"),
    }
}

async fn cmd_status(app: &SnipMaster) -> Result<()> {
    let status = app.status().await.context("Failed to read status")?;
    print_status(&status);
    Ok(())
}

async fn cmd_migrate(app: &SnipMaster, legacy: Option<&Path>) -> Result<()> {
    let source = match legacy {
        Some(path) => LegacySource::Json(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => LegacySource::Settings,
    };

    match app
        .store()
        .migrate_legacy(source)
        .await
        .context("Migration failed")?
    {
        MigrationOutcome::AlreadyDone => println!("Legacy snippets were already migrated."),
        MigrationOutcome::Imported(n) => println!("Migrated {} legacy snippets.", n),
    }
    Ok(())
}

fn cmd_route(url: Url, navigate: bool, no_cache: bool) -> Result<()> {
    let mut request = if navigate {
        CacheRequest::navigate(url)
    } else {
        CacheRequest::get(url)
    };
    if no_cache {
        request = request.with_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }

    println!("{}", classify(&request));
    Ok(())
}

async fn cmd_install(app: &SnipMaster) -> Result<()> {
    let router = app
        .cache()
        .context("Caching is not configured (add a \"cache\" section)")?;

    router.install().await.context("Install failed")?;
    println!(
        "Installed {} shell resources into {}",
        router.config().shell.len(),
        router.config().static_cache()
    );
    Ok(())
}

async fn cmd_fetch(app: &SnipMaster, url: Url) -> Result<()> {
    let router = app
        .cache()
        .context("Caching is not configured (add a \"cache\" section)")?;

    let request = CacheRequest::get(url);
    let strategy = classify(&request);
    let response = router.handle(&request).await.context("Request failed")?;
    router.settle().await;

    println!(
        "{} ({}, {} bytes, {})",
        response.status,
        strategy,
        response.body.len(),
        response.kind.as_str()
    );
    Ok(())
}
