//! # KSAT Ingest
//!
//! A news ingestion pipeline that crawls the KSAT site with a headless browser,
//! extracts structured articles, labels their sentiment through an
//! OpenAI-compatible chat model, and keeps a rolling SQLite archive.
//!
//! ## Usage
//!
//! ```sh
//! ksat_ingest scrape                 # one run, general then local
//! ksat_ingest schedule               # hourly runs until Ctrl-C
//! ksat_ingest list --since-hours 24  # read the archive back as JSON lines
//! ```
//!
//! ## Architecture
//!
//! Each run follows the same pipeline under a filesystem lock:
//! 1. **Pruning**: drop articles past the retention horizon
//! 2. **Discovery**: categories from the site navigation, then article links
//!    from each category and its subcategories
//! 3. **Extraction**: headline, image, body text, and publish time per article
//! 4. **Classification**: positive / negative / neutral, or no label when the
//!    service is unavailable
//! 5. **Storage**: get-or-create by headline

use chrono::{TimeDelta, Utc};
use clap::Parser;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod ingest;
mod lock;
mod models;
mod scheduler;
mod scrapers;
mod sentiment;
mod store;
mod utils;

use api::{OpenAiChat, RetryChat};
use cli::{Cli, Command};
use config::AppConfig;
use error::IngestError;
use ingest::{Ingestor, RunOutcome};
use models::SiteVariant;
use scheduler::{Job, Scheduler};
use scrapers::fetcher::BrowserFetcher;
use sentiment::SentimentClassifier;
use store::{ArticleFilter, NewsStore};
use utils::{checked_ago, ensure_parent_dir};

type NewsIngestor = Ingestor<RetryChat<OpenAiChat>>;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("ksat_ingest starting up");

    let Cli {
        config: config_path,
        database,
        lock_path,
        api_key,
        command,
    } = Cli::parse();
    debug!(?command, ?config_path, "Parsed CLI arguments");

    let mut config = AppConfig::load(config_path.as_deref())?;
    if let Some(database) = database {
        config.storage.database_path = database;
    }
    if let Some(lock_path) = lock_path {
        config.lock_path = lock_path;
    }
    let config = Arc::new(config);

    // Early check: the database directory must exist and be writable
    if let Err(e) = ensure_parent_dir(&config.storage.database_path).await {
        error!(
            path = %config.storage.database_path.display(),
            error = %e,
            "Database directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }
    let store = NewsStore::open(&config.storage.database_path).await?;
    let ingestor = Arc::new(build_ingestor(config.clone(), store, api_key)?);

    match command {
        Command::Scrape { variants } => {
            scrape_once(&ingestor, &config, &Command::scrape_variants(&variants)).await?;
        }
        Command::Schedule => schedule(ingestor, config).await?,
        Command::Prune => {
            ingestor.prune().await?;
        }
        Command::List {
            since_hours,
            search,
            limit,
        } => {
            let filter = ArticleFilter {
                since: since_hours.and_then(|h| checked_ago(Utc::now(), TimeDelta::try_hours(h))),
                search,
                limit: Some(limit),
            };
            let articles = ingestor.store().query(&filter).await?;
            let mut out = std::io::stdout().lock();
            for article in &articles {
                writeln!(out, "{}", serde_json::to_string(article)?)?;
            }
            info!(count = articles.len(), "Listed articles");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

fn build_ingestor(
    config: Arc<AppConfig>,
    store: NewsStore,
    api_key: Option<String>,
) -> Result<NewsIngestor, Box<dyn Error>> {
    let chat = OpenAiChat::new(&config.classifier, api_key)?;
    if !chat.has_api_key() {
        warn!("No API key configured; articles will be stored without sentiment labels");
    }
    let backend = RetryChat::new(
        chat,
        config.classifier.max_retries,
        Duration::from_millis(config.classifier.retry_base_delay_ms),
    );
    let classifier = SentimentClassifier::new(backend, config.classifier.max_description_chars);
    Ok(Ingestor::new(config, store, classifier)?)
}

/// One locked run with a fresh browser, closed afterwards whatever the outcome.
async fn scrape_once(
    ingestor: &NewsIngestor,
    config: &AppConfig,
    variants: &[SiteVariant],
) -> Result<(), IngestError> {
    let mut fetcher = BrowserFetcher::new(config.browser.clone());
    let outcome = ingestor.run(&mut fetcher, variants).await;
    fetcher.close().await;

    match outcome? {
        RunOutcome::AlreadyRunning => info!("Run skipped; another run holds the lock"),
        RunOutcome::Completed(reports) => {
            for report in reports {
                info!(
                    variant = %report.variant,
                    created = report.created,
                    existing = report.existing,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Run summary"
                );
            }
        }
    }
    Ok(())
}

async fn schedule(ingestor: Arc<NewsIngestor>, config: Arc<AppConfig>) -> Result<(), Box<dyn Error>> {
    let mut scheduler = Scheduler::new();
    let jobs = [
        ("general", SiteVariant::General, config.schedule.general_interval_mins),
        ("local", SiteVariant::Local, config.schedule.local_interval_mins),
    ];
    for (id, variant, mins) in jobs {
        let ingestor = ingestor.clone();
        let config = config.clone();
        scheduler.register(Job::new(id, Duration::from_secs(mins * 60), move || {
            let ingestor = ingestor.clone();
            let config = config.clone();
            async move {
                if let Err(e) = scrape_once(&ingestor, &config, &[variant]).await {
                    error!(%variant, error = %e, "Scheduled run failed");
                }
            }
        }))?;
    }

    scheduler.start()?;
    info!(
        jobs = ?scheduler.job_ids().collect::<Vec<_>>(),
        "Scheduler running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested; waiting for in-flight runs");
    scheduler.shutdown().await;
    Ok(())
}
