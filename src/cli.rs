//! Command-line interface definitions for the KSAT news ingester.
//!
//! Global options override values from the YAML config file. The API key and
//! database path can also come from the environment.

use crate::models::SiteVariant;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Crawl KSAT news, classify sentiment, and keep a rolling SQLite archive.
///
/// # Examples
///
/// ```sh
/// # One run over both feeds
/// ksat_ingest scrape
///
/// # Only the local feed, against a specific database
/// ksat_ingest --database /var/lib/ksat/news.db scrape --variant local
///
/// # Hourly runs until Ctrl-C
/// OPENAI_API_KEY=sk-... ksat_ingest --config ksat.yaml schedule
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides storage.database_path)
    #[arg(long, env = "NEWS_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Run lock file (overrides lock_path)
    #[arg(long, global = true)]
    pub lock_path: Option<PathBuf>,

    /// API key for the sentiment classification service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run one crawl now
    Scrape {
        /// Feeds to crawl, in order (default: general, then local)
        #[arg(long = "variant", value_enum)]
        variants: Vec<SiteVariant>,
    },
    /// Run the general and local crawls on their intervals until Ctrl-C
    Schedule,
    /// Delete articles older than the retention horizon
    Prune,
    /// Print stored articles as JSON lines, newest first
    List {
        /// Only articles published within this many hours
        #[arg(long)]
        since_hours: Option<i64>,

        /// Case-insensitive match on title, description, or category
        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

impl Command {
    /// Variants for a scrape run, defaulting to both feeds.
    pub fn scrape_variants(variants: &[SiteVariant]) -> Vec<SiteVariant> {
        if variants.is_empty() {
            vec![SiteVariant::General, SiteVariant::Local]
        } else {
            variants.to_vec()
        }
    }
}
