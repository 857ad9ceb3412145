//! Runtime configuration loaded from an optional YAML file.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration for the KSAT site. Markup selectors live here rather than in
//! code because the upstream site changes them without notice.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub selectors: SelectorConfig,
    pub browser: BrowserConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    /// Presence of this file means a crawl run is in progress.
    pub lock_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            selectors: SelectorConfig::default(),
            browser: BrowserConfig::default(),
            classifier: ClassifierConfig::default(),
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
            lock_path: PathBuf::from("/tmp/scraping.lock"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Navigation link texts that count as categories for the general feed.
    pub categories: Vec<String>,
    pub local_category: FixedCategory,
    /// Paths that are never treated as articles or subcategories.
    pub ignored_paths: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.ksat.com".to_string(),
            categories: vec![
                "Entertainment".to_string(),
                "Sports".to_string(),
                "News".to_string(),
            ],
            local_category: FixedCategory::default(),
            ignored_paths: vec!["/".to_string(), "/privacy/".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixedCategory {
    pub name: String,
    pub path: String,
}

impl Default for FixedCategory {
    fn default() -> Self {
        Self {
            name: "Local".to_string(),
            path: "/news/local/".to_string(),
        }
    }
}

/// CSS selectors for the upstream markup landmarks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectorConfig {
    pub navigation_link: String,
    /// Link inside a listing's timestamp span; its inner span holds the relative time.
    pub listing_link: String,
    pub listing_relative_time: String,
    pub headline: String,
    pub story_image: String,
    pub article_text: String,
    /// Paragraphs containing any of these are captions or bylines, not body text.
    pub caption_marker: String,
    pub published_time: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            navigation_link: r#"nav[aria-label="Main Navigation"] a[href]"#.to_string(),
            listing_link: "span.time a[href]".to_string(),
            listing_relative_time: "span".to_string(),
            headline: "h1".to_string(),
            story_image: "div.basicStory div.imageWrapper img[src]".to_string(),
            article_text: "p.article-text".to_string(),
            caption_marker: "b, strong".to_string(),
            published_time: "time[datetime]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    pub navigation_timeout_secs: u64,
    /// Pause after navigation so client-side rendering can finish.
    pub settle_delay_ms: u64,
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 60,
            settle_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Base URL of an OpenAI-compatible API, without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_description_chars: usize,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 10,
            max_description_chars: 3000,
            request_timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    /// Articles older than this many days are deleted at the start of each run.
    pub retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("news.db"),
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub general_interval_mins: u64,
    pub local_interval_mins: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            general_interval_mins: 60,
            local_interval_mins: 60,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or fall back to defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let config = Self::from_yaml(&raw)?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => {
                info!("No config file given; using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty mapping.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = Url::parse(&self.site.base_url)
            .map_err(|e| ConfigError::Invalid(format!("site.base_url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "site.base_url is not a base URL: {}",
                self.site.base_url
            )));
        }
        if self.storage.retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "storage.retention_days must be positive".to_string(),
            ));
        }
        if self.schedule.general_interval_mins == 0 || self.schedule.local_interval_mins == 0 {
            return Err(ConfigError::Invalid(
                "schedule intervals must be at least one minute".to_string(),
            ));
        }
        crate::scrapers::Selectors::compile(&self.selectors)?;
        Ok(())
    }

    /// Site root with any trailing slash removed, used for prefix checks.
    pub fn site_root(&self) -> &str {
        self.site.base_url.trim_end_matches('/')
    }

    pub fn local_category_url(&self) -> String {
        format!("{}{}", self.site_root(), self.site.local_category.path)
    }
}
