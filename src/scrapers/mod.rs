//! Crawling and extraction for the KSAT site.
//!
//! Scraping runs in three steps over one shared [`fetcher::PageFetcher`]:
//!
//! 1. **Categories**: read the home page navigation ([`discovery::discover_categories`])
//! 2. **Listings**: walk each category and its subcategories for article links
//!    ([`discovery::discover_articles`])
//! 3. **Articles**: pull structured fields out of each article page
//!    ([`extractor::extract`])
//!
//! HTML parsing is synchronous and never held across an `.await`, so the async
//! functions here stay `Send`. Failures never propagate out of a step: a page
//! that cannot be fetched or parsed is logged and skipped.

pub mod discovery;
pub mod extractor;
pub mod fetcher;

use crate::config::{AppConfig, SelectorConfig};
use crate::error::ConfigError;
use crate::utils::collapse_whitespace;
use scraper::{ElementRef, Selector};
use std::collections::HashSet;
use url::Url;

/// Compiled CSS selectors for the site's markup landmarks.
#[derive(Debug)]
pub struct Selectors {
    pub navigation_link: Selector,
    pub listing_link: Selector,
    pub listing_relative_time: Selector,
    pub headline: Selector,
    pub story_image: Selector,
    pub article_text: Selector,
    pub caption_marker: Selector,
    pub published_time: Selector,
}

impl Selectors {
    pub fn compile(config: &SelectorConfig) -> Result<Self, ConfigError> {
        fn parse(name: &str, raw: &str) -> Result<Selector, ConfigError> {
            Selector::parse(raw).map_err(|e| ConfigError::Invalid(format!("selectors.{name}: {e}")))
        }

        Ok(Self {
            navigation_link: parse("navigation_link", &config.navigation_link)?,
            listing_link: parse("listing_link", &config.listing_link)?,
            listing_relative_time: parse("listing_relative_time", &config.listing_relative_time)?,
            headline: parse("headline", &config.headline)?,
            story_image: parse("story_image", &config.story_image)?,
            article_text: parse("article_text", &config.article_text)?,
            caption_marker: parse("caption_marker", &config.caption_marker)?,
            published_time: parse("published_time", &config.published_time)?,
        })
    }
}

/// Everything the scrapers need to know about the target site.
#[derive(Debug)]
pub struct SiteProfile {
    pub base: Url,
    /// Navigation texts accepted as categories.
    pub categories: Vec<String>,
    /// Absolute URLs that are neither articles nor listings.
    pub ignored: HashSet<String>,
    pub selectors: Selectors,
}

impl SiteProfile {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.site.base_url)
            .map_err(|e| ConfigError::Invalid(format!("site.base_url: {e}")))?;
        let ignored = config
            .site
            .ignored_paths
            .iter()
            .filter_map(|path| base.join(path).ok())
            .map(String::from)
            .collect();

        Ok(Self {
            base,
            categories: config.site.categories.clone(),
            ignored,
            selectors: Selectors::compile(&config.selectors)?,
        })
    }

    /// Resolve an `href` found on the site to an absolute same-origin URL.
    ///
    /// Absolute `http(s)` links are taken as-is and root-relative links are
    /// joined to the site root. Page-relative links, fragments, `mailto:` and
    /// links to other origins yield `None`.
    pub fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        let resolved = if href.starts_with("http") {
            Url::parse(href).ok()?
        } else if href.starts_with('/') {
            self.base.join(href).ok()?
        } else {
            return None;
        };

        (resolved.origin() == self.base.origin()).then(|| resolved.into())
    }
}

/// Whitespace-normalized text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}
