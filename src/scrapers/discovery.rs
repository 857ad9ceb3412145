//! Category and article-link discovery.
//!
//! # Link classification
//!
//! A resolved same-origin link on a listing page is an **article** when its URL
//! has a dated path (`/2025/06/01/`), contains `/article`, or ends in a single
//! slug directly under `/news/` (`/news/some-story/`). Otherwise it is a
//! **subcategory** when it extends the current listing's path, and is dropped
//! in every other case.
//!
//! # Traversal
//!
//! [`discover_articles`] walks listings depth-first with an explicit stack. The
//! caller-owned `visited` set is checked before every fetch, so listing pages
//! that link back to each other are fetched once and the walk always ends.

use super::fetcher::PageFetcher;
use super::{SiteProfile, element_text};
use crate::models::{ArticleLink, Category};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

static DATED_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\d{4}/\d{2}/\d{2}/").expect("valid dated-path regex"));
static NEWS_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/news/[^/]+/$").expect("valid news-slug regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Article,
    Subcategory,
    Other,
}

/// Classify `url` as found on the listing at `listing_url`.
pub fn classify_link(url: &str, listing_url: &str) -> LinkKind {
    if DATED_PATH.is_match(url) || url.contains("/article") || NEWS_SLUG.is_match(url) {
        return LinkKind::Article;
    }

    let prefix = format!("{}/", listing_url.trim_end_matches('/'));
    if url.starts_with(&prefix) && url.len() > prefix.len() {
        LinkKind::Subcategory
    } else {
        LinkKind::Other
    }
}

/// Find allow-listed categories in the home page navigation.
///
/// Keeps the first position of each category name; a later link with the same
/// name replaces the URL.
#[instrument(level = "info", skip_all)]
pub fn discover_categories(home_html: &str, site: &SiteProfile) -> Vec<Category> {
    let document = Html::parse_document(home_html);
    let mut categories: Vec<Category> = Vec::new();

    for link in document.select(&site.selectors.navigation_link) {
        let name = element_text(link);
        if !site.categories.iter().any(|c| *c == name) {
            continue;
        }
        let Some(url) = link.value().attr("href").and_then(|href| site.resolve(href)) else {
            debug!(%name, "Category link is not on this site");
            continue;
        };

        match categories.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.url = url,
            None => categories.push(Category { name, url }),
        }
    }

    info!(
        count = categories.len(),
        names = ?categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "Discovered categories"
    );
    categories
}

/// Links found on one listing page.
#[derive(Debug, Default, PartialEq)]
pub struct ListingLinks {
    pub articles: Vec<ArticleLink>,
    pub subcategories: Vec<String>,
}

/// Pull article and subcategory links out of one listing page.
pub fn parse_listing(
    html: &str,
    listing_url: &str,
    site: &SiteProfile,
    visited: &HashSet<String>,
) -> ListingLinks {
    let document = Html::parse_document(html);
    let mut links = ListingLinks::default();

    for anchor in document.select(&site.selectors.listing_link) {
        let Some(url) = anchor.value().attr("href").and_then(|href| site.resolve(href)) else {
            continue;
        };
        if visited.contains(&url) || site.ignored.contains(&url) {
            continue;
        }

        match classify_link(&url, listing_url) {
            LinkKind::Article => {
                let relative_time = anchor
                    .select(&site.selectors.listing_relative_time)
                    .next()
                    .map(element_text)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "N/A".to_string());
                links.articles.push(ArticleLink { url, relative_time });
            }
            LinkKind::Subcategory => links.subcategories.push(url),
            LinkKind::Other => {}
        }
    }

    links
}

/// Collect article links from `start_url` and every subcategory reachable from it.
///
/// `visited` is shared with the caller and may already hold listings from an
/// earlier category of the same run. A listing that fails to load is logged
/// and skipped. The result holds each URL once, in first-seen order.
#[instrument(level = "info", skip(fetcher, visited, site))]
pub async fn discover_articles<F: PageFetcher>(
    fetcher: &mut F,
    start_url: &str,
    visited: &mut HashSet<String>,
    site: &SiteProfile,
) -> Vec<ArticleLink> {
    let mut pending = vec![start_url.to_string()];
    let mut found = Vec::new();

    while let Some(listing) = pending.pop() {
        if !visited.insert(listing.clone()) {
            continue;
        }

        let html = match fetcher.fetch(&listing).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %listing, error = %e, "Listing fetch failed; skipping");
                continue;
            }
        };

        let links = parse_listing(&html, &listing, site, visited);
        debug!(
            url = %listing,
            articles = links.articles.len(),
            subcategories = links.subcategories.len(),
            "Parsed listing"
        );
        found.extend(links.articles);
        // Reversed so the first subcategory on the page is walked first.
        pending.extend(links.subcategories.into_iter().rev());
    }

    let articles: Vec<ArticleLink> = found.into_iter().unique_by(|l| l.url.clone()).collect();
    info!(count = articles.len(), "Discovered article links");
    articles
}
