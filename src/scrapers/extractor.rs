//! Structured field extraction from a rendered article page.
//!
//! Two fields gate storage: an article without a usable story image or without
//! a machine-readable publish time yields `None`. A missing headline becomes
//! `"N/A"`, and a publish time in an unexpected format is kept raw with no
//! parsed value.

use super::fetcher::PageFetcher;
use super::{SiteProfile, element_text};
use crate::models::ArticleRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, instrument, warn};
use url::Url;

/// The one publish-time format the site emits, e.g. `2025-06-01T14:30:00.000Z`.
///
/// chrono treats `%.f` as optional when parsing; [`parse_published`] also
/// requires the fractional seconds.
pub const PUBLISHED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

static FRACTIONAL_UTC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{1,9}Z$").expect("valid timestamp regex")
});

/// Fetch `url` and extract it. Fetch failures and failed gates yield `None`.
#[instrument(level = "info", skip(fetcher, site))]
pub async fn extract<F: PageFetcher>(
    fetcher: &mut F,
    site: &SiteProfile,
    url: &str,
    category: &str,
    relative_time: &str,
) -> Option<ArticleRecord> {
    let html = match fetcher.fetch(url).await {
        Ok(html) => html,
        Err(e) => {
            warn!(error = %e, "Article fetch failed; skipping");
            return None;
        }
    };
    parse_article(&html, site, url, category, relative_time)
}

/// Extract an [`ArticleRecord`] from article HTML.
pub fn parse_article(
    html: &str,
    site: &SiteProfile,
    url: &str,
    category: &str,
    relative_time: &str,
) -> Option<ArticleRecord> {
    let document = Html::parse_document(html);
    let selectors = &site.selectors;

    let headline = document
        .select(&selectors.headline)
        .next()
        .map(element_text)
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "N/A".to_string());

    let Some(image) = document
        .select(&selectors.story_image)
        .filter_map(|img| img.value().attr("src"))
        .find_map(|src| normalize_image_url(src, url))
    else {
        warn!(%url, "No story image; skipping article");
        return None;
    };

    let description = document
        .select(&selectors.article_text)
        .filter(|p| p.select(&selectors.caption_marker).next().is_none())
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let Some(time) = document.select(&selectors.published_time).find(|t| {
        t.value()
            .attr("datetime")
            .is_some_and(|raw| !raw.trim().is_empty())
    }) else {
        warn!(%url, "No machine-readable publish time; skipping article");
        return None;
    };
    let published_datetime = time.value().attr("datetime").unwrap_or_default().trim().to_string();
    let published_text = element_text(time);
    let published_at = parse_published(&published_datetime);
    if published_at.is_none() {
        debug!(%url, raw = %published_datetime, "Publish time not in expected format");
    }

    Some(ArticleRecord {
        url: url.to_string(),
        headline,
        image,
        description,
        category: category.to_string(),
        published_at,
        post_date: published_at.map(|t| t.date_naive()),
        published_datetime,
        published_text,
        published_relative_time: relative_time.to_string(),
    })
}

/// Parse a publish timestamp in [`PUBLISHED_FORMAT`] as UTC.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if !FRACTIONAL_UTC.is_match(raw) {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, PUBLISHED_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Resolve an image `src` against the page and keep only scheme, host, and path.
///
/// Non-HTTP sources (inline `data:` placeholders and the like) are rejected.
pub fn normalize_image_url(src: &str, page_url: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    let mut image = match Url::parse(page_url) {
        Ok(page) => page.join(src).ok()?,
        Err(_) => Url::parse(src).ok()?,
    };
    if !matches!(image.scheme(), "http" | "https") || image.host_str().is_none() {
        return None;
    }
    image.set_query(None);
    image.set_fragment(None);
    Some(image.into())
}
