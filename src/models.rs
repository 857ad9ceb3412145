//! Data models for crawled links, extracted articles, and stored news rows.
//!
//! - [`Category`] and [`ArticleLink`]: output of link discovery
//! - [`ArticleRecord`]: one article as extracted from its page
//! - [`NewsArticle`]: a persisted row, the shape the read side consumes
//! - [`SentimentLabel`]: the constrained label stored with a row

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A navigation category and the listing page it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub url: String,
}

/// An article URL found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleLink {
    pub url: String,
    /// Relative time as shown on the listing ("2 hours ago"), or `"N/A"`.
    pub relative_time: String,
}

/// Fields extracted from a single article page.
///
/// Only produced when the page had both a usable image and a machine-readable
/// publish time, so `image` and `published_datetime` are never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub url: String,
    pub headline: String,
    /// Absolute image URL with query and fragment stripped.
    pub image: String,
    pub description: String,
    pub category: String,
    /// Raw `datetime` attribute of the time element.
    pub published_datetime: String,
    /// Visible text of the time element.
    pub published_text: String,
    /// `published_datetime` parsed as UTC, when it matched the expected format.
    pub published_at: Option<DateTime<Utc>>,
    pub post_date: Option<NaiveDate>,
    pub published_relative_time: String,
}

/// Sentiment label as persisted. Absence of a label is `None`, never a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "negative" => Ok(SentimentLabel::Negative),
            "neutral" => Ok(SentimentLabel::Neutral),
            other => Err(format!("unknown sentiment label: {other}")),
        }
    }
}

/// A stored news article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsArticle {
    pub id: i64,
    /// Headline; unique across the table.
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image: String,
    /// Snapshot of the listing's relative time at crawl time.
    pub published_relative_time: Option<String>,
    pub published_datetime: Option<DateTime<Utc>>,
    pub sentiment_label: Option<SentimentLabel>,
    pub source_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Which starting point a crawl run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SiteVariant {
    /// Every allow-listed category from the site navigation.
    General,
    /// The single fixed local-news category.
    Local,
}

impl fmt::Display for SiteVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteVariant::General => f.write_str("general"),
            SiteVariant::Local => f.write_str("local"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentiment_label_round_trips_through_str() {
        for label in [
            SentimentLabel::Positive,
            SentimentLabel::Negative,
            SentimentLabel::Neutral,
        ] {
            assert_eq!(label.as_str().parse::<SentimentLabel>(), Ok(label));
        }
        assert!("Positive".parse::<SentimentLabel>().is_err());
    }

    #[test]
    fn test_news_article_serialization() {
        let article = NewsArticle {
            id: 1,
            title: "Spurs win".to_string(),
            description: None,
            category: Some("Sports".to_string()),
            image: "https://img.example.com/a.jpg".to_string(),
            published_relative_time: Some("2 hours ago".to_string()),
            published_datetime: None,
            sentiment_label: Some(SentimentLabel::Positive),
            source_url: None,
            scraped_at: Utc::now(),
        };

        let json = serde_json::to_string(&article).unwrap();
        assert!(json.contains("\"sentiment_label\":\"positive\""));
        assert!(json.contains("\"description\":null"));
    }

    #[test]
    fn test_site_variant_display() {
        assert_eq!(SiteVariant::General.to_string(), "general");
        assert_eq!(SiteVariant::Local.to_string(), "local");
    }
}
