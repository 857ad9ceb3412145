//! SQLite persistence for scraped news.
//!
//! The `title` column is the deduplication key. Rows are written once through
//! [`NewsStore::get_or_create`] and only ever removed by retention pruning or by
//! the read side. Timestamps are stored as fixed-width RFC 3339 UTC strings so
//! that SQL string comparison orders them chronologically.

use crate::error::StoreError;
use crate::models::{ArticleRecord, NewsArticle, SentimentLabel};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL UNIQUE,
        description TEXT,
        category TEXT,
        image TEXT NOT NULL CHECK (image <> '' AND image <> 'N/A'),
        published_relative_time TEXT,
        published_datetime TEXT,
        sentiment_label TEXT CHECK (sentiment_label IN ('positive', 'negative', 'neutral')),
        source_url TEXT,
        scraped_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS news_published_datetime_idx
        ON news (published_datetime DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        news_id INTEGER NOT NULL REFERENCES news (id) ON DELETE CASCADE,
        love INTEGER NOT NULL DEFAULT 0,
        comment TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (user_id, news_id)
    )
    "#,
];

/// Filters for reading stored articles back, newest first.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    /// Only articles published at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring over title, description, and category.
    pub search: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewsStore {
    pool: SqlitePool,
}

impl NewsStore {
    /// Open (creating if needed) the database file at `path` and run migrations.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("News database ready");
        Ok(store)
    }

    /// A private in-memory database. One connection that never expires, since
    /// every SQLite in-memory connection is a separate database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            sqlx::query(migration).execute(&self.pool).await?;
            debug!(migration = i, "Applied migration");
        }
        Ok(())
    }

    pub async fn find_by_title(&self, title: &str) -> Result<Option<NewsArticle>, StoreError> {
        let row = sqlx::query("SELECT * FROM news WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    /// Look up `record.headline`; insert it with `sentiment` when absent.
    ///
    /// Returns the stored row and whether this call created it. An existing row
    /// is returned untouched, including its original sentiment label.
    #[instrument(level = "debug", skip_all, fields(title = %record.headline))]
    pub async fn get_or_create(
        &self,
        record: &ArticleRecord,
        sentiment: Option<SentimentLabel>,
    ) -> Result<(NewsArticle, bool), StoreError> {
        let description = Some(record.description.as_str()).filter(|d| !d.is_empty());
        let result = sqlx::query(
            r#"
            INSERT INTO news
            (title, description, category, image, published_relative_time,
             published_datetime, sentiment_label, source_url, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (title) DO NOTHING
            "#,
        )
        .bind(&record.headline)
        .bind(description)
        .bind(&record.category)
        .bind(&record.image)
        .bind(&record.published_relative_time)
        .bind(record.published_at.map(format_timestamp))
        .bind(sentiment.map(|s| s.as_str()))
        .bind(&record.url)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        let article = self.find_by_title(&record.headline).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("row for '{}' missing after insert", record.headline))
        })?;
        Ok((article, created))
    }

    /// Delete articles published before `cutoff`. Rows without a parsed publish
    /// time age by when they were scraped. Reactions cascade.
    #[instrument(level = "info", skip(self))]
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM news WHERE COALESCE(published_datetime, scraped_at) < ?")
                .bind(format_timestamp(cutoff))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn query(&self, filter: &ArticleFilter) -> Result<Vec<NewsArticle>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM news WHERE 1 = 1");
        if let Some(since) = filter.since {
            qb.push(" AND published_datetime >= ")
                .push_bind(format_timestamp(since));
        }
        if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
            let pattern = format!("%{}%", escape_like(term.trim()));
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR description LIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR category LIKE ")
                .push_bind(pattern)
                .push(r" ESCAPE '\')");
        }
        qb.push(" ORDER BY published_datetime IS NULL, published_datetime DESC, id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(article_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM news")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn article_from_row(row: &SqliteRow) -> Result<NewsArticle, StoreError> {
    let published_datetime = row
        .try_get::<Option<String>, _>("published_datetime")?
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;
    let sentiment_label = row
        .try_get::<Option<String>, _>("sentiment_label")?
        .as_deref()
        .map(|s| s.parse::<SentimentLabel>().map_err(StoreError::Corrupt))
        .transpose()?;
    let scraped_at = parse_timestamp(&row.try_get::<String, _>("scraped_at")?)?;

    Ok(NewsArticle {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        image: row.try_get("image")?,
        published_relative_time: row.try_get("published_relative_time")?,
        published_datetime,
        sentiment_label,
        source_url: row.try_get("source_url")?,
        scraped_at,
    })
}
