//! One locked crawl run: prune, discover, extract, classify, store.
//!
//! A run holds the [`RunLock`] for its whole duration. When the lock is already
//! taken the run is dropped, not queued. Within a run everything is sequential
//! over a single fetcher, and a failure on one article is logged and counted
//! without touching the rest of the batch.

use crate::api::ChatBackend;
use crate::config::AppConfig;
use crate::error::{ConfigError, IngestError, StoreError};
use crate::lock::RunLock;
use crate::models::{ArticleLink, Category, SiteVariant};
use crate::scrapers::SiteProfile;
use crate::scrapers::discovery::{discover_articles, discover_categories};
use crate::scrapers::extractor::extract;
use crate::scrapers::fetcher::PageFetcher;
use crate::sentiment::{Sentiment, SentimentClassifier};
use crate::store::NewsStore;
use crate::utils::checked_ago;
use chrono::{TimeDelta, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Result of asking for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run held the lock; nothing was done.
    AlreadyRunning,
    Completed(Vec<VariantReport>),
}

/// Counters for one site variant within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantReport {
    pub variant: SiteVariant,
    pub categories: usize,
    /// Unique article links found across all listings.
    pub discovered: usize,
    pub created: usize,
    /// Already stored under the same headline.
    pub existing: usize,
    /// Unreachable pages and pages failing the image or publish-time gate.
    pub skipped: usize,
    /// Storage errors.
    pub failed: usize,
    /// Stored without a sentiment label because the classifier was unavailable.
    pub unlabelled: usize,
}

impl VariantReport {
    fn new(variant: SiteVariant) -> Self {
        Self {
            variant,
            categories: 0,
            discovered: 0,
            created: 0,
            existing: 0,
            skipped: 0,
            failed: 0,
            unlabelled: 0,
        }
    }
}

enum ArticleOutcome {
    Created { labelled: bool },
    Existing,
    Skipped,
}

pub struct Ingestor<B> {
    config: Arc<AppConfig>,
    site: SiteProfile,
    store: NewsStore,
    classifier: SentimentClassifier<B>,
}

impl<B: ChatBackend> Ingestor<B> {
    pub fn new(
        config: Arc<AppConfig>,
        store: NewsStore,
        classifier: SentimentClassifier<B>,
    ) -> Result<Self, ConfigError> {
        let site = SiteProfile::from_config(&config)?;
        Ok(Self {
            config,
            site,
            store,
            classifier,
        })
    }

    pub fn store(&self) -> &NewsStore {
        &self.store
    }

    /// Delete articles older than the retention horizon.
    pub async fn prune(&self) -> Result<u64, StoreError> {
        let days = self.config.storage.retention_days;
        let Some(cutoff) = checked_ago(Utc::now(), TimeDelta::try_days(days)) else {
            warn!(days, "Retention horizon is out of range; nothing to prune");
            return Ok(0);
        };
        let removed = self.store.prune_older_than(cutoff).await?;
        info!(removed, %cutoff, "Pruned old articles");
        Ok(removed)
    }

    /// Run the given variants in order under the run lock.
    ///
    /// Returns [`RunOutcome::AlreadyRunning`] without fetching anything when the
    /// lock is held elsewhere. The lock is released on every exit path.
    #[instrument(level = "info", skip(self, fetcher))]
    pub async fn run<F: PageFetcher>(
        &self,
        fetcher: &mut F,
        variants: &[SiteVariant],
    ) -> Result<RunOutcome, IngestError> {
        let lock_path = &self.config.lock_path;
        let Some(lock) = RunLock::acquire(lock_path).map_err(IngestError::Lock)? else {
            info!(path = %lock_path.display(), "Another run is in progress; skipping");
            return Ok(RunOutcome::AlreadyRunning);
        };
        debug!(path = %lock.path().display(), "Run lock held");

        let t0 = Instant::now();
        self.prune().await?;

        let mut reports = Vec::with_capacity(variants.len());
        for &variant in variants {
            reports.push(self.run_variant(fetcher, variant).await);
        }

        // A failed count does not fail the run.
        let stored = match self.store.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Could not count stored articles");
                None
            }
        };
        info!(
            variants = reports.len(),
            created = reports.iter().map(|r| r.created).sum::<usize>(),
            stored = ?stored,
            elapsed_ms = t0.elapsed().as_millis(),
            "Run finished"
        );
        drop(lock);
        Ok(RunOutcome::Completed(reports))
    }

    #[instrument(level = "info", skip(self, fetcher, variant), fields(variant = %variant))]
    async fn run_variant<F: PageFetcher>(&self, fetcher: &mut F, variant: SiteVariant) -> VariantReport {
        let t0 = Instant::now();
        let mut report = VariantReport::new(variant);

        let categories = match variant {
            SiteVariant::General => {
                let home = self.site.base.as_str();
                match fetcher.fetch(home).await {
                    Ok(html) => discover_categories(&html, &self.site),
                    Err(e) => {
                        error!(url = %home, error = %e, "Home page fetch failed; no categories");
                        Vec::new()
                    }
                }
            }
            SiteVariant::Local => vec![Category {
                name: self.config.site.local_category.name.clone(),
                url: self.config.local_category_url(),
            }],
        };
        report.categories = categories.len();

        // Shared across this variant's categories so overlapping sections are walked once.
        let mut visited = HashSet::new();
        for category in &categories {
            let links = discover_articles(fetcher, &category.url, &mut visited, &self.site).await;
            report.discovered += links.len();

            for link in &links {
                match self.ingest_link(fetcher, category, link).await {
                    Ok(ArticleOutcome::Created { labelled }) => {
                        report.created += 1;
                        if !labelled {
                            report.unlabelled += 1;
                        }
                    }
                    Ok(ArticleOutcome::Existing) => report.existing += 1,
                    Ok(ArticleOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        error!(url = %link.url, error = %e, "Failed to store article");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            categories = report.categories,
            discovered = report.discovered,
            created = report.created,
            existing = report.existing,
            skipped = report.skipped,
            failed = report.failed,
            unlabelled = report.unlabelled,
            elapsed_ms = t0.elapsed().as_millis(),
            "Variant finished"
        );
        report
    }

    async fn ingest_link<F: PageFetcher>(
        &self,
        fetcher: &mut F,
        category: &Category,
        link: &ArticleLink,
    ) -> Result<ArticleOutcome, StoreError> {
        let Some(record) = extract(
            fetcher,
            &self.site,
            &link.url,
            &category.name,
            &link.relative_time,
        )
        .await
        else {
            return Ok(ArticleOutcome::Skipped);
        };

        if record.description.is_empty() {
            warn!(url = %record.url, "Article has no description");
        }
        if record.published_relative_time == "N/A" {
            warn!(url = %record.url, "Article has no relative time on its listing");
        }

        // Stored rows are never updated, so only new headlines are worth a classifier call.
        if let Some(existing) = self.store.find_by_title(&record.headline).await? {
            debug!(id = existing.id, title = %existing.title, "Already stored");
            return Ok(ArticleOutcome::Existing);
        }

        let sentiment = self
            .classifier
            .classify(&record.headline, &record.description)
            .await;
        let (article, created) = self.store.get_or_create(&record, sentiment.label()).await?;
        if !created {
            return Ok(ArticleOutcome::Existing);
        }
        info!(
            id = article.id,
            title = %article.title,
            post_date = ?record.post_date,
            ?sentiment,
            "Stored article"
        );
        Ok(ArticleOutcome::Created {
            labelled: sentiment != Sentiment::Unavailable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassifyError, FetchError};
    use crate::models::{ArticleRecord, SentimentLabel};
    use crate::scrapers::fetcher::testing::FakeSite;
    use crate::store::ArticleFilter;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOME: &str = "https://www.ksat.com/";
    const SPORTS: &str = "https://www.ksat.com/sports/";
    const LOCAL: &str = "https://www.ksat.com/news/local/";

    #[derive(Clone, Default)]
    struct Canned {
        reply: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl ChatBackend for Canned {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .ok_or(ClassifyError::Status {
                    status: 503,
                    body: String::new(),
                })
        }
    }

    struct Exploding;

    impl PageFetcher for Exploding {
        async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
            panic!("renderer crashed on {url}");
        }
    }

    async fn ingestor(dir: &Path, reply: Option<&'static str>) -> (Ingestor<Canned>, Arc<AtomicUsize>) {
        ingestor_with(dir, reply, |_| {}).await
    }

    async fn ingestor_with(
        dir: &Path,
        reply: Option<&'static str>,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> (Ingestor<Canned>, Arc<AtomicUsize>) {
        let mut config = AppConfig::default();
        config.lock_path = dir.join("scraping.lock");
        tweak(&mut config);
        let backend = Canned {
            reply,
            calls: Arc::default(),
        };
        let calls = backend.calls.clone();
        let classifier = SentimentClassifier::new(backend, config.classifier.max_description_chars);
        let store = NewsStore::in_memory().await.unwrap();
        (
            Ingestor::new(Arc::new(config), store, classifier).unwrap(),
            calls,
        )
    }

    fn now_stamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    fn listing(paths: &[&str]) -> String {
        let items: String = paths
            .iter()
            .map(|path| format!(r#"<span class="time"><a href="{path}"><span>1 hour ago</span></a></span>"#))
            .collect();
        format!("<html><body>{items}</body></html>")
    }

    fn article(headline: &str) -> String {
        format!(
            r#"<html><body>
                <h1>{headline}</h1>
                <div class="basicStory"><div class="imageWrapper"><img src="/resizer/{len}.jpg"></div></div>
                <time datetime="{stamp}">Today</time>
                <p class="article-text">Story about {headline}.</p>
            </body></html>"#,
            len = headline.len(),
            stamp = now_stamp(),
        )
    }

    fn home() -> String {
        r#"<html><body><nav aria-label="Main Navigation">
            <a href="/sports/">Sports</a><a href="/weather/">Weather</a>
        </nav></body></html>"#
            .to_string()
    }

    fn record(headline: &str) -> ArticleRecord {
        ArticleRecord {
            url: format!("{SPORTS}2025/06/01/stored/"),
            headline: headline.to_string(),
            image: "https://img.ksat.com/a.jpg".to_string(),
            description: "Already here.".to_string(),
            category: "Sports".to_string(),
            published_datetime: now_stamp(),
            published_text: "Today".to_string(),
            published_at: Some(Utc::now()),
            post_date: Some(Utc::now().date_naive()),
            published_relative_time: "N/A".to_string(),
        }
    }

    #[tokio::test]
    async fn test_held_lock_means_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, calls) = ingestor(dir.path(), Some("positive")).await;
        let lock_path = dir.path().join("scraping.lock");
        std::fs::write(&lock_path, "4242").unwrap();

        let mut site = FakeSite::new().page(HOME, home());
        let outcome = ingestor
            .run(&mut site, &[SiteVariant::General, SiteVariant::Local])
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::AlreadyRunning);
        assert!(site.requests.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_to_string(&lock_path).unwrap(), "4242");
    }

    #[tokio::test]
    async fn test_general_run_stores_articles_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, calls) = ingestor(dir.path(), Some("Positive")).await;
        let mut site = FakeSite::new()
            .page(HOME, home())
            .page(
                SPORTS,
                listing(&["/sports/2025/06/01/spurs-win/", "/sports/2025/06/01/missions-lose/"]),
            )
            .page(&format!("{SPORTS}2025/06/01/spurs-win/"), article("Spurs win"))
            .page(&format!("{SPORTS}2025/06/01/missions-lose/"), article("Missions lose"));

        let outcome = ingestor.run(&mut site, &[SiteVariant::General]).await.unwrap();

        let RunOutcome::Completed(reports) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].categories, 1);
        assert_eq!(reports[0].discovered, 2);
        assert_eq!(reports[0].created, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!dir.path().join("scraping.lock").exists());

        let stored = ingestor.store().query(&ArticleFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.category.as_deref() == Some("Sports")));
        assert!(stored.iter().all(|a| a.sentiment_label == Some(SentimentLabel::Positive)));
        assert!(stored.iter().all(|a| a.published_relative_time.as_deref() == Some("1 hour ago")));
        // The weather section is not allow-listed.
        assert_eq!(site.count("https://www.ksat.com/weather/"), 0);
    }

    #[tokio::test]
    async fn test_bad_articles_do_not_sink_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(dir.path(), Some("negative")).await;
        let no_image = article("No image").replace("<img", "<video");
        let mut site = FakeSite::new()
            .page(
                LOCAL,
                listing(&[
                    "/news/local/2025/06/01/unreachable/",
                    "/news/local/2025/06/01/no-image/",
                    "/news/local/2025/06/01/good/",
                ]),
            )
            .page(&format!("{LOCAL}2025/06/01/no-image/"), no_image)
            .page(&format!("{LOCAL}2025/06/01/good/"), article("Good story"));

        let RunOutcome::Completed(reports) = ingestor.run(&mut site, &[SiteVariant::Local]).await.unwrap()
        else {
            panic!("expected a completed run");
        };

        let report = &reports[0];
        assert_eq!(report.discovered, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(site.count(HOME), 0);

        let stored = ingestor.store().find_by_title("Good story").await.unwrap().unwrap();
        assert_eq!(stored.category.as_deref(), Some("Local"));
        assert_eq!(stored.sentiment_label, Some(SentimentLabel::Negative));
    }

    #[tokio::test]
    async fn test_known_headline_skips_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, calls) = ingestor(dir.path(), Some("negative")).await;
        ingestor
            .store()
            .get_or_create(&record("Spurs win"), Some(SentimentLabel::Positive))
            .await
            .unwrap();
        let mut site = FakeSite::new()
            .page(LOCAL, listing(&["/news/local/2025/06/01/spurs-win/"]))
            .page(&format!("{LOCAL}2025/06/01/spurs-win/"), article("Spurs win"));

        let RunOutcome::Completed(reports) = ingestor.run(&mut site, &[SiteVariant::Local]).await.unwrap()
        else {
            panic!("expected a completed run");
        };

        assert_eq!(reports[0].existing, 1);
        assert_eq!(reports[0].created, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let stored = ingestor.store().find_by_title("Spurs win").await.unwrap().unwrap();
        assert_eq!(stored.sentiment_label, Some(SentimentLabel::Positive));
        assert_eq!(stored.description.as_deref(), Some("Already here."));
    }

    #[tokio::test]
    async fn test_unavailable_classifier_stores_null_label() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, calls) = ingestor(dir.path(), None).await;
        let mut site = FakeSite::new()
            .page(LOCAL, listing(&["/news/local/2025/06/01/quiet/"]))
            .page(&format!("{LOCAL}2025/06/01/quiet/"), article("Quiet day"));

        let RunOutcome::Completed(reports) = ingestor.run(&mut site, &[SiteVariant::Local]).await.unwrap()
        else {
            panic!("expected a completed run");
        };

        assert_eq!(reports[0].created, 1);
        assert_eq!(reports[0].unlabelled, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stored = ingestor.store().find_by_title("Quiet day").await.unwrap().unwrap();
        assert_eq!(stored.sentiment_label, None);
    }

    #[tokio::test]
    async fn test_storage_error_counts_as_failed_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, calls) = ingestor(dir.path(), Some("positive")).await;
        sqlx::query(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON news WHEN NEW.title = 'Bad' \
             BEGIN SELECT RAISE(ABORT, 'boom'); END",
        )
        .execute(ingestor.store().pool())
        .await
        .unwrap();
        let mut site = FakeSite::new()
            .page(
                LOCAL,
                listing(&[
                    "/news/local/2025/06/01/first/",
                    "/news/local/2025/06/01/bad/",
                    "/news/local/2025/06/01/last/",
                ]),
            )
            .page(&format!("{LOCAL}2025/06/01/first/"), article("First"))
            .page(&format!("{LOCAL}2025/06/01/bad/"), article("Bad"))
            .page(&format!("{LOCAL}2025/06/01/last/"), article("Last"));

        let RunOutcome::Completed(reports) = ingestor.run(&mut site, &[SiteVariant::Local]).await.unwrap()
        else {
            panic!("expected a completed run");
        };

        assert_eq!(reports[0].failed, 1);
        assert_eq!(reports[0].created, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(ingestor.store().find_by_title("Bad").await.unwrap().is_none());
        assert!(ingestor.store().find_by_title("Last").await.unwrap().is_some());
        assert!(!dir.path().join("scraping.lock").exists());
    }

    #[tokio::test]
    async fn test_run_future_is_send() {
        fn assert_send<T: Send>(future: T) -> T {
            future
        }

        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(dir.path(), Some("positive")).await;
        let mut site = FakeSite::new().page(LOCAL, listing(&[]));

        let outcome = assert_send(ingestor.run(&mut site, &[SiteVariant::Local]))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_retention_prunes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) =
            ingestor_with(dir.path(), Some("positive"), |c| c.storage.retention_days = i64::MAX).await;
        let mut ancient = record("Ancient news");
        ancient.published_at = Some(Utc::now() - TimeDelta::days(3650));
        ingestor.store().get_or_create(&ancient, None).await.unwrap();

        assert_eq!(ingestor.prune().await.unwrap(), 0);
        assert!(ingestor.store().find_by_title("Ancient news").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_prunes_before_crawling() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(dir.path(), Some("positive")).await;
        let mut stale = record("Old news");
        stale.published_at = Some(Utc::now() - TimeDelta::days(30));
        ingestor.store().get_or_create(&stale, None).await.unwrap();
        ingestor.store().get_or_create(&record("Fresh news"), None).await.unwrap();

        let mut site = FakeSite::new().page(LOCAL, listing(&[]));
        ingestor.run(&mut site, &[SiteVariant::Local]).await.unwrap();

        assert!(ingestor.store().find_by_title("Old news").await.unwrap().is_none());
        assert!(ingestor.store().find_by_title("Fresh news").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_home_page_completes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(dir.path(), Some("positive")).await;
        let mut site = FakeSite::new();

        let outcome = ingestor.run(&mut site, &[SiteVariant::General]).await.unwrap();

        let RunOutcome::Completed(reports) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(reports[0].categories, 0);
        assert_eq!(site.requests, vec![HOME.to_string()]);
        assert!(!dir.path().join("scraping.lock").exists());
    }

    #[tokio::test]
    async fn test_lock_released_when_run_panics() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _) = ingestor(dir.path(), Some("positive")).await;
        let ingestor = Arc::new(ingestor);

        let task = {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                let mut fetcher = Exploding;
                ingestor.run(&mut fetcher, &[SiteVariant::Local]).await
            })
        };

        let err = task.await.unwrap_err();
        assert!(err.is_panic());
        assert!(!dir.path().join("scraping.lock").exists());

        // The next run is not blocked by a stale lock.
        let mut site = FakeSite::new().page(LOCAL, listing(&[]));
        let outcome = ingestor.run(&mut site, &[SiteVariant::Local]).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }
}
