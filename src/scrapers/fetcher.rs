//! Rendered-page fetching through a headless Chromium session.
//!
//! One [`BrowserFetcher`] serves one crawl run: the browser is launched on the
//! first fetch and the same tab is reused for every page after that. Fetches
//! are strictly sequential (`&mut self`). Nothing is retried here; callers
//! skip the URL on error.

use crate::config::BrowserConfig;
use crate::error::FetchError;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use futures::{Stream, StreamExt};
use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Source of rendered HTML.
pub trait PageFetcher: Send {
    /// Navigate to `url`, let the page settle, and return its HTML.
    fn fetch(&mut self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

struct Session {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl Session {
    async fn launch(config: &BrowserConfig) -> Result<Self, FetchError> {
        let chrome_config = ChromeConfig::builder()
            .request_timeout(config.navigation_timeout())
            .build()
            .map_err(FetchError::Launch)?;
        let (browser, mut events) = Browser::launch(chrome_config)
            .await
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        // The CDP connection only makes progress while its handler is polled.
        let handler = tokio::spawn(async move {
            let errors = drive_handler(&mut events).await;
            debug!(errors, "Browser connection closed");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Launch(e.to_string()))?;
        info!("Headless browser launched");

        Ok(Self {
            browser,
            page,
            handler,
        })
    }
}

/// Poll browser events until the connection closes, logging and skipping
/// errors. Returns how many errors were seen.
async fn drive_handler<S, E>(events: &mut S) -> usize
where
    S: Stream<Item = Result<(), E>> + Unpin,
    E: fmt::Display,
{
    let mut errors = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            debug!(error = %e, "Browser event error");
            errors += 1;
        }
    }
    errors
}

pub struct BrowserFetcher {
    config: BrowserConfig,
    session: Option<Session>,
}

impl BrowserFetcher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    async fn page(&mut self) -> Result<&Page, FetchError> {
        let session = match self.session.take() {
            Some(session) if !session.handler.is_finished() => session,
            Some(_) => {
                warn!("Browser connection ended; relaunching");
                Session::launch(&self.config).await?
            }
            None => Session::launch(&self.config).await?,
        };
        Ok(&self.session.insert(session).page)
    }

    /// Shut the browser down. A fetcher that never fetched has nothing to close.
    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.browser.close().await {
                warn!(error = %e, "Failed to close browser cleanly");
            }
            session.handler.abort();
            info!("Headless browser closed");
        }
    }
}

impl PageFetcher for BrowserFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let limit = self.config.navigation_timeout();
        let settle = self.config.settle_delay();
        let page = self.page().await?;

        match timeout(limit, page.goto(url)).await {
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    after: limit,
                });
            }
            Ok(Err(e)) => {
                return Err(FetchError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(_)) => {}
        }

        sleep(settle).await;

        let html = page.content().await.map_err(|e| FetchError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(bytes = html.len(), "Fetched rendered page");
        Ok(html)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fetcher serving canned HTML.

    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub struct FakeSite {
        pages: HashMap<String, String>,
        /// Every URL requested, in order, including failed ones.
        pub requests: Vec<String>,
    }

    impl FakeSite {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
            self.pages.insert(url.to_string(), html.into());
            self
        }

        pub fn count(&self, url: &str) -> usize {
            self.requests.iter().filter(|u| u.as_str() == url).count()
        }
    }

    impl PageFetcher for FakeSite {
        async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
            self.requests.push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                })
        }
    }
}
