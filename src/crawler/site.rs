//! Contract every crawled site implements.
//!
//! A site adapter knows where a site keeps its search box, result items and
//! "next page" control. The page-walk worker drives it through one crawl and
//! never looks at which site it is dealing with beyond its configuration.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::browser::{scroll_fixed, Browser, BrowserError, Locator};
use crate::cli::config::{Credentials, ScrollPolicy};
use crate::crawler::fetcher::{FetchError, ImageFetcher, SavedImage};
use crate::crawler::task::CrawlTask;
use crate::storage::cursor::PageCursor;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("no result URLs on this page")]
    NoResults,

    #[error("no original image found behind {0}")]
    NotFound(String),

    #[error("operation '{0}' is not supported by this site")]
    Unsupported(&'static str),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("page cursor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Optional steps an adapter actually implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub keywords: bool,
    pub popup: bool,
    pub mode_switch: bool,
    pub resolve_original: bool,
}

/// Walk progress shared between the page-walk worker and its adapter
#[derive(Debug)]
pub struct WalkState {
    cursor: Option<PageCursor>,
    last_page: bool,
}

impl WalkState {
    /// `cursor` is `None` for sites without pagination
    pub fn new(cursor: Option<PageCursor>) -> Self {
        Self {
            cursor,
            last_page: false,
        }
    }

    pub fn is_last_page(&self) -> bool {
        self.last_page
    }

    /// No further page exists; `current_url` is persisted with the finished marker
    pub async fn mark_last_page(&mut self, current_url: &str) -> Result<(), SiteError> {
        self.last_page = true;
        if let Some(cursor) = &self.cursor {
            cursor.mark_finished(current_url).await?;
        }
        debug!("Reached last page at {}", current_url);
        Ok(())
    }

    /// The walk moved on to `url`
    pub async fn record_page_cursor(&mut self, url: &str) -> Result<(), SiteError> {
        if let Some(cursor) = &self.cursor {
            cursor.record(url).await?;
        }
        Ok(())
    }
}

/// Site-specific page-walking behaviour.
///
/// Every step may fail; the walker treats a failure as "stop this site", never
/// as fatal to the crawl.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Submit a search for `keywords` from the entry page
    async fn enter_keywords(&mut self, _browser: &dyn Browser, _keywords: &str) -> Result<(), SiteError> {
        Err(SiteError::Unsupported("enter_keywords"))
    }

    async fn dismiss_popup(&mut self, _browser: &dyn Browser) -> Result<(), SiteError> {
        Err(SiteError::Unsupported("dismiss_popup"))
    }

    /// Log in; by default an operator completes the login in the visible browser
    async fn login(&mut self, _browser: &dyn Browser, credentials: &Credentials) -> Result<(), SiteError> {
        wait_for_operator(credentials).await
    }

    /// Move from the lazily loaded result view into the paginated one
    async fn switch_to_paginated_mode(&mut self, _browser: &dyn Browser) -> Result<(), SiteError> {
        Err(SiteError::Unsupported("switch_to_paginated_mode"))
    }

    /// Trigger lazy loading until the page stops growing; returns the item count seen
    async fn scroll_to_load_all(&mut self, browser: &dyn Browser, policy: &ScrollPolicy) -> Result<usize, SiteError> {
        Ok(scroll_fixed(browser, policy).await?)
    }

    /// Image URLs (or detail page URLs) on the current page
    async fn extract_urls_this_page(&mut self, browser: &dyn Browser) -> Result<Vec<String>, SiteError>;

    /// Full-resolution image URLs behind a detail page
    async fn resolve_original_url(&mut self, _browser: &dyn Browser, detail_url: &str) -> Result<Vec<String>, SiteError> {
        Err(SiteError::NotFound(detail_url.to_string()))
    }

    /// Advance to the next result page.
    ///
    /// Implementations must call `walk.mark_last_page` when there is no next
    /// page and `walk.record_page_cursor` after every successful transition.
    async fn go_to_next_page(&mut self, browser: &dyn Browser, walk: &mut WalkState) -> Result<(), SiteError> {
        let current = browser.current_url().await?;
        walk.mark_last_page(&current).await
    }

    /// Download inside the browser session, for sites that bind downloads to it.
    ///
    /// Returns `None` when the browser itself wrote the file.
    async fn fetch_via_ui(
        &mut self,
        _browser: &dyn Browser,
        task: &CrawlTask,
        fetcher: &ImageFetcher,
    ) -> Result<Option<SavedImage>, SiteError> {
        Ok(Some(fetcher.download(task).await?))
    }
}

/// Click the `next` control and record where it led.
///
/// A missing control, or a click that leaves the URL unchanged, ends the walk.
pub async fn click_through_to_next_page(
    browser: &dyn Browser,
    walk: &mut WalkState,
    next: &Locator,
    settle: Duration,
) -> Result<(), SiteError> {
    let before = browser.current_url().await?;

    if !browser.exists(next).await? {
        return walk.mark_last_page(&before).await;
    }

    browser.click(next).await?;
    sleep(settle).await;

    let after = browser.current_url().await?;
    if after == before {
        walk.mark_last_page(&after).await
    } else {
        walk.record_page_cursor(&after).await
    }
}

/// Block until the operator confirms a manual login on stdin
pub async fn wait_for_operator(credentials: &Credentials) -> Result<(), SiteError> {
    info!(
        "Log in as '{}' in the browser window, then press Enter to continue",
        credentials.username
    );
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(())
}
