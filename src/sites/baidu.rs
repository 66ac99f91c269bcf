//! image.baidu.com, in both of its result views.
//!
//! The lazy view is a single infinite-scroll page whose items carry the
//! original image URL. The paged view is the one-image-at-a-time details
//! viewer, where downloads go through the viewer's own download button.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use crate::browser::{scroll_until_stable, Browser, Locator};
use crate::cli::config::ScrollPolicy;
use crate::crawler::fetcher::{ImageFetcher, SavedImage};
use crate::crawler::site::{click_through_to_next_page, Capabilities, SiteAdapter, SiteError, WalkState};
use crate::crawler::task::CrawlTask;

const SEARCH_BOX: &str = "kw";
const SEARCH_BUTTON: &str = "s_btn";
const RESULT_PAGE: &str = "imgpage";
const RESULT_ITEM: &str = "imgitem";
const ORIGINAL_URL_ATTR: &str = "data-objurl";
const FIRST_RESULT: &str = "pn0";
const NEXT_IMAGE: &str = "img-next";
const DOWNLOAD_BUTTON: &str = "span.bar-btn.btn-download";

async fn search(browser: &dyn Browser, keywords: &str) -> Result<(), SiteError> {
    browser.type_text(&Locator::id(SEARCH_BOX), keywords).await?;
    browser.submit(&Locator::class(SEARCH_BUTTON)).await?;
    Ok(())
}

/// Infinite-scroll result list
#[derive(Debug, Default)]
pub struct BaiduLazy;

#[async_trait]
impl SiteAdapter for BaiduLazy {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            keywords: true,
            ..Capabilities::default()
        }
    }

    async fn enter_keywords(&mut self, browser: &dyn Browser, keywords: &str) -> Result<(), SiteError> {
        search(browser, keywords).await
    }

    async fn scroll_to_load_all(&mut self, browser: &dyn Browser, policy: &ScrollPolicy) -> Result<usize, SiteError> {
        Ok(scroll_until_stable(browser, &Locator::class(RESULT_PAGE), policy).await?)
    }

    async fn extract_urls_this_page(&mut self, browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
        let urls = browser
            .attributes(&Locator::class(RESULT_ITEM), ORIGINAL_URL_ATTR)
            .await?;
        if urls.is_empty() {
            return Err(SiteError::NoResults);
        }
        Ok(urls)
    }
}

/// Details viewer, one image per page
#[derive(Debug)]
pub struct BaiduPaged {
    /// Time given to the browser to finish a download
    download_wait: Duration,
    /// Time given to the viewer to load the next image
    settle: Duration,
}

impl Default for BaiduPaged {
    fn default() -> Self {
        Self {
            download_wait: Duration::from_secs(2),
            settle: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl SiteAdapter for BaiduPaged {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            keywords: true,
            mode_switch: true,
            ..Capabilities::default()
        }
    }

    async fn enter_keywords(&mut self, browser: &dyn Browser, keywords: &str) -> Result<(), SiteError> {
        browser.maximize().await?;
        search(browser, keywords).await
    }

    /// Open the first result in the viewer, which comes up in a new window
    async fn switch_to_paginated_mode(&mut self, browser: &dyn Browser) -> Result<(), SiteError> {
        browser.click(&Locator::name(FIRST_RESULT)).await?;
        browser.switch_to_last_window().await?;
        Ok(())
    }

    /// The viewer has nothing to lazy-load
    async fn scroll_to_load_all(&mut self, _browser: &dyn Browser, _policy: &ScrollPolicy) -> Result<usize, SiteError> {
        Ok(0)
    }

    /// The viewer page itself stands for the image it shows
    async fn extract_urls_this_page(&mut self, browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
        Ok(vec![browser.current_url().await?])
    }

    async fn go_to_next_page(&mut self, browser: &dyn Browser, walk: &mut WalkState) -> Result<(), SiteError> {
        click_through_to_next_page(browser, walk, &Locator::class(NEXT_IMAGE), self.settle).await
    }

    /// Click the viewer's download button; the file lands in the browser's download directory
    async fn fetch_via_ui(
        &mut self,
        browser: &dyn Browser,
        _task: &CrawlTask,
        _fetcher: &ImageFetcher,
    ) -> Result<Option<SavedImage>, SiteError> {
        browser.click(&Locator::css(DOWNLOAD_BUTTON)).await?;
        sleep(self.download_wait).await;
        Ok(None)
    }
}
