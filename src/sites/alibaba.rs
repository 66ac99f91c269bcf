//! www.1688.com offer search.
//!
//! Results are lazily loaded and paginated. Each offer links to a detail
//! page whose description holds the full-size images, which are only served
//! to the session that browsed them.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::browser::{scroll_until_stable, Browser, Locator};
use crate::cli::config::ScrollPolicy;
use crate::crawler::site::{click_through_to_next_page, Capabilities, SiteAdapter, SiteError, WalkState};

const SEARCH_BOX: &str = "alisearch-keywords";
const SEARCH_BUTTON: &str = "alisearch-submit";
const OFFER_ITEM: &str = "li.sm-offer-item.sw-dpl-offer-item";
const OFFER_LINK: &str = "//li[contains(@class,'sm-offer-item') and contains(@class,'sw-dpl-offer-item')]/div/div/a";
const NEXT_PAGE: &str = "fui-next";
const DETAIL_IMAGES: &str = "#mod-detail-description img";

/// Close buttons of the two popups the site shows
const POPUP_CLOSERS: [&str; 2] = [
    ".home-identity-dialog .identity-close",
    ".s-overlay-box .s-overlay-close",
];

#[derive(Debug)]
pub struct Alibaba1688 {
    settle: Duration,
    detail_scroll: ScrollPolicy,
}

impl Default for Alibaba1688 {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            detail_scroll: ScrollPolicy {
                step_px: 3000,
                settle_delay_ms: 3000,
                max_attempts: 20,
                stable_rounds: 1,
            },
        }
    }
}

impl Alibaba1688 {
    async fn detail_images(&self, browser: &dyn Browser, detail_url: &str) -> Result<Vec<String>, SiteError> {
        browser.navigate(detail_url).await?;
        // The description lazy-loads as well
        scroll_until_stable(browser, &Locator::css(DETAIL_IMAGES), &self.detail_scroll).await?;
        Ok(browser.attributes(&Locator::css(DETAIL_IMAGES), "src").await?)
    }
}

#[async_trait]
impl SiteAdapter for Alibaba1688 {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            keywords: true,
            popup: true,
            mode_switch: true,
            resolve_original: true,
        }
    }

    async fn enter_keywords(&mut self, browser: &dyn Browser, keywords: &str) -> Result<(), SiteError> {
        browser.maximize().await?;
        browser.type_text(&Locator::id(SEARCH_BOX), keywords).await?;
        browser.submit(&Locator::id(SEARCH_BUTTON)).await?;
        Ok(())
    }

    async fn dismiss_popup(&mut self, browser: &dyn Browser) -> Result<(), SiteError> {
        for closer in POPUP_CLOSERS {
            let locator = Locator::css(closer);
            if browser.exists(&locator).await? {
                if browser.is_displayed(&locator).await? {
                    browser.click(&locator).await?;
                }
                return Ok(());
            }
        }
        debug!("No popup to dismiss");
        Ok(())
    }

    /// Search results are already paginated
    async fn switch_to_paginated_mode(&mut self, _browser: &dyn Browser) -> Result<(), SiteError> {
        Ok(())
    }

    async fn scroll_to_load_all(&mut self, browser: &dyn Browser, policy: &ScrollPolicy) -> Result<usize, SiteError> {
        let policy = ScrollPolicy {
            step_px: 1000,
            ..policy.clone()
        };
        Ok(scroll_until_stable(browser, &Locator::css(OFFER_ITEM), &policy).await?)
    }

    async fn extract_urls_this_page(&mut self, browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
        let urls = browser.attributes(&Locator::xpath(OFFER_LINK), "href").await?;
        if urls.is_empty() {
            return Err(SiteError::NoResults);
        }
        Ok(urls)
    }

    /// Read the description images in a scratch window, keeping the result list intact
    async fn resolve_original_url(&mut self, browser: &dyn Browser, detail_url: &str) -> Result<Vec<String>, SiteError> {
        browser.open_window().await?;
        let images = self.detail_images(browser, detail_url).await;
        if let Err(e) = browser.close_window().await {
            warn!("Failed to close detail window: {}", e);
        }

        let images = images?;
        if images.is_empty() {
            return Err(SiteError::NotFound(detail_url.to_string()));
        }
        Ok(images)
    }

    async fn go_to_next_page(&mut self, browser: &dyn Browser, walk: &mut WalkState) -> Result<(), SiteError> {
        click_through_to_next_page(browser, walk, &Locator::class(NEXT_PAGE), self.settle).await
    }
}
