use async_trait::async_trait;
use std::time::Duration;

use crate::browser::{Browser, Locator};
use crate::cli::config::ScrollPolicy;
use crate::crawler::site::{click_through_to_next_page, Capabilities, SiteAdapter, SiteError, WalkState};

const SEARCH_BOX: &str = "q";
const SEARCH_BUTTON: &str = "search_btn2";
const RESULT_LINK: &str = "rg_l";
const ORIGINAL_LINK: &str = "yuanshi";
const NEXT_IMAGE: &str = "#ad-image-wrapper-outer a.dt_next.dt_toggle";

/// image.chinaso.com, crawled through its one-image-per-page viewer
#[derive(Debug)]
pub struct Chinaso {
    settle: Duration,
}

impl Default for Chinaso {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl SiteAdapter for Chinaso {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            keywords: true,
            mode_switch: true,
            ..Capabilities::default()
        }
    }

    async fn enter_keywords(&mut self, browser: &dyn Browser, keywords: &str) -> Result<(), SiteError> {
        browser.maximize().await?;
        browser.type_text(&Locator::id(SEARCH_BOX), keywords).await?;
        browser.click(&Locator::class(SEARCH_BUTTON)).await?;
        Ok(())
    }

    /// The first `rg_l` link is not an image; the second opens the viewer in a new window
    async fn switch_to_paginated_mode(&mut self, browser: &dyn Browser) -> Result<(), SiteError> {
        let links = Locator::class(RESULT_LINK);
        if browser.count(&links).await? <= 1 {
            return Err(SiteError::NoResults);
        }
        browser.click_nth(&links, 1).await?;
        browser.switch_to_last_window().await?;
        Ok(())
    }

    async fn scroll_to_load_all(&mut self, _browser: &dyn Browser, _policy: &ScrollPolicy) -> Result<usize, SiteError> {
        Ok(0)
    }

    async fn extract_urls_this_page(&mut self, browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
        let urls = browser.attributes(&Locator::id(ORIGINAL_LINK), "href").await?;
        match urls.into_iter().next() {
            Some(url) => Ok(vec![url]),
            None => Err(SiteError::NoResults),
        }
    }

    async fn go_to_next_page(&mut self, browser: &dyn Browser, walk: &mut WalkState) -> Result<(), SiteError> {
        click_through_to_next_page(browser, walk, &Locator::css(NEXT_IMAGE), self.settle).await
    }
}
