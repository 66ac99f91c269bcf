use async_trait::async_trait;
use std::time::Duration;

use crate::browser::{Browser, Locator};
use crate::crawler::site::{click_through_to_next_page, Capabilities, SiteAdapter, SiteError, WalkState};

const SEARCH_BOX: &str = "topSearchTextBox";
const SEARCH_BUTTON: &str = "topSearchSubmit";
const IMAGE_LINKS: &str = ".image .link";
const NEXT_PAGE: &str = "[class='pagination__num pagination__num--next-prev pagination__num--next']";

/// dogpile.com image search, classic numbered pages
#[derive(Debug)]
pub struct DogPile {
    settle: Duration,
}

impl Default for DogPile {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl SiteAdapter for DogPile {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            keywords: true,
            ..Capabilities::default()
        }
    }

    async fn enter_keywords(&mut self, browser: &dyn Browser, keywords: &str) -> Result<(), SiteError> {
        browser.maximize().await?;
        browser.type_text(&Locator::id(SEARCH_BOX), keywords).await?;
        browser.submit(&Locator::id(SEARCH_BUTTON)).await?;
        Ok(())
    }

    async fn extract_urls_this_page(&mut self, browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
        let urls = browser.attributes(&Locator::css(IMAGE_LINKS), "href").await?;
        if urls.is_empty() {
            return Err(SiteError::NoResults);
        }
        Ok(urls)
    }

    async fn go_to_next_page(&mut self, browser: &dyn Browser, walk: &mut WalkState) -> Result<(), SiteError> {
        click_through_to_next_page(browser, walk, &Locator::css(NEXT_PAGE), self.settle).await
    }
}
