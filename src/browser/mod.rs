pub mod behavior;
pub mod session;

use async_trait::async_trait;
use thiserror::Error;

use crate::cli::config::SiteConfig;
use crate::crawler::task::Cookie;

// Re-export common types
pub use behavior::{scroll_fixed, scroll_until_stable};
pub use session::WebDriverLauncher;

/// Ways of locating elements on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    ClassName(String),
    Css(String),
    XPath(String),
    Name(String),
}

impl Locator {
    pub fn id(s: &str) -> Self {
        Locator::Id(s.to_string())
    }

    pub fn class(s: &str) -> Self {
        Locator::ClassName(s.to_string())
    }

    pub fn css(s: &str) -> Self {
        Locator::Css(s.to_string())
    }

    pub fn xpath(s: &str) -> Self {
        Locator::XPath(s.to_string())
    }

    pub fn name(s: &str) -> Self {
        Locator::Name(s.to_string())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(s) => write!(f, "#{}", s),
            Locator::ClassName(s) => write!(f, ".{}", s),
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
            Locator::Name(s) => write!(f, "name={}", s),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("browser session not initialized")]
    NotInitialized,

    #[error("webdriver error: {0}")]
    Driver(#[from] thirtyfour::error::WebDriverError),
}

/// The browser operations the crawler relies on.
///
/// Each page-walk worker owns one implementation exclusively; nothing else
/// touches its windows or cookies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Number of elements matching the locator (zero when none)
    async fn count(&self, locator: &Locator) -> Result<usize, BrowserError>;

    /// The given attribute of every matching element, skipping elements without it
    async fn attributes(&self, locator: &Locator, attr: &str) -> Result<Vec<String>, BrowserError>;

    /// Click the `index`-th matching element
    async fn click_nth(&self, locator: &Locator, index: usize) -> Result<(), BrowserError>;

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError>;

    /// Submit the form that owns the first matching element
    async fn submit(&self, locator: &Locator) -> Result<(), BrowserError>;

    async fn is_displayed(&self, locator: &Locator) -> Result<bool, BrowserError>;

    async fn scroll_by(&self, pixels: i64) -> Result<(), BrowserError>;

    /// Open a blank window and make it current
    async fn open_window(&self) -> Result<(), BrowserError>;

    /// Make the most recently opened window current
    async fn switch_to_last_window(&self) -> Result<(), BrowserError>;

    /// Close the current window and return to the first one
    async fn close_window(&self) -> Result<(), BrowserError>;

    async fn maximize(&self) -> Result<(), BrowserError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError>;

    /// Release the session; further calls fail with `NotInitialized`
    async fn close(&mut self) -> Result<(), BrowserError>;
}

impl dyn Browser + '_ {
    pub async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.click_nth(locator, 0).await
    }

    pub async fn exists(&self, locator: &Locator) -> Result<bool, BrowserError> {
        Ok(self.count(locator).await? > 0)
    }
}

/// Starts a dedicated browser session for one site
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, site: &SiteConfig) -> Result<Box<dyn Browser>, BrowserError>;
}
