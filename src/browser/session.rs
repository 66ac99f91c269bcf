use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, error};

use crate::browser::behavior::BehaviorSimulator;
use crate::browser::{Browser, BrowserError, BrowserLauncher, Locator};
use crate::cli::config::{BrowserSettings, SiteConfig};
use crate::crawler::task::Cookie;

/// Copy a session cookie into the form carried by crawl tasks
fn task_cookie(cookie: &thirtyfour::Cookie) -> Cookie {
    Cookie {
        name: cookie.name().to_string(),
        value: cookie.value().to_string(),
        domain: cookie.domain().map(str::to_string),
        path: cookie.path().map(str::to_string),
        secure: cookie.secure(),
        http_only: cookie.http_only(),
        expiry: cookie.expires_datetime().map(|at| at.unix_timestamp()),
    }
}

/// WebDriver-backed browser session
pub struct BrowserSession {
    /// Browser settings
    config: BrowserSettings,

    /// Pacing for clicks and typing
    behavior_simulator: BehaviorSimulator,

    /// WebDriver instance
    driver: Option<WebDriver>,
}

impl BrowserSession {
    /// Connect to the WebDriver server and open a new session
    pub async fn start(config: BrowserSettings, headless: bool, download_dir: PathBuf) -> Result<Self, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();

        caps.add_chrome_arg(&format!("--user-agent={}", config.user_agent))?;
        caps.add_chrome_arg(&format!("--lang={}", config.accept_language.split(',').next().unwrap_or("en-US")))?;
        caps.add_chrome_arg(&format!("--window-size={},{}", config.window.width, config.window.height))?;

        if headless {
            caps.set_headless()?;
            caps.add_chrome_arg("--disable-gpu")?;
        }

        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;

        // Downloads started from inside the page land next to the fetched images
        caps.add_chrome_option(
            "prefs",
            serde_json::json!({
                "profile.default_content_settings.popups": 0,
                "download.default_directory": download_dir.to_string_lossy(),
            }),
        )?;
        caps.add_chrome_option("excludeSwitches", serde_json::json!(["enable-automation"]))?;

        let driver = WebDriver::new(&config.webdriver_url, caps).await?;
        driver.set_page_load_timeout(Duration::from_secs(config.page_load_timeout_secs)).await?;

        debug!("Browser session started against {}", config.webdriver_url);

        let behavior_simulator = BehaviorSimulator::new(config.behavior.clone());
        Ok(Self {
            config,
            behavior_simulator,
            driver: Some(driver),
        })
    }

    fn driver(&self) -> Result<&WebDriver, BrowserError> {
        self.driver.as_ref().ok_or(BrowserError::NotInitialized)
    }

    async fn find_nth(&self, locator: &Locator, index: usize) -> Result<WebElement, BrowserError> {
        let elements = self.driver()?.find_all(to_by(locator)).await?;
        elements
            .into_iter()
            .nth(index)
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }
}

fn to_by(locator: &Locator) -> By {
    match locator {
        Locator::Id(s) => By::Id(s),
        Locator::ClassName(s) => By::ClassName(s),
        Locator::Css(s) => By::Css(s),
        Locator::XPath(s) => By::XPath(s),
        Locator::Name(s) => By::Name(s),
    }
}

#[async_trait]
impl Browser for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        self.driver()?.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.driver()?.current_url().await?.to_string())
    }

    async fn count(&self, locator: &Locator) -> Result<usize, BrowserError> {
        Ok(self.driver()?.find_all(to_by(locator)).await?.len())
    }

    async fn attributes(&self, locator: &Locator, attr: &str) -> Result<Vec<String>, BrowserError> {
        let elements = self.driver()?.find_all(to_by(locator)).await?;

        let mut values = Vec::new();
        for element in elements {
            if let Ok(Some(value)) = element.attr(attr).await {
                values.push(value);
            }
        }

        Ok(values)
    }

    async fn click_nth(&self, locator: &Locator, index: usize) -> Result<(), BrowserError> {
        let element = self.find_nth(locator, index).await?;
        self.behavior_simulator.click(&element).await
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError> {
        let element = self.find_nth(locator, 0).await?;
        self.behavior_simulator.type_text(&element, text).await
    }

    async fn submit(&self, locator: &Locator) -> Result<(), BrowserError> {
        let element = self.find_nth(locator, 0).await?;
        self.driver()?
            .execute(
                "const el = arguments[0]; if (el.form) { el.form.submit(); } else { el.click(); }",
                vec![element.to_json()?],
            )
            .await?;
        Ok(())
    }

    async fn is_displayed(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let element = self.find_nth(locator, 0).await?;
        Ok(element.is_displayed().await?)
    }

    async fn scroll_by(&self, pixels: i64) -> Result<(), BrowserError> {
        self.driver()?
            .execute(&format!("window.scrollBy(0, {});", pixels), Vec::new())
            .await?;
        Ok(())
    }

    async fn open_window(&self) -> Result<(), BrowserError> {
        let driver = self.driver()?;
        let handle = driver.new_window().await?;
        driver.switch_to_window(handle).await?;
        Ok(())
    }

    async fn switch_to_last_window(&self) -> Result<(), BrowserError> {
        let driver = self.driver()?;
        let handle = driver
            .windows()
            .await?
            .pop()
            .ok_or_else(|| BrowserError::ElementNotFound("window".to_string()))?;
        driver.switch_to_window(handle).await?;
        Ok(())
    }

    async fn close_window(&self) -> Result<(), BrowserError> {
        let driver = self.driver()?;
        driver.close_window().await?;
        if let Some(first) = driver.windows().await?.into_iter().next() {
            driver.switch_to_window(first).await?;
        }
        Ok(())
    }

    async fn maximize(&self) -> Result<(), BrowserError> {
        self.driver()?.maximize_window().await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        let cookies = self.driver()?.get_all_cookies().await?;

        Ok(cookies.iter().map(task_cookie).collect())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                error!("Error closing browser session: {}", e);
            }
            debug!("Browser session closed ({})", self.config.webdriver_url);
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Spawn a task to quit the driver
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}

/// Launches one WebDriver session per site
pub struct WebDriverLauncher {
    settings: BrowserSettings,
    download_dir: PathBuf,
}

impl WebDriverLauncher {
    pub fn new(settings: BrowserSettings, download_dir: PathBuf) -> Self {
        Self { settings, download_dir }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, site: &SiteConfig) -> Result<Box<dyn Browser>, BrowserError> {
        let headless = site.headless(self.settings.headless);
        let session = BrowserSession::start(self.settings.clone(), headless, self.download_dir.clone()).await?;
        Ok(Box::new(session))
    }
}
