use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::fs;
use thiserror::Error;
use tracing::{info, debug, error};
use url::Url;

use crate::crawler::site::Capabilities;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlerConfig {
    pub crawler: CrawlerSettings,
    pub browser: BrowserSettings,
    pub fetch: FetchSettings,
    pub sites: Vec<SiteConfig>,
}

/// Crawl-wide settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlerSettings {
    /// Directory the downloaded images are written to
    pub image_dir: PathBuf,

    /// Directory holding the URL ledgers and page cursor files
    pub state_dir: PathBuf,

    /// Number of background image fetchers
    pub worker_count: usize,

    /// How long a fetcher waits on an empty queue before re-checking for shutdown
    pub poll_interval_ms: u64,

    pub scroll: ScrollPolicy,

    /// Search keywords per site language
    pub keywords: HashMap<Language, String>,
}

/// Bounded policy for triggering lazy loading by scrolling.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScrollPolicy {
    /// Pixels scrolled per attempt
    pub step_px: i64,
    /// Wait after each scroll for new items to render
    pub settle_delay_ms: u64,
    /// Hard upper bound on scroll attempts
    pub max_attempts: u32,
    /// Consecutive attempts without growth that count as "fully loaded"
    pub stable_rounds: u32,
}

/// Browser session settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub window: WindowSize,
    pub page_load_timeout_secs: u64,
    pub behavior: BrowserBehavior,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// Human-like pacing applied to clicks and typing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserBehavior {
    pub click_delay: (u64, u64),  // Min and max delay in milliseconds
    pub typing_speed: (u64, u64), // Min and max milliseconds per character
}

/// Image download settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub accept: String,
}

/// Languages a search site can be queried in
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Chinese,
    English,
}

/// How a site presents its result set
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoadMode {
    /// One infinite-scroll page
    Lazy,
    /// Discrete result pages
    Paginated,
    /// A lazily loaded result view that is left for a paginated one
    LazyThenPaginated,
}

impl LoadMode {
    pub fn is_lazy(self) -> bool {
        matches!(self, LoadMode::Lazy | LoadMode::LazyThenPaginated)
    }

    pub fn is_paginated(self) -> bool {
        matches!(self, LoadMode::Paginated | LoadMode::LazyThenPaginated)
    }

    pub fn requires_mode_switch(self) -> bool {
        self == LoadMode::LazyThenPaginated
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadMode::Lazy => "lazy",
            LoadMode::Paginated => "paginated",
            LoadMode::LazyThenPaginated => "lazy-then-paginated",
        }
    }
}

/// Built-in site adapters
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SiteKind {
    BaiduLazy,
    BaiduPaged,
    Dogpile,
    Chinaso,
    Alibaba1688,
}

impl SiteKind {
    pub const ALL: [SiteKind; 5] = [
        SiteKind::BaiduLazy,
        SiteKind::BaiduPaged,
        SiteKind::Dogpile,
        SiteKind::Chinaso,
        SiteKind::Alibaba1688,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SiteKind::BaiduLazy => "baidu-lazy",
            SiteKind::BaiduPaged => "baidu-paged",
            SiteKind::Dogpile => "dogpile",
            SiteKind::Chinaso => "chinaso",
            SiteKind::Alibaba1688 => "alibaba1688",
        }
    }

    /// The stock configuration for this site
    pub fn preset(self) -> SiteConfig {
        let (name, url, load_mode, original_on_main_page, popup, download_backend, language) = match self {
            SiteKind::BaiduLazy => ("baidu", "https://image.baidu.com/", LoadMode::Lazy, true, false, true, Language::Chinese),
            SiteKind::BaiduPaged => ("baidu", "https://image.baidu.com/", LoadMode::LazyThenPaginated, true, false, false, Language::Chinese),
            SiteKind::Dogpile => ("DogPile", "http://www.dogpile.com/?qc=images", LoadMode::Paginated, true, false, true, Language::English),
            SiteKind::Chinaso => ("Chinaso", "http://image.chinaso.com/", LoadMode::LazyThenPaginated, true, false, true, Language::Chinese),
            SiteKind::Alibaba1688 => ("1688", "https://www.1688.com/", LoadMode::LazyThenPaginated, false, true, false, Language::Chinese),
        };

        SiteConfig {
            name: name.to_string(),
            kind: self,
            url: url.to_string(),
            load_mode,
            original_on_main_page,
            popup,
            download_backend,
            language: Some(language),
            keywords: String::new(),
            credentials: None,
        }
    }
}

/// Static description of one crawled site
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SiteConfig {
    pub name: String,
    pub kind: SiteKind,
    pub url: String,
    pub load_mode: LoadMode,

    /// Result pages link straight to full-resolution images
    #[serde(default)]
    pub original_on_main_page: bool,

    /// A popup has to be dismissed after page loads
    #[serde(default)]
    pub popup: bool,

    /// Images can be fetched outside the browser session
    #[serde(default = "default_true")]
    pub download_backend: bool,

    #[serde(default)]
    pub language: Option<Language>,

    #[serde(default)]
    pub keywords: String,

    #[serde(default)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no sites configured")]
    NoSites,

    #[error("site name '{0}' is configured more than once")]
    DuplicateSite(String),

    #[error("site '{site}' has an invalid entry URL '{url}'")]
    InvalidUrl { site: String, url: String },

    #[error("worker_count must be at least 1 when a site downloads in the background")]
    NoWorkers,

    #[error("site '{0}' has malformed credentials")]
    MalformedCredentials(String),

    #[error("scroll policy needs at least one attempt and one stability round")]
    InvalidScrollPolicy,

    #[error("site '{site}' requires '{capability}' but its adapter does not provide it")]
    MissingCapability { site: String, capability: &'static str },
}

impl SiteConfig {
    /// Check that the adapter behind this site can perform every step the configuration asks for
    pub fn check_capabilities(&self, caps: Capabilities) -> Result<(), ConfigError> {
        let missing = |capability| ConfigError::MissingCapability {
            site: self.name.clone(),
            capability,
        };

        if !self.keywords.is_empty() && !caps.keywords {
            return Err(missing("enter_keywords"));
        }
        if self.popup && !caps.popup {
            return Err(missing("dismiss_popup"));
        }
        if self.load_mode.requires_mode_switch() && !caps.mode_switch {
            return Err(missing("switch_to_paginated_mode"));
        }
        if !self.original_on_main_page && !caps.resolve_original {
            return Err(missing("resolve_original_url"));
        }
        Ok(())
    }

    /// Credentialed sites need a visible browser for the manual login step
    pub fn headless(&self, default: bool) -> bool {
        default && self.credentials.is_none()
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        let mut keywords = HashMap::new();
        keywords.insert(Language::Chinese, "风景".to_string());
        keywords.insert(Language::English, "landscape".to_string());

        Self {
            crawler: CrawlerSettings {
                image_dir: PathBuf::from("./images"),
                state_dir: PathBuf::from("."),
                worker_count: 5,
                poll_interval_ms: 2000,
                scroll: ScrollPolicy {
                    step_px: 1500,
                    settle_delay_ms: 2000,
                    max_attempts: 30,
                    stable_rounds: 2,
                },
                keywords,
            },
            browser: BrowserSettings {
                webdriver_url: "http://localhost:4444".to_string(),
                headless: true,
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/71.0.3578.98 Safari/537.36".to_string(),
                accept_language: "zh-CN,zh;q=0.9".to_string(),
                window: WindowSize {
                    width: 1920,
                    height: 1080,
                },
                page_load_timeout_secs: 30,
                behavior: BrowserBehavior {
                    click_delay: (100, 300),
                    typing_speed: (50, 150),
                },
            },
            fetch: FetchSettings {
                timeout_secs: 10,
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8".to_string(),
            },
            sites: vec![
                SiteKind::Chinaso.preset(),
                SiteKind::Dogpile.preset(),
                SiteKind::BaiduPaged.preset(),
            ],
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "image-crawler", "image-crawler") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    /// Location of the default configuration file
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("default.yaml")
    }

    /// Load the given file, or the default configuration when none is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            if let Err(e) = config.save_as_default() {
                error!("Failed to save default configuration: {}", e);
            }
            Ok(config)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        self.save_to_file(&Self::default_path())
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Fill empty site keywords from the per-language keyword table
    pub fn resolve_keywords(&mut self) {
        for site in &mut self.sites {
            if !site.keywords.is_empty() {
                continue;
            }
            if let Some(keywords) = site.language.and_then(|lang| self.crawler.keywords.get(&lang)) {
                site.keywords = keywords.clone();
            }
        }
    }

    /// Keep only the named sites
    pub fn retain_sites(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        self.sites.retain(|site| names.iter().any(|n| n.eq_ignore_ascii_case(&site.name)));
    }

    /// Reject configurations the crawl must not start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        let mut names = HashSet::new();
        for site in &self.sites {
            if !names.insert(site.name.as_str()) {
                return Err(ConfigError::DuplicateSite(site.name.clone()));
            }

            if Url::parse(&site.url).is_err() {
                return Err(ConfigError::InvalidUrl {
                    site: site.name.clone(),
                    url: site.url.clone(),
                });
            }

            if let Some(creds) = &site.credentials {
                if creds.username.trim().is_empty() || creds.password.is_empty() {
                    return Err(ConfigError::MalformedCredentials(site.name.clone()));
                }
            }
        }

        if self.crawler.worker_count == 0 && self.sites.iter().any(|s| s.download_backend) {
            return Err(ConfigError::NoWorkers);
        }

        let scroll = &self.crawler.scroll;
        if scroll.max_attempts == 0 || scroll.stable_rounds == 0 {
            return Err(ConfigError::InvalidScrollPolicy);
        }

        Ok(())
    }
}
