use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::browser::WebDriverLauncher;
use crate::cli::config::{CrawlerConfig, SiteKind};
use crate::crawler::controller::{CrawlSummary, CrawlerController};
use crate::crawler::walker::WalkOutcome;

/// Command line overrides for a crawl
#[derive(Debug, Default)]
pub struct CrawlOptions {
    pub config: Option<PathBuf>,
    pub image_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub headless: Option<bool>,
    pub sites: Vec<String>,
    pub webdriver: Option<String>,
}

/// Apply command line overrides on top of a loaded configuration
fn apply_overrides(config: &mut CrawlerConfig, opts: &CrawlOptions) -> Result<()> {
    if let Some(dir) = &opts.image_dir {
        config.crawler.image_dir = dir.clone();
    }
    if let Some(workers) = opts.workers {
        config.crawler.worker_count = workers;
    }
    if let Some(headless) = opts.headless {
        config.browser.headless = headless;
    }
    if let Some(url) = &opts.webdriver {
        config.browser.webdriver_url = url.clone();
    }

    config.retain_sites(&opts.sites);
    if !opts.sites.is_empty() && config.sites.is_empty() {
        bail!("None of the requested sites are configured: {}", opts.sites.join(", "));
    }

    Ok(())
}

/// The browser needs an absolute download directory
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    Ok(cwd.join(path))
}

/// Crawl the configured sites
pub async fn crawl(opts: CrawlOptions) -> Result<()> {
    let mut config = CrawlerConfig::load(opts.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&mut config, &opts)?;

    let download_dir = absolute(&config.crawler.image_dir)?;
    let launcher = Arc::new(WebDriverLauncher::new(config.browser.clone(), download_dir));

    let controller = CrawlerController::new(config, launcher).await?;
    let queue = controller.queue().clone();
    let summary = controller.run().await;

    print_summary(&summary);
    println!(
        "Ledger: {} of {} known URLs downloaded",
        queue.completed_count().await,
        queue.pending_count().await
    );
    Ok(())
}

fn print_summary(summary: &CrawlSummary) {
    println!("Crawl finished");
    for walk in &summary.walks {
        let outcome = match &walk.outcome {
            WalkOutcome::AlreadyFinished => "already finished".to_string(),
            WalkOutcome::Finished => "finished".to_string(),
            WalkOutcome::Stopped(reason) => format!("stopped: {}", reason),
        };
        println!(
            "  {:<12} {} ({} pages, {} new URLs)",
            walk.site, outcome, walk.pages, walk.dispatched
        );
    }

    let metrics = &summary.metrics;
    println!(
        "Downloads: {} succeeded, {} failed, {} bytes",
        metrics.successful_downloads, metrics.failed_downloads, metrics.bytes_downloaded
    );
    if let Some(avg) = metrics.average_download_ms() {
        println!("Average download time: {} ms ({:.2} images/s)", avg, metrics.download_rate());
    }

    if summary.walks.iter().any(|w| matches!(w.outcome, WalkOutcome::Stopped(_))) {
        warn!("Some sites stopped early; run the crawl again to resume them");
    }
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    println!("# {}", CrawlerConfig::default_path().display());
    println!("{}", yaml);
    Ok(())
}

/// Write the default configuration, replacing any existing one
pub fn init_config() -> Result<()> {
    let path = CrawlerConfig::default_path();
    if path.exists() {
        warn!("Overwriting existing configuration at {}", path.display());
    }
    CrawlerConfig::default().save_as_default()?;
    info!("Default configuration written");
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

pub fn show_config_path() -> Result<()> {
    println!("{}", CrawlerConfig::default_path().display());
    Ok(())
}

/// List the built-in site adapters
pub fn list_sites() -> Result<()> {
    println!("Built-in sites:");
    for kind in SiteKind::ALL {
        let site = kind.preset();
        println!(
            "  {:<12} {:<20} {:<34} {}",
            kind.as_str(),
            site.load_mode.as_str(),
            site.url,
            if site.download_backend { "background downloads" } else { "in-session downloads" }
        );
    }
    Ok(())
}
