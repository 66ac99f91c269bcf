use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::browser::BrowserLauncher;
use crate::cli::config::CrawlerConfig;
use crate::crawler::fetcher::ImageFetcher;
use crate::crawler::pool::{FetcherPool, PoolStats};
use crate::crawler::site::SiteAdapter;
use crate::crawler::walker::{PageWalker, WalkContext, WalkReport};
use crate::sites;
use crate::storage::cursor::PageCursor;
use crate::storage::images::ImageStore;
use crate::storage::queue::QueueManager;
use crate::utils::metrics::{Metrics, MetricsCollector};

/// What a finished crawl did
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub walks: Vec<WalkReport>,
    pub pool: PoolStats,
    pub metrics: Metrics,
}

/// Owns the crawl: one page-walk worker per site plus the fetcher pool
pub struct CrawlerController {
    config: CrawlerConfig,
    adapters: Vec<Box<dyn SiteAdapter>>,
    launcher: Arc<dyn BrowserLauncher>,
    queue: Arc<QueueManager>,
    fetcher: Arc<ImageFetcher>,
    metrics: MetricsCollector,
}

impl CrawlerController {
    /// Create a controller using the built-in adapter for every configured site
    pub async fn new(config: CrawlerConfig, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
        let adapters = config.sites.iter().map(|site| sites::adapter_for(site.kind)).collect();
        Self::with_adapters(config, launcher, adapters).await
    }

    /// Create a controller with one adapter per configured site, in order.
    ///
    /// Fails when the configuration is invalid, an adapter lacks a step its
    /// site needs, or the ledger on disk is inconsistent.
    pub async fn with_adapters(
        mut config: CrawlerConfig,
        launcher: Arc<dyn BrowserLauncher>,
        adapters: Vec<Box<dyn SiteAdapter>>,
    ) -> Result<Self> {
        config.resolve_keywords();
        config.validate().context("Invalid crawler configuration")?;

        if adapters.len() != config.sites.len() {
            bail!(
                "{} sites configured but {} adapters supplied",
                config.sites.len(),
                adapters.len()
            );
        }
        for (site, adapter) in config.sites.iter().zip(&adapters) {
            site.check_capabilities(adapter.capabilities())
                .context("Invalid site configuration")?;
        }

        let queue = QueueManager::open(&config.crawler.state_dir)
            .await
            .context("Failed to open the download ledger")?;

        let store = ImageStore::new(&config.crawler.image_dir).context(format!(
            "Failed to create image directory: {}",
            config.crawler.image_dir.display()
        ))?;
        info!("Saving images to {}", store.dir().display());
        let fetcher = ImageFetcher::new(&config.fetch, &config.browser, store)
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            adapters,
            launcher,
            queue: Arc::new(queue),
            fetcher: Arc::new(fetcher),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    /// Run every site to completion, then drain and stop the fetcher pool
    pub async fn run(self) -> CrawlSummary {
        let background = self.config.sites.iter().any(|site| site.download_backend);
        let pool = if background {
            Some(FetcherPool::spawn(
                self.config.crawler.worker_count,
                self.queue.clone(),
                self.fetcher.clone(),
                self.metrics.clone(),
                Duration::from_millis(self.config.crawler.poll_interval_ms),
            ))
        } else {
            info!("No site downloads in the background, not starting image fetchers");
            None
        };

        let ctx = WalkContext {
            launcher: self.launcher.clone(),
            queue: self.queue.clone(),
            fetcher: self.fetcher.clone(),
            metrics: self.metrics.clone(),
            scroll: self.config.crawler.scroll.clone(),
        };

        let state_dir = self.config.crawler.state_dir.clone();
        let handles: Vec<_> = self
            .config
            .sites
            .into_iter()
            .zip(self.adapters)
            .map(|(site, adapter)| {
                let cursor = PageCursor::for_site(&state_dir, &site.name);
                let walker = PageWalker::new(site, adapter, ctx.clone(), Some(cursor));
                tokio::spawn(walker.run())
            })
            .collect();

        info!("Started {} page walkers", handles.len());

        let mut walks = Vec::with_capacity(handles.len());
        for result in join_all(handles).await {
            match result {
                Ok(report) => walks.push(report),
                Err(e) => error!("Page walker panicked: {}", e),
            }
        }

        let pool = match pool {
            Some(pool) => pool.shutdown().await,
            None => PoolStats::default(),
        };

        CrawlSummary {
            walks,
            pool,
            metrics: self.metrics.get_metrics().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::{LoadMode, SiteConfig, SiteKind};
    use crate::crawler::site::{Capabilities, SiteError};
    use crate::crawler::testing::{FakeLauncher, ScriptedAdapter};
    use crate::crawler::walker::WalkOutcome;
    use crate::browser::Browser;
    use crate::storage::queue::COMPLETED_LOG;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    fn config(dir: &Path, sites: Vec<SiteConfig>) -> CrawlerConfig {
        let mut config = CrawlerConfig::default();
        config.crawler.image_dir = dir.join("images");
        config.crawler.state_dir = dir.join("state");
        config.crawler.worker_count = 2;
        config.crawler.poll_interval_ms = 20;
        config.sites = sites;
        config
    }

    fn site(name: &str) -> SiteConfig {
        SiteConfig {
            name: name.to_string(),
            kind: SiteKind::Dogpile,
            url: "https://site/".to_string(),
            load_mode: LoadMode::Paginated,
            original_on_main_page: true,
            popup: false,
            download_backend: true,
            language: None,
            keywords: String::new(),
            credentials: None,
        }
    }

    /// Adapter that can only extract URLs
    struct BareAdapter;

    #[async_trait]
    impl SiteAdapter for BareAdapter {
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        async fn extract_urls_this_page(&mut self, _browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
            Err(SiteError::NoResults)
        }
    }

    #[tokio::test]
    async fn downloads_what_it_can_and_records_the_rest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/y.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let x = format!("{}/x.png", server.uri());
        let y = format!("{}/y.png", server.uri());

        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let adapter = ScriptedAdapter::new(vec![vec![x.as_str(), y.as_str()]]);

        let controller = CrawlerController::with_adapters(
            config(dir.path(), vec![site("fake")]),
            Arc::new(launcher.clone()),
            vec![Box::new(adapter)],
        )
        .await
        .unwrap();
        let queue = controller.queue().clone();

        let summary = controller.run().await;

        assert_eq!(summary.walks.len(), 1);
        assert_eq!(summary.walks[0].outcome, WalkOutcome::Finished);
        assert_eq!(summary.pool, PoolStats { downloaded: 1, failed: 1 });
        assert_eq!(queue.completed_urls().await, HashSet::from([x.clone()]));
        assert_eq!(queue.pending_urls().await, HashSet::from([x.clone(), y.clone()]));
        assert_eq!(std::fs::read_dir(dir.path().join("images")).unwrap().count(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("state").join(COMPLETED_LOG)).unwrap(),
            format!("{}\n", x)
        );
        assert_eq!(launcher.closed(), 1);

        let cursor = PageCursor::for_site(&dir.path().join("state"), "fake");
        assert!(cursor.load().await.unwrap().unwrap().finished);
    }

    #[tokio::test]
    async fn failing_site_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();

        let controller = CrawlerController::with_adapters(
            config(dir.path(), vec![site("broken"), site("working")]),
            Arc::new(launcher),
            vec![
                Box::new(ScriptedAdapter::new(vec![vec![]])),
                Box::new(ScriptedAdapter::new(vec![vec!["http://127.0.0.1:9/a.jpg"]])),
            ],
        )
        .await
        .unwrap();
        let queue = controller.queue().clone();

        let summary = controller.run().await;

        let outcome = |name: &str| {
            summary
                .walks
                .iter()
                .find(|w| w.site == name)
                .map(|w| w.outcome.clone())
                .unwrap()
        };
        assert!(matches!(outcome("broken"), WalkOutcome::Stopped(_)));
        assert_eq!(outcome("working"), WalkOutcome::Finished);
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn rejects_adapter_missing_a_required_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut popup_site = site("popup");
        popup_site.popup = true;

        let result = CrawlerController::with_adapters(
            config(dir.path(), vec![popup_site]),
            Arc::new(FakeLauncher::new()),
            vec![Box::new(BareAdapter)],
        )
        .await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("Invalid site configuration"));
    }

    #[tokio::test]
    async fn rejects_orphaned_completed_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("state")).unwrap();
        std::fs::write(dir.path().join("state").join(COMPLETED_LOG), "a\n").unwrap();

        let result = CrawlerController::with_adapters(
            config(dir.path(), vec![site("fake")]),
            Arc::new(FakeLauncher::new()),
            vec![Box::new(ScriptedAdapter::new(vec![]))],
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_invalid_configuration() {
        let dir = tempfile::tempdir().unwrap();

        let result = CrawlerController::with_adapters(
            config(dir.path(), Vec::new()),
            Arc::new(FakeLauncher::new()),
            Vec::new(),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builds_adapters_for_built_in_sites() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), Vec::new());
        config.sites = SiteKind::ALL.iter().map(|kind| {
            let mut site = kind.preset();
            site.name = format!("{:?}", kind);
            site
        }).collect();

        tokio_test::assert_ok!(CrawlerController::new(config, Arc::new(FakeLauncher::new())).await);
    }
}
