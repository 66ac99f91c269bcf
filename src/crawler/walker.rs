//! Per-site page-walk worker.
//!
//! One walker drives one site adapter through a whole crawl inside its own
//! browser session:
//! `Init -> LoggedIn? -> KeywordEntered? -> ModeSwitched? -> Walking -> Done`.
//! A walker never fails the crawl; whatever goes wrong ends up in its
//! [`WalkReport`].

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::browser::{Browser, BrowserLauncher};
use crate::cli::config::{ScrollPolicy, SiteConfig};
use crate::crawler::fetcher::ImageFetcher;
use crate::crawler::site::{SiteAdapter, SiteError, WalkState};
use crate::crawler::task::{resolve_image_url, CrawlTask};
use crate::storage::cursor::PageCursor;
use crate::storage::queue::QueueManager;
use crate::utils::metrics::MetricsCollector;

/// How a site's walk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    /// A previous run already reached the last page; nothing was done
    AlreadyFinished,
    /// Walked every page
    Finished,
    /// Gave up early
    Stopped(String),
}

#[derive(Debug, Clone)]
pub struct WalkReport {
    pub site: String,
    pub outcome: WalkOutcome,
    pub pages: usize,
    /// URLs handed to the queue or downloaded in-session
    pub dispatched: usize,
}

/// Shared resources every walker uses
#[derive(Clone)]
pub struct WalkContext {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub queue: Arc<QueueManager>,
    pub fetcher: Arc<ImageFetcher>,
    pub metrics: MetricsCollector,
    pub scroll: ScrollPolicy,
}

pub struct PageWalker {
    site: SiteConfig,
    adapter: Box<dyn SiteAdapter>,
    ctx: WalkContext,
    cursor: Option<PageCursor>,
    pages: usize,
    dispatched: usize,
}

impl PageWalker {
    pub fn new(site: SiteConfig, adapter: Box<dyn SiteAdapter>, ctx: WalkContext, cursor: Option<PageCursor>) -> Self {
        // Only paginated walks can be resumed
        let cursor = cursor.filter(|_| site.load_mode.is_paginated());
        Self {
            site,
            adapter,
            ctx,
            cursor,
            pages: 0,
            dispatched: 0,
        }
    }

    /// Walk the site to completion
    pub async fn run(mut self) -> WalkReport {
        info!(site = %self.site.name, "Starting page walk");

        let resume = match self.resume_point().await {
            Ok(Resume::Finished(url)) => {
                info!(site = %self.site.name, "Already crawled to the last page ({}), skipping", url);
                return self.report(WalkOutcome::AlreadyFinished);
            }
            Ok(Resume::From(url)) => Some(url),
            Ok(Resume::Fresh) => None,
            Err(e) => {
                error!(site = %self.site.name, error = %e, "Failed to read page cursor");
                return self.report(WalkOutcome::Stopped(e.to_string()));
            }
        };

        let mut browser = match self.ctx.launcher.launch(&self.site).await {
            Ok(browser) => browser,
            Err(e) => {
                error!(site = %self.site.name, error = %e, "Failed to start browser session");
                return self.report(WalkOutcome::Stopped(e.to_string()));
            }
        };

        let result = self.walk(browser.as_ref(), resume).await;

        if let Err(e) = browser.close().await {
            warn!(site = %self.site.name, error = %e, "Failed to close browser session");
        }

        match result {
            Ok(()) => {
                info!(
                    site = %self.site.name,
                    pages = self.pages,
                    dispatched = self.dispatched,
                    "Page walk finished"
                );
                self.report(WalkOutcome::Finished)
            }
            Err(e) => {
                error!(site = %self.site.name, error = %e, pages = self.pages, "Page walk stopped");
                self.report(WalkOutcome::Stopped(e.to_string()))
            }
        }
    }

    async fn resume_point(&self) -> std::io::Result<Resume> {
        let Some(cursor) = &self.cursor else {
            return Ok(Resume::Fresh);
        };

        Ok(match cursor.load().await? {
            Some(record) if record.finished => Resume::Finished(record.url),
            Some(record) => Resume::From(record.url),
            None => Resume::Fresh,
        })
    }

    async fn walk(&mut self, browser: &dyn Browser, resume: Option<String>) -> Result<(), SiteError> {
        browser.navigate(&self.site.url).await?;
        self.dismiss_popup(browser).await?;

        if let Some(credentials) = &self.site.credentials {
            info!(site = %self.site.name, "Waiting for login");
            self.adapter.login(browser, credentials).await?;
            self.dismiss_popup(browser).await?;
        }

        match resume {
            Some(url) => {
                info!(site = %self.site.name, "Resuming from {}", url);
                browser.navigate(&url).await?;
            }
            None => {
                if !self.site.keywords.is_empty() {
                    debug!(site = %self.site.name, "Searching for '{}'", self.site.keywords);
                    self.adapter.enter_keywords(browser, &self.site.keywords).await?;
                    self.dismiss_popup(browser).await?;
                }
                if self.site.load_mode.requires_mode_switch() {
                    self.adapter.switch_to_paginated_mode(browser).await?;
                    self.dismiss_popup(browser).await?;
                }
            }
        }

        let mut walk = WalkState::new(self.cursor.clone());
        while !walk.is_last_page() {
            if self.site.load_mode.is_lazy() {
                let loaded = self.adapter.scroll_to_load_all(browser, &self.ctx.scroll).await?;
                debug!(site = %self.site.name, "Lazy loading done ({} items)", loaded);
            }

            let base = browser.current_url().await?;
            let urls: Vec<String> = self
                .adapter
                .extract_urls_this_page(browser)
                .await?
                .iter()
                .filter_map(|raw| resolve_image_url(&base, raw))
                .collect();
            if urls.is_empty() {
                return Err(SiteError::NoResults);
            }

            self.pages += 1;
            self.ctx.metrics.record_page(&self.site.name, urls.len()).await;
            debug!(site = %self.site.name, page = self.pages, "Found {} URLs on {}", urls.len(), base);

            for url in urls {
                self.handle_url(browser, url).await;
            }

            if !self.site.load_mode.is_paginated() {
                break;
            }
            self.adapter.go_to_next_page(browser, &mut walk).await?;
        }

        Ok(())
    }

    async fn dismiss_popup(&mut self, browser: &dyn Browser) -> Result<(), SiteError> {
        if self.site.popup {
            self.adapter.dismiss_popup(browser).await?;
        }
        Ok(())
    }

    /// Dispatch one extracted URL, resolving it to originals first if needed
    async fn handle_url(&mut self, browser: &dyn Browser, url: String) {
        let originals = if self.site.original_on_main_page {
            vec![url]
        } else {
            match self.adapter.resolve_original_url(browser, &url).await {
                Ok(found) => found
                    .iter()
                    .filter_map(|raw| resolve_image_url(&url, raw))
                    .collect(),
                Err(e) => {
                    warn!(site = %self.site.name, url = %url, error = %e, "Skipping unresolvable URL");
                    return;
                }
            }
        };

        for original in originals {
            if self.dispatch(browser, original).await {
                self.dispatched += 1;
            }
        }
    }

    /// Hand a URL to the queue, or download it in this session.
    ///
    /// Returns whether new work was done.
    async fn dispatch(&mut self, browser: &dyn Browser, url: String) -> bool {
        if self.site.download_backend {
            return match self.ctx.queue.enqueue(CrawlTask::new(url.clone())).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(site = %self.site.name, url = %url, error = %e, "Failed to enqueue URL");
                    false
                }
            };
        }

        match self.ctx.queue.register(&url).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(site = %self.site.name, "Already downloaded: {}", url);
                return false;
            }
            Err(e) => {
                error!(site = %self.site.name, url = %url, error = %e, "Failed to record URL");
                return false;
            }
        }

        let task = match browser.cookies().await {
            Ok(cookies) if !cookies.is_empty() => CrawlTask::with_cookies(url, cookies),
            Ok(_) => CrawlTask::new(url),
            Err(e) => {
                warn!(site = %self.site.name, error = %e, "Could not read session cookies");
                CrawlTask::new(url)
            }
        };

        let timer = self.ctx.metrics.start_timer();
        match self.adapter.fetch_via_ui(browser, &task, &self.ctx.fetcher).await {
            Ok(saved) => {
                let size = saved.map_or(0, |s| s.size);
                self.ctx
                    .metrics
                    .record_download(Some(&self.site.name), true, timer.end(), size)
                    .await;
                if let Err(e) = self.ctx.queue.mark_completed(&task.url).await {
                    error!(site = %self.site.name, url = %task.url, error = %e, "Failed to record download");
                }
                true
            }
            Err(e) => {
                warn!(site = %self.site.name, url = %task.url, error = %e, "In-session download failed");
                self.ctx
                    .metrics
                    .record_download(Some(&self.site.name), false, timer.end(), 0)
                    .await;
                false
            }
        }
    }

    fn report(&self, outcome: WalkOutcome) -> WalkReport {
        WalkReport {
            site: self.site.name.clone(),
            outcome,
            pages: self.pages,
            dispatched: self.dispatched,
        }
    }
}

enum Resume {
    Fresh,
    From(String),
    Finished(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::{CrawlerConfig, Credentials, LoadMode, SiteKind};
    use crate::crawler::testing::{FakeLauncher, ScriptedAdapter};
    use crate::storage::images::ImageStore;
    use crate::storage::queue::{COMPLETED_LOG, IN_SESSION_LOG, PENDING_LOG};
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    fn site(load_mode: LoadMode) -> SiteConfig {
        SiteConfig {
            name: "site".to_string(),
            kind: SiteKind::Dogpile,
            url: "https://site/".to_string(),
            load_mode,
            original_on_main_page: true,
            popup: false,
            download_backend: true,
            language: None,
            keywords: "cats".to_string(),
            credentials: None,
        }
    }

    async fn context(dir: &Path, launcher: &FakeLauncher) -> WalkContext {
        let config = CrawlerConfig::default();
        let store = ImageStore::new(dir.join("images")).unwrap();
        WalkContext {
            launcher: Arc::new(launcher.clone()),
            queue: Arc::new(QueueManager::open(dir).await.unwrap()),
            fetcher: Arc::new(ImageFetcher::new(&config.fetch, &config.browser, store).unwrap()),
            metrics: MetricsCollector::new(),
            scroll: ScrollPolicy {
                step_px: 1500,
                settle_delay_ms: 0,
                max_attempts: 1,
                stable_rounds: 1,
            },
        }
    }

    fn cursor(dir: &Path) -> PageCursor {
        PageCursor::for_site(dir, "site")
    }

    #[tokio::test]
    async fn finished_cursor_skips_the_site_without_navigation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(cursor(dir.path()).path(), "#https://site/page9\n").unwrap();

        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"]]);
        let calls = adapter.calls();

        let report = PageWalker::new(site(LoadMode::Paginated), Box::new(adapter), ctx, Some(cursor(dir.path())))
            .run()
            .await;

        assert_eq!(report.outcome, WalkOutcome::AlreadyFinished);
        assert_eq!(launcher.launches(), 0);
        assert!(launcher.navigations().is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn walks_every_page_and_marks_the_last() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let queue = ctx.queue.clone();
        let adapter = ScriptedAdapter::new(vec![
            vec!["https://img/a.jpg", "https://img/b.jpg"],
            vec!["https://img/b.jpg", "https://img/c.jpg"],
        ]);
        let calls = adapter.calls();

        let report = PageWalker::new(site(LoadMode::Paginated), Box::new(adapter), ctx, Some(cursor(dir.path())))
            .run()
            .await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(report.pages, 2);
        assert_eq!(report.dispatched, 3);
        assert_eq!(queue.queued_len(), 3);
        assert_eq!(launcher.closed(), 1);
        assert_eq!(calls.lock().unwrap().first(), Some(&"enter_keywords"));

        let record = cursor(dir.path()).load().await.unwrap().unwrap();
        assert!(record.finished);
        assert_eq!(record.url, "https://site/page2");
    }

    #[tokio::test]
    async fn resumes_from_recorded_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(cursor(dir.path()).path(), "https://site/page1\nhttps://site/page3\n").unwrap();

        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/z.jpg"]]);
        let calls = adapter.calls();

        let report = PageWalker::new(
            site(LoadMode::LazyThenPaginated),
            Box::new(adapter),
            ctx,
            Some(cursor(dir.path())),
        )
        .run()
        .await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(launcher.navigations(), vec!["https://site/", "https://site/page3"]);
        let calls = calls.lock().unwrap();
        assert!(!calls.contains(&"enter_keywords"));
        assert!(!calls.contains(&"switch_to_paginated_mode"));
        assert!(calls.contains(&"scroll_to_load_all"));
    }

    #[tokio::test]
    async fn fresh_lazy_then_paginated_walk_runs_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"]]);
        let calls = adapter.calls();

        let report = PageWalker::new(
            site(LoadMode::LazyThenPaginated),
            Box::new(adapter),
            ctx,
            Some(cursor(dir.path())),
        )
        .run()
        .await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(launcher.navigations(), vec!["https://site/"]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "enter_keywords",
                "switch_to_paginated_mode",
                "scroll_to_load_all",
                "extract_urls_this_page",
                "go_to_next_page",
            ]
        );
    }

    #[tokio::test]
    async fn popups_are_dismissed_after_every_setup_step() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"]]);
        let calls = adapter.calls();

        let mut config = site(LoadMode::LazyThenPaginated);
        config.popup = true;

        let report = PageWalker::new(config, Box::new(adapter), ctx, None).run().await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "dismiss_popup",
                "enter_keywords",
                "dismiss_popup",
                "switch_to_paginated_mode",
                "dismiss_popup",
                "scroll_to_load_all",
                "extract_urls_this_page",
                "go_to_next_page",
            ]
        );
    }

    #[tokio::test]
    async fn credentialed_site_logs_in_before_searching() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"]]);
        let calls = adapter.calls();

        let mut config = site(LoadMode::Paginated);
        config.popup = true;
        config.credentials = Some(Credentials {
            username: "user".to_string(),
            password: "secret".to_string(),
        });

        let report = PageWalker::new(config, Box::new(adapter), ctx, None).run().await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "dismiss_popup",
                "login",
                "dismiss_popup",
                "enter_keywords",
                "dismiss_popup",
                "extract_urls_this_page",
                "go_to_next_page",
            ]
        );
    }

    #[tokio::test]
    async fn resumed_credentialed_site_logs_in_then_jumps_to_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(cursor(dir.path()).path(), "https://site/page5\n").unwrap();

        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"]]);
        let calls = adapter.calls();

        let mut config = site(LoadMode::LazyThenPaginated);
        config.credentials = Some(Credentials {
            username: "user".to_string(),
            password: "secret".to_string(),
        });

        let report = PageWalker::new(config, Box::new(adapter), ctx, Some(cursor(dir.path())))
            .run()
            .await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(launcher.navigations(), vec!["https://site/", "https://site/page5"]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["login", "scroll_to_load_all", "extract_urls_this_page", "go_to_next_page"]
        );
    }

    #[tokio::test]
    async fn lazy_site_walks_a_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"], vec!["https://img/b.jpg"]]);
        let calls = adapter.calls();

        let report = PageWalker::new(site(LoadMode::Lazy), Box::new(adapter), ctx, Some(cursor(dir.path())))
            .run()
            .await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(report.pages, 1);
        assert!(!calls.lock().unwrap().contains(&"go_to_next_page"));
        assert!(!cursor(dir.path()).path().exists());
    }

    #[tokio::test]
    async fn empty_page_stops_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec![]]);

        let report = PageWalker::new(site(LoadMode::Paginated), Box::new(adapter), ctx, None)
            .run()
            .await;

        assert!(matches!(report.outcome, WalkOutcome::Stopped(_)));
        assert_eq!(report.pages, 0);
        assert_eq!(launcher.closed(), 1);
    }

    #[tokio::test]
    async fn unresolvable_detail_pages_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let queue = ctx.queue.clone();
        let adapter = ScriptedAdapter::new(vec![vec!["https://site/detail/1", "https://site/detail/2"]])
            .with_originals("https://site/detail/2", vec!["https://img/full-2a.jpg", "/full-2b.jpg"]);

        let mut config = site(LoadMode::Paginated);
        config.original_on_main_page = false;

        let report = PageWalker::new(config, Box::new(adapter), ctx, None).run().await;

        assert_eq!(report.outcome, WalkOutcome::Finished);
        assert_eq!(report.dispatched, 2);
        let pending = queue.pending_urls().await;
        assert!(pending.contains("https://img/full-2a.jpg"));
        assert!(pending.contains("https://site/full-2b.jpg"));
    }

    #[tokio::test]
    async fn in_session_downloads_are_recorded_in_the_ledger() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.png"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new();
        let ctx = context(dir.path(), &launcher).await;
        let queue = ctx.queue.clone();
        let a = format!("{}/a.png", server.uri());
        let b = format!("{}/b.png", server.uri());
        let adapter = ScriptedAdapter::new(vec![vec![a.as_str(), b.as_str()]]);

        let mut config = site(LoadMode::Lazy);
        config.download_backend = false;

        let report = PageWalker::new(config, Box::new(adapter), ctx, None).run().await;

        assert_eq!(report.dispatched, 1);
        assert!(queue.is_drained());
        assert!(queue.is_completed(&a).await);
        assert!(!queue.is_completed(&b).await);
        assert_eq!(queue.pending_count().await, 2);
        assert!(dir.path().join(IN_SESSION_LOG).exists());
        assert!(!dir.path().join(PENDING_LOG).exists());
        assert!(dir.path().join(COMPLETED_LOG).exists());
        assert_eq!(std::fs::read_dir(dir.path().join("images")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::failing();
        let ctx = context(dir.path(), &launcher).await;
        let adapter = ScriptedAdapter::new(vec![vec!["https://img/a.jpg"]]);

        let report = PageWalker::new(site(LoadMode::Paginated), Box::new(adapter), ctx, None)
            .run()
            .await;

        assert!(matches!(report.outcome, WalkOutcome::Stopped(_)));
        assert_eq!(launcher.launches(), 1);
    }
}
