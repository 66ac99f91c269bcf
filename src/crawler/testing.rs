//! Hand-written fakes for driving page walks in tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::browser::{Browser, BrowserError, BrowserLauncher, Locator};
use crate::cli::config::{Credentials, ScrollPolicy, SiteConfig};
use crate::crawler::site::{Capabilities, SiteAdapter, SiteError, WalkState};
use crate::crawler::task::Cookie;

/// Browser that only remembers where it was sent
pub struct FakeBrowser {
    navigations: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .navigations
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn count(&self, _locator: &Locator) -> Result<usize, BrowserError> {
        Ok(0)
    }

    async fn attributes(&self, _locator: &Locator, _attr: &str) -> Result<Vec<String>, BrowserError> {
        Ok(Vec::new())
    }

    async fn click_nth(&self, locator: &Locator, _index: usize) -> Result<(), BrowserError> {
        Err(BrowserError::ElementNotFound(locator.to_string()))
    }

    async fn type_text(&self, _locator: &Locator, _text: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn submit(&self, _locator: &Locator) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn is_displayed(&self, _locator: &Locator) -> Result<bool, BrowserError> {
        Ok(false)
    }

    async fn scroll_by(&self, _pixels: i64) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn open_window(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn switch_to_last_window(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close_window(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn maximize(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launches [`FakeBrowser`]s sharing one navigation log
#[derive(Clone, Default)]
pub struct FakeLauncher {
    navigations: Arc<Mutex<Vec<String>>>,
    launches: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher whose sessions never start
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _site: &SiteConfig) -> Result<Box<dyn Browser>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BrowserError::NotInitialized);
        }
        Ok(Box::new(FakeBrowser {
            navigations: self.navigations.clone(),
            closed: self.closed.clone(),
        }))
    }
}

/// Adapter that serves a fixed list of result pages, then reports the last page
pub struct ScriptedAdapter {
    pages: VecDeque<Vec<String>>,
    originals: HashMap<String, Vec<String>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    page_number: usize,
}

impl ScriptedAdapter {
    pub fn new(pages: Vec<Vec<&str>>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|page| page.into_iter().map(String::from).collect())
                .collect(),
            originals: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            page_number: 1,
        }
    }

    /// Make `detail` resolve to `originals`; other detail URLs fail to resolve
    pub fn with_originals(mut self, detail: &str, originals: Vec<&str>) -> Self {
        self.originals
            .insert(detail.to_string(), originals.into_iter().map(String::from).collect());
        self
    }

    /// Names of the adapter operations invoked so far
    pub fn calls(&self) -> Arc<Mutex<Vec<&'static str>>> {
        self.calls.clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SiteAdapter for ScriptedAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            keywords: true,
            popup: true,
            mode_switch: true,
            resolve_original: true,
        }
    }

    async fn enter_keywords(&mut self, _browser: &dyn Browser, _keywords: &str) -> Result<(), SiteError> {
        self.record("enter_keywords");
        Ok(())
    }

    async fn dismiss_popup(&mut self, _browser: &dyn Browser) -> Result<(), SiteError> {
        self.record("dismiss_popup");
        Ok(())
    }

    /// Logs in without waiting for an operator
    async fn login(&mut self, _browser: &dyn Browser, _credentials: &Credentials) -> Result<(), SiteError> {
        self.record("login");
        Ok(())
    }

    async fn switch_to_paginated_mode(&mut self, _browser: &dyn Browser) -> Result<(), SiteError> {
        self.record("switch_to_paginated_mode");
        Ok(())
    }

    async fn scroll_to_load_all(&mut self, _browser: &dyn Browser, _policy: &ScrollPolicy) -> Result<usize, SiteError> {
        self.record("scroll_to_load_all");
        Ok(0)
    }

    async fn extract_urls_this_page(&mut self, _browser: &dyn Browser) -> Result<Vec<String>, SiteError> {
        self.record("extract_urls_this_page");
        self.pages.pop_front().ok_or(SiteError::NoResults)
    }

    async fn resolve_original_url(&mut self, _browser: &dyn Browser, detail_url: &str) -> Result<Vec<String>, SiteError> {
        self.record("resolve_original_url");
        self.originals
            .get(detail_url)
            .cloned()
            .ok_or_else(|| SiteError::NotFound(detail_url.to_string()))
    }

    async fn go_to_next_page(&mut self, browser: &dyn Browser, walk: &mut WalkState) -> Result<(), SiteError> {
        self.record("go_to_next_page");
        if self.pages.is_empty() {
            let current = browser.current_url().await?;
            return walk.mark_last_page(&current).await;
        }

        self.page_number += 1;
        let next = format!("https://site/page{}", self.page_number);
        browser.navigate(&next).await?;
        walk.record_page_cursor(&next).await
    }
}
