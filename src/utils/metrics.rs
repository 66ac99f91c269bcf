use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Crawl statistics shared by page-walk workers and fetchers
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<Metrics>>,
}

/// Snapshot of everything counted so far
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Result pages visited across all sites
    pub pages_walked: usize,

    /// Image URLs found on result pages
    pub urls_discovered: usize,

    pub successful_downloads: usize,

    pub failed_downloads: usize,

    /// Bytes written to the image directory
    pub bytes_downloaded: usize,

    /// Download durations in milliseconds
    pub download_durations: Vec<u64>,

    /// Per-site counters, keyed by site name
    pub sites: HashMap<String, SiteMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SiteMetrics {
    pub pages: usize,
    pub discovered: usize,
    pub downloaded: usize,
    pub failed: usize,
}

impl Metrics {
    /// Mean download time, if anything was downloaded
    pub fn average_download_ms(&self) -> Option<u64> {
        if self.download_durations.is_empty() {
            return None;
        }
        Some(self.download_durations.iter().sum::<u64>() / self.download_durations.len() as u64)
    }

    /// Downloads per second since collection started
    pub fn download_rate(&self) -> f64 {
        let elapsed = (Utc::now() - self.start_time).num_seconds().max(1) as f64;
        self.successful_downloads as f64 / elapsed
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record one result page visited on `site`
    pub async fn record_page(&self, site: &str, urls_found: usize) {
        let mut metrics = self.metrics.lock().await;
        metrics.pages_walked += 1;
        metrics.urls_discovered += urls_found;

        let entry = metrics.sites.entry(site.to_string()).or_default();
        entry.pages += 1;
        entry.discovered += urls_found;
    }

    /// Record a download attempt.
    ///
    /// `site` is `None` for downloads made by the fetcher pool, which only
    /// sees URLs.
    pub async fn record_download(&self, site: Option<&str>, success: bool, duration_ms: u64, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        if success {
            metrics.successful_downloads += 1;
            metrics.bytes_downloaded += bytes;
            metrics.download_durations.push(duration_ms);
        } else {
            metrics.failed_downloads += 1;
        }

        if let Some(site) = site {
            let entry = metrics.sites.entry(site.to_string()).or_default();
            if success {
                entry.downloaded += 1;
            } else {
                entry.failed += 1;
            }
        }
    }

    /// Start timing a download
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Measures how long a single download took
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
