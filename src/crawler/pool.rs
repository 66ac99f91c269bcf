use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::crawler::fetcher::ImageFetcher;
use crate::storage::queue::QueueManager;
use crate::utils::metrics::MetricsCollector;

/// Download counts of one or more fetch workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub downloaded: usize,
    pub failed: usize,
}

/// Fixed-size set of workers draining the work queue.
///
/// Failed downloads are dropped for this run; they stay pending in the
/// ledger and are retried after a restart.
pub struct FetcherPool {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<PoolStats>>,
}

impl FetcherPool {
    pub fn spawn(
        size: usize,
        queue: Arc<QueueManager>,
        fetcher: Arc<ImageFetcher>,
        metrics: MetricsCollector,
        poll_interval: Duration,
    ) -> Self {
        info!("Starting {} image fetchers", size);
        let stop = Arc::new(AtomicBool::new(false));

        let workers = (0..size)
            .map(|id| {
                let worker = FetchWorker {
                    id,
                    queue: queue.clone(),
                    fetcher: fetcher.clone(),
                    metrics: metrics.clone(),
                    stop: stop.clone(),
                    poll_interval,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self { stop, workers }
    }

    /// Let the workers drain the queue, then wait for all of them
    pub async fn shutdown(self) -> PoolStats {
        self.stop.store(true, Ordering::SeqCst);

        let mut total = PoolStats::default();
        for result in join_all(self.workers).await {
            match result {
                Ok(stats) => {
                    total.downloaded += stats.downloaded;
                    total.failed += stats.failed;
                }
                Err(e) => error!("Image fetcher panicked: {}", e),
            }
        }

        info!(
            "Image fetchers stopped: {} downloaded, {} failed",
            total.downloaded, total.failed
        );
        total
    }
}

struct FetchWorker {
    id: usize,
    queue: Arc<QueueManager>,
    fetcher: Arc<ImageFetcher>,
    metrics: MetricsCollector,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl FetchWorker {
    async fn run(self) -> PoolStats {
        debug!("Fetcher {} started", self.id);
        let mut stats = PoolStats::default();

        loop {
            let Some(task) = self.queue.dequeue(self.poll_interval).await else {
                if self.stop.load(Ordering::SeqCst) && self.queue.is_drained() {
                    break;
                }
                continue;
            };

            let timer = self.metrics.start_timer();
            match self.fetcher.download(&task).await {
                Ok(saved) => {
                    self.metrics.record_download(None, true, timer.end(), saved.size).await;
                    match self.queue.mark_completed(&task.url).await {
                        Ok(()) => stats.downloaded += 1,
                        Err(e) => error!(url = %task.url, error = %e, "Failed to record download"),
                    }
                }
                Err(e) => {
                    warn!(url = %task.url, error = %e, "Download failed");
                    self.metrics.record_download(None, false, timer.end(), 0).await;
                    stats.failed += 1;
                }
            }
        }

        debug!("Fetcher {} finished", self.id);
        stats
    }
}
