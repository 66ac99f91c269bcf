use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::crawler::task::CrawlTask;

/// Every URL ever enqueued, one per line
pub const PENDING_LOG: &str = "all_img_urls.txt";

/// Every URL downloaded successfully, one per line
pub const COMPLETED_LOG: &str = "downloaded_img_urls.txt";

/// URLs only a browser session can download, one per line; never replayed
pub const IN_SESSION_LOG: &str = "in_session_img_urls.txt";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{} exists but {} does not", completed.display(), pending.display())]
    OrphanedCompletedLog { pending: PathBuf, completed: PathBuf },

    #[error("ledger I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only URL log mirrored by an in-memory set
struct UrlLog {
    path: PathBuf,
    urls: HashSet<String>,
}

impl UrlLog {
    /// Load the log, returning it with its URLs in file order
    async fn load(path: PathBuf) -> Result<(Self, Vec<String>), LedgerError> {
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        let mut urls = HashSet::new();
        let mut ordered = Vec::new();
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if urls.insert(line.to_string()) {
                ordered.push(line.to_string());
            }
        }

        Ok((Self { path, urls }, ordered))
    }

    fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Append a URL; returns false without writing when it is already present
    async fn append(&mut self, url: &str) -> Result<bool, LedgerError> {
        if self.urls.contains(url) {
            return Ok(false);
        }

        let io_err = |source: std::io::Error| LedgerError::Io { path: self.path.clone(), source };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(format!("{}\n", url).as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        self.urls.insert(url.to_string());
        Ok(true)
    }

    async fn reset(&mut self) -> Result<(), LedgerError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(LedgerError::Io { path: self.path.clone(), source }),
        }
        self.urls.clear();
        Ok(())
    }
}

/// Every URL the crawl knows about, split by who downloads it
struct Known {
    /// Background downloads, replayed into the queue on restart
    queued: UrlLog,
    /// In-session downloads, retried only when a walk finds them again
    in_session: UrlLog,
}

impl Known {
    fn contains(&self, url: &str) -> bool {
        self.queued.contains(url) || self.in_session.contains(url)
    }

    fn urls(&self) -> HashSet<String> {
        self.queued.urls.union(&self.in_session.urls).cloned().collect()
    }
}

/// Durable, deduplicated work queue of image URLs plus the resume ledger.
///
/// The known and completed logs are guarded by separate locks and no
/// operation holds both at once.
pub struct QueueManager {
    known: Mutex<Known>,
    completed: Mutex<UrlLog>,
    sender: mpsc::UnboundedSender<CrawlTask>,
    receiver: Mutex<mpsc::UnboundedReceiver<CrawlTask>>,
    queued: AtomicUsize,
}

impl QueueManager {
    /// Open the ledger in `state_dir`, reconciling it with any previous run
    pub async fn open(state_dir: &Path) -> Result<Self, LedgerError> {
        fs::create_dir_all(state_dir)
            .await
            .map_err(|source| LedgerError::Io { path: state_dir.to_path_buf(), source })?;

        let pending_path = state_dir.join(PENDING_LOG);
        let in_session_path = state_dir.join(IN_SESSION_LOG);
        let completed_path = state_dir.join(COMPLETED_LOG);

        if completed_path.exists() && !pending_path.exists() && !in_session_path.exists() {
            return Err(LedgerError::OrphanedCompletedLog {
                pending: pending_path,
                completed: completed_path,
            });
        }

        let (pending, pending_order) = UrlLog::load(pending_path).await?;
        let (in_session, _) = UrlLog::load(in_session_path).await?;
        let (mut completed, _) = UrlLog::load(completed_path).await?;
        let mut known = Known {
            queued: pending,
            in_session,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let manager_queued = AtomicUsize::new(0);

        let all = known.urls();
        if !all.is_empty() && all == completed.urls {
            info!("Previous crawl finished all {} downloads, starting fresh", all.len());
            known.queued.reset().await?;
            known.in_session.reset().await?;
            completed.reset().await?;
        } else {
            let mut replayed = 0;
            for url in pending_order.into_iter().filter(|u| !completed.contains(u)) {
                // The receiver is owned by the same struct, so the channel cannot be closed here
                let _ = sender.send(CrawlTask::new(url));
                replayed += 1;
            }
            manager_queued.store(replayed, Ordering::SeqCst);
            if replayed > 0 {
                info!(
                    "Resuming {} unfinished downloads ({} already completed)",
                    replayed,
                    completed.urls.len()
                );
            }
        }

        Ok(Self {
            known: Mutex::new(known),
            completed: Mutex::new(completed),
            sender,
            receiver: Mutex::new(receiver),
            queued: manager_queued,
        })
    }

    /// Queue a task unless its URL was ever enqueued before.
    ///
    /// Returns whether the task was accepted.
    pub async fn enqueue(&self, task: CrawlTask) -> Result<bool, LedgerError> {
        let mut known = self.known.lock().await;

        if known.in_session.contains(&task.url) || !known.queued.append(&task.url).await? {
            debug!("Skipping already known URL: {}", task.url);
            return Ok(false);
        }

        debug!("Queued image URL: {}", task.url);
        self.queued.fetch_add(1, Ordering::SeqCst);
        // The receiver is owned by the same struct, so the channel cannot be closed here
        let _ = self.sender.send(task);
        drop(known);

        Ok(true)
    }

    /// Record a URL that will be downloaded inside a browser session instead
    /// of through the queue. Such URLs are never handed to the fetcher pool.
    ///
    /// Returns whether the download still has to happen.
    pub async fn register(&self, url: &str) -> Result<bool, LedgerError> {
        {
            let mut known = self.known.lock().await;
            if known.queued.contains(url) {
                debug!("URL already belongs to the background queue: {}", url);
                return Ok(false);
            }
            known.in_session.append(url).await?;
        }
        Ok(!self.completed.lock().await.contains(url))
    }

    /// Pop the next task, waiting at most `timeout`.
    ///
    /// Returns `None` when nothing arrived in time or when the popped URL has
    /// already been downloaded.
    pub async fn dequeue(&self, timeout: Duration) -> Option<CrawlTask> {
        let received = tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await;

        let task = match received {
            Ok(Some(task)) => task,
            _ => return None,
        };
        self.queued.fetch_sub(1, Ordering::SeqCst);

        if self.completed.lock().await.contains(&task.url) {
            debug!("Dropping already downloaded URL: {}", task.url);
            return None;
        }

        Some(task)
    }

    /// Record a successful download.
    ///
    /// Completed URLs are always a subset of the known ones, so a URL that
    /// was never enqueued or registered is ignored.
    pub async fn mark_completed(&self, url: &str) -> Result<(), LedgerError> {
        if !self.known.lock().await.contains(url) {
            debug!("Ignoring completion of unknown URL: {}", url);
            return Ok(());
        }

        let mut completed = self.completed.lock().await;
        if completed.append(url).await? {
            debug!("Marked image as downloaded: {}", url);
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn is_completed(&self, url: &str) -> bool {
        self.completed.lock().await.contains(url)
    }

    /// URLs known to the ledger, whichever way they are downloaded
    pub async fn pending_count(&self) -> usize {
        self.known.lock().await.urls().len()
    }

    pub async fn completed_count(&self) -> usize {
        self.completed.lock().await.urls.len()
    }

    #[cfg(test)]
    pub async fn pending_urls(&self) -> HashSet<String> {
        self.known.lock().await.urls()
    }

    #[cfg(test)]
    pub async fn completed_urls(&self) -> HashSet<String> {
        self.completed.lock().await.urls.clone()
    }

    /// Tasks sitting in the runtime queue
    pub fn queued_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.queued_len() == 0
    }
}
