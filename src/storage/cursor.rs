use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Prefix marking a cursor line as "this site was crawled to its last page"
pub const FINISHED_MARKER: char = '#';

/// The most recent entry of a page cursor file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRecord {
    pub url: String,
    pub finished: bool,
}

/// Per-site history file remembering the last page reached
#[derive(Debug, Clone)]
pub struct PageCursor {
    path: PathBuf,
}

impl PageCursor {
    pub fn for_site(state_dir: &Path, site: &str) -> Self {
        let file_name = format!("{}-history-page.txt", site.replace(['/', '\\'], "_"));
        Self {
            path: state_dir.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last recorded page, if any
    pub async fn load(&self) -> io::Result<Option<CursorRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let last = contents.lines().map(str::trim).filter(|l| !l.is_empty()).last();
        Ok(last.map(|line| match line.strip_prefix(FINISHED_MARKER) {
            Some(url) => CursorRecord {
                url: url.to_string(),
                finished: true,
            },
            None => CursorRecord {
                url: line.to_string(),
                finished: false,
            },
        }))
    }

    /// Remember `url` as the page to resume from
    pub async fn record(&self, url: &str) -> io::Result<()> {
        self.append(url).await
    }

    /// Remember that the walk reached its last page at `url`
    pub async fn mark_finished(&self, url: &str) -> io::Result<()> {
        self.append(&format!("{}{}", FINISHED_MARKER, url)).await
    }

    async fn append(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    }
}
