use chrono::Local;
use rand::{thread_rng, Rng};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes downloaded images under a single directory
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `year-month-day-hour-minute-second-salt.ext`; collisions are possible but not guarded against
    pub fn unique_name(ext: &str) -> String {
        let salt: u32 = thread_rng().gen();
        format!("{}-{}.{}", Local::now().format("%Y-%m-%d-%H-%M-%S"), salt, ext)
    }

    pub async fn save(&self, bytes: &[u8], ext: &str) -> io::Result<PathBuf> {
        let path = self.dir.join(Self::unique_name(ext));
        tokio::fs::write(&path, bytes).await?;
        debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

/// Identify an image by its leading bytes, returning the file extension to use
pub fn detect_format(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("jpeg"),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some("png"),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some("gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("webp"),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some("tiff"),
        [b'B', b'M', ..] if bytes.len() > 14 => Some("bmp"),
        [0x00, 0x00, 0x01, 0x00, ..] => Some("ico"),
        _ => None,
    }
}
