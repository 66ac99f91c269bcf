//! Generic image download over HTTP.
//!
//! Requests mimic a desktop browser so image hosts that sniff headers serve
//! the real file instead of an error page.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, COOKIE};
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::cli::config::{BrowserSettings, FetchSettings};
use crate::crawler::task::CrawlTask;
use crate::storage::images::{detect_format, ImageStore};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("unrecognized image format")]
    UnknownFormat,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to write image: {0}")]
    Io(#[from] std::io::Error),
}

/// An image written to the image directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
    pub size: usize,
}

/// Downloads image URLs and stores them in the image directory
pub struct ImageFetcher {
    client: Client,
    store: ImageStore,
}

impl ImageFetcher {
    pub fn new(fetch: &FetchSettings, browser: &BrowserSettings, store: ImageStore) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Ok(accept) = HeaderValue::from_str(&fetch.accept) {
            headers.insert(ACCEPT, accept);
        }
        if let Ok(language) = HeaderValue::from_str(&browser.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, language);
        }
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .user_agent(browser.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()?;

        Ok(Self { client, store })
    }

    /// Fetch the bytes behind a task's URL
    pub async fn fetch(&self, task: &CrawlTask) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(&task.url);
        if let Some(cookies) = task.cookie_header() {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(bytes.to_vec())
    }

    /// Fetch, check and store one image, returning where it was written
    pub async fn download(&self, task: &CrawlTask) -> Result<SavedImage, FetchError> {
        let bytes = self.fetch(task).await?;
        let ext = detect_format(&bytes).ok_or(FetchError::UnknownFormat)?;
        let path = self.store.save(&bytes, ext).await?;

        debug!("Downloaded {} -> {}", task.url, path.display());
        Ok(SavedImage {
            path,
            size: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::CrawlerConfig;
    use crate::crawler::task::Cookie;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    fn fetcher(dir: &std::path::Path) -> ImageFetcher {
        let config = CrawlerConfig::default();
        let store = ImageStore::new(dir).unwrap();
        ImageFetcher::new(&config.fetch, &config.browser, store).unwrap()
    }

    #[tokio::test]
    async fn downloads_and_stores_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path());

        let saved = fetcher
            .download(&CrawlTask::new(format!("{}/a.png", server.uri())))
            .await
            .unwrap();

        assert_eq!(saved.size, PNG.len());
        assert_eq!(saved.path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(std::fs::read(saved.path).unwrap(), PNG);
    }

    #[tokio::test]
    async fn rejects_non_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(dir.path())
            .download(&CrawlTask::new(format!("{}/b.jpg", server.uri())))
            .await;

        assert!(matches!(result, Err(FetchError::Status(403))));
    }

    #[tokio::test]
    async fn rejects_unknown_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(dir.path())
            .download(&CrawlTask::new(format!("{}/c.jpg", server.uri())))
            .await;

        assert!(matches!(result, Err(FetchError::UnknownFormat)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rejects_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(dir.path())
            .fetch(&CrawlTask::new(format!("{}/d.jpg", server.uri())))
            .await;

        assert!(matches!(result, Err(FetchError::EmptyBody)));
    }

    #[tokio::test]
    async fn sends_session_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private.png"))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cookie = Cookie {
            name: "session".to_string(),
            value: "abc".to_string(),
            domain: None,
            path: None,
            secure: None,
            http_only: None,
            expiry: None,
        };
        let task = CrawlTask::with_cookies(format!("{}/private.png", server.uri()), vec![cookie]);

        tokio_test::assert_ok!(fetcher(dir.path()).download(&task).await);
    }
}
