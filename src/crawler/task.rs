use serde::{Serialize, Deserialize};
use url::Url;

/// A discovered image URL waiting to be downloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    /// Full-resolution image URL
    pub url: String,

    /// Session cookies for sites that bind downloads to the browsing session
    pub cookies: Option<Vec<Cookie>>,
}

impl CrawlTask {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cookies: None,
        }
    }

    pub fn with_cookies(url: impl Into<String>, cookies: Vec<Cookie>) -> Self {
        Self {
            url: url.into(),
            cookies: Some(cookies),
        }
    }

    /// Value for a `Cookie` request header, if the task carries any cookies
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.as_ref()?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Browser cookie carried along with a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub expiry: Option<i64>,
}

/// Turn a raw href/src scraped from a page into an absolute http(s) URL
pub fn resolve_image_url(base: &str, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => Url::parse(base).ok()?.join(raw).ok()?,
    };

    match url.scheme() {
        "http" | "https" => Some(url.to_string()),
        _ => None,
    }
}
