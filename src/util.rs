use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest_cookie_store::CookieStoreMutex;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
];

/// Browser-looking HTTP client for one resolution. Cookies set by one stage
/// are replayed on the next, like a real browser session.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// `referer` is the page reference the user asked for.
    pub fn new(referer: &str) -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::default());

        let client = reqwest::Client::builder()
            .cookie_provider(cookies)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(browser_headers(referer))
            .build()?;

        Ok(HttpClient { client })
    }

    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> reqwest::Result<reqwest::Response> {
        let resp = self.client.get(url).query(query).send().await?;
        debug!("GET {} -> {}", resp.url(), resp.status());
        Ok(resp)
    }
}

fn browser_headers(referer: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for &(name, value) in BROWSER_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }

    match HeaderValue::from_str(referer) {
        Ok(value) => {
            headers.insert(header::REFERER, value);
        }
        Err(_) => debug!("Not sending unrepresentable referer {:?}", referer),
    }

    headers
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "KiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "MiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "GiB";
    }

    format!("{:.2} {}", bytes, suffix)
}
