//! Memoized, retried dataset download.
//!
//! A [`DataSource`] fetches CSV bodies over HTTP and caches them per URL, so
//! every consumer asking for the same dataset shares one request and one
//! in-memory copy. Transient failures (5xx, network errors) are retried on a
//! short fixed backoff before giving up.
//!
//! Concurrent interests in different datasets resolve last-write-wins: each
//! completed fetch replaces the source's notion of "latest", and callers that
//! captured an older handle simply keep their older body.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client as HttpClient;
use reqwest::redirect::Policy;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::table::CoreTable;

/// Blocking HTTP source with a per-URL body cache.
#[derive(Debug)]
pub struct DataSource {
    http: HttpClient,
    cache: RefCell<ahash::AHashMap<String, Rc<String>>>,
    latest: RefCell<Option<String>>,
}

impl Default for DataSource {
    fn default() -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30)) // total request timeout
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(5))
            .user_agent(concat!("grapher/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client build");
        Self {
            http,
            cache: RefCell::new(ahash::AHashMap::new()),
            latest: RefCell::new(None),
        }
    }
}

impl DataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `url`, returning the cached body when it was fetched before.
    /// The returned handle stays valid even after later fetches supersede it.
    pub fn fetch_body(&self, url: &str) -> Result<Rc<String>> {
        if let Some(body) = self.cache.borrow().get(url) {
            return Ok(Rc::clone(body));
        }
        let body = Rc::new(self.get_with_retry(url)?);
        self.cache
            .borrow_mut()
            .insert(url.to_string(), Rc::clone(&body));
        // Last-write-wins: whichever fetch completes last is "latest".
        *self.latest.borrow_mut() = Some(url.to_string());
        Ok(body)
    }

    /// Fetch `url` and parse the body as a CSV dataset.
    pub fn fetch_table(&self, url: &str) -> Result<CoreTable> {
        let body = self.fetch_body(url)?;
        CoreTable::from_csv_reader(body.as_bytes()).with_context(|| format!("parse CSV from {url}"))
    }

    /// The URL of the most recently completed (non-cached) fetch.
    pub fn latest_url(&self) -> Option<String> {
        self.latest.borrow().clone()
    }

    /// True when `url` has already been fetched and cached.
    pub fn is_cached(&self, url: &str) -> bool {
        self.cache.borrow().contains_key(url)
    }

    // Small retry for transient failures (5xx / network errors).
    fn get_with_retry(&self, url: &str) -> Result<String> {
        const BACKOFF_MS: [u64; 3] = [100, 300, 700];
        let mut last_err: Option<anyhow::Error> = None;
        for (attempt, backoff_ms) in BACKOFF_MS.iter().enumerate() {
            match self.http.get(url).send() {
                Ok(r) if r.status().is_success() => {
                    return r.text().with_context(|| format!("read body of {url}"));
                }
                Ok(r) if r.status().is_server_error() => {
                    last_err = Some(anyhow!("HTTP {}", r.status()));
                }
                Ok(r) => bail!("GET {url} failed with HTTP {}", r.status()),
                Err(e) => last_err = Some(e.into()),
            }
            if attempt + 1 < BACKOFF_MS.len() {
                std::thread::sleep(Duration::from_millis(*backoff_ms));
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow!("no response"));
        Err(err).with_context(|| format!("GET {url} failed after retries"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_source_has_no_latest() {
        let source = DataSource::new();
        assert!(source.latest_url().is_none());
        assert!(!source.is_cached("https://example.com/data.csv"));
    }

    #[test]
    fn retries_surface_the_last_error() {
        // Port 9 (discard) refuses connections; no external network involved.
        let source = DataSource::new();
        let err = source
            .fetch_body("http://127.0.0.1:9/data.csv")
            .unwrap_err();
        let rendered = format!("{err:#}");
        assert!(rendered.contains("failed after retries"), "{rendered}");
        assert!(!source.is_cached("http://127.0.0.1:9/data.csv"));
    }

    // Live-network test; run with: cargo test --features online
    #[cfg(feature = "online")]
    #[test]
    fn fetch_is_memoized() {
        let source = DataSource::new();
        let url = "https://raw.githubusercontent.com/plotly/datasets/master/tips.csv";
        let first = source.fetch_body(url).expect("first fetch");
        let second = source.fetch_body(url).expect("cached fetch");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(source.latest_url().as_deref(), Some(url));
    }
}
