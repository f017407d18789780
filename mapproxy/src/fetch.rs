//! HTTP access to remote metadata.

use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{MapproxyError, Result};

/// Default request timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Blocking HTTP GET, injectable for tests.
pub trait HttpFetcher: Send + Sync {
    /// Fetches `url`, failing on transport errors and non-success statuses.
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpFetcher`] backed by a blocking reqwest client.
///
/// The client is built on first use, which happens on a worker thread.
#[derive(Debug)]
pub struct ReqwestFetcher {
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| MapproxyError::internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client()?
            .get(url)
            .send()
            .map_err(|e| MapproxyError::internal(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(MapproxyError::internal(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| MapproxyError::internal(format!("Failed to read response: {}", e)))
    }
}
