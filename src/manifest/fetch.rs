//! Manifest and compatibility document fetcher
//!
//! Reads `file://` locators from disk and `http(s)://` locators over HTTP.

use crate::domain::ports::ManifestFetcher;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const FILE_SCHEME: &str = "file://";

/// Fetcher backed by `reqwest` and `tokio::fs`
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn fetch_file(&self, locator: &str, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::ManifestFetch {
                locator: locator.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_http(&self, locator: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| Error::ManifestFetch {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::ManifestFetch {
                locator: locator.to_string(),
                reason: format!("unexpected HTTP status {}", status),
            });
        }

        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ManifestFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", locator);

        if let Some(path) = locator.strip_prefix(FILE_SCHEME) {
            return self.fetch_file(locator, path).await;
        }
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.fetch_http(locator).await;
        }

        Err(Error::ManifestFetch {
            locator: locator.to_string(),
            reason: "unsupported scheme, expected file://, http:// or https://".into(),
        })
    }
}
