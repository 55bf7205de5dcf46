//! HTTP package fetcher.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::installer::{PackageFetcher, UpgradeError};

/// Streams a package to disk with `reqwest`, reporting progress per chunk.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn download_error(url: &str, e: impl std::fmt::Display) -> UpgradeError {
    UpgradeError::Download {
        url: url.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl PackageFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<(), UpgradeError> {
        info!("fetching {} -> {}", url, dest.display());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(url, format!("server returned {}", status)));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(url, e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(written, total);
        }
        file.flush().await?;

        if let Some(total) = total {
            if written != total {
                return Err(download_error(
                    url,
                    format!("expected {} bytes, got {}", total, written),
                ));
            }
        }
        debug!("fetched {} bytes from {}", written, url);
        Ok(())
    }
}
