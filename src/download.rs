//! Source retrieval over HTTP.
//!
//! Converters never talk to `reqwest` directly; they go through the
//! [`Downloader`] capability so a job can be driven end-to-end against an
//! in-memory fake.

use crate::error::ConversionError;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Capability to fetch a URL into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ConversionError>;
}

/// `reqwest`-backed downloader with a whole-request timeout.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpDownloader {
    pub fn new(timeout_secs: u64) -> Result<Self, ConversionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("edgequake-doc2md/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConversionError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> ConversionError {
        if e.is_timeout() {
            ConversionError::DownloadTimeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            ConversionError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ConversionError> {
        info!("Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        if !response.status().is_success() {
            return Err(ConversionError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ConversionError::io(format!("Failed to create '{}'", dest.display()), e))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ConversionError::io(format!("Failed to write '{}'", dest.display()), e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| ConversionError::io(format!("Failed to write '{}'", dest.display()), e))?;

        debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_is_download_failed() {
        let dir = tempfile::tempdir().unwrap();
        let dl = HttpDownloader::new(5).unwrap();
        // Port 9 on loopback refuses connections.
        let err = dl
            .download("http://127.0.0.1:9/paper.pdf", &dir.path().join("paper.pdf"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConversionError::DownloadFailed { .. } | ConversionError::DownloadTimeout { .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        use axum::{http::StatusCode, routing::get, Router};

        let app = Router::new().route("/missing.pdf", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let dir = tempfile::tempdir().unwrap();
        let err = HttpDownloader::new(5)
            .unwrap()
            .download(&format!("http://{addr}/missing.pdf"), &dir.path().join("x.pdf"))
            .await
            .unwrap_err();
        match err {
            ConversionError::DownloadFailed { reason, .. } => assert!(reason.contains("404"), "got: {reason}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn body_is_streamed_to_disk() {
        use axum::{routing::get, Router};

        let app = Router::new().route("/paper.pdf", get(|| async { "%PDF-1.7 body" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("paper.pdf");
        let n = HttpDownloader::new(5)
            .unwrap()
            .download(&format!("http://{addr}/paper.pdf"), &dest)
            .await
            .unwrap();
        assert_eq!(n, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7 body");
    }
}
