//! Byte transfer: PUT the source file to its signed upload URL, and fetch
//! finished results.
//!
//! The upload goes straight from the Client Driver to the object store; the
//! ticket endpoint never sees the bytes. Success is any 2xx. The timeout
//! grows with the body size (see [`crate::ConverterConfig::transfer_timeout`])
//! because this is the one stage whose duration depends on the file.

use crate::config::ConverterConfig;
use crate::error::GeoConvertError;
use crate::output::UploadTicket;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Moves the source bytes to the upload location named by a ticket.
#[async_trait]
pub trait ByteUploader: Send + Sync {
    async fn put(
        &self,
        ticket: &UploadTicket,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), GeoConvertError>;
}

/// Computes the upload timeout for a body length.
pub type TimeoutPolicy = Arc<dyn Fn(u64) -> Duration + Send + Sync>;

/// [`ByteUploader`] over HTTP PUT.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    origin: Option<String>,
    timeout: TimeoutPolicy,
}

impl std::fmt::Debug for HttpUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUploader")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl HttpUploader {
    pub fn new(client: reqwest::Client, origin: Option<String>, timeout: TimeoutPolicy) -> Self {
        Self {
            client,
            origin,
            timeout,
        }
    }

    /// Uploader whose timeout follows `config`'s transfer settings.
    pub fn from_config(client: reqwest::Client, config: &ConverterConfig) -> Self {
        let cfg = config.clone();
        Self::new(
            client,
            config.origin.clone(),
            Arc::new(move |len: u64| cfg.transfer_timeout(len)),
        )
    }
}

#[async_trait]
impl ByteUploader for HttpUploader {
    async fn put(
        &self,
        ticket: &UploadTicket,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), GeoConvertError> {
        let len = body.len() as u64;
        let timeout = (self.timeout)(len);
        info!(
            file_id = %ticket.file_id,
            bytes = len,
            timeout_secs = timeout.as_secs(),
            "Uploading source file"
        );

        let mut req = self
            .client
            .put(&ticket.write_url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        if let Some(ref origin) = self.origin {
            req = req.header(reqwest::header::ORIGIN, origin);
        }

        let response = req.send().await.map_err(|e| {
            warn!(file_id = %ticket.file_id, "Upload request failed: {}", e);
            GeoConvertError::Transfer {
                status: None,
                reason: if e.is_timeout() {
                    format!("no response within {}s", timeout.as_secs())
                } else {
                    e.to_string()
                },
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(file_id = %ticket.file_id, "Could not read upload rejection body: {}", e);
                    String::new()
                }
            };
            warn!(
                file_id = %ticket.file_id,
                status = status.as_u16(),
                body = %text,
                "Upload rejected"
            );
            return Err(GeoConvertError::Transfer {
                status: Some(status.as_u16()),
                reason: format!("HTTP {status}"),
            });
        }

        debug!(file_id = %ticket.file_id, "Upload complete");
        Ok(())
    }
}

/// Download a finished result to `path`.
///
/// Streams the body to a temp file next to `path` and renames it into place,
/// so an interrupted download never leaves a truncated file behind.
pub async fn fetch_result(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    timeout: Duration,
) -> Result<u64, GeoConvertError> {
    info!("Downloading result from: {}", url);

    let download_failed = |reason: String| GeoConvertError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| download_failed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(download_failed(format!("HTTP {}", response.status())));
    }

    let write_failed = |source: std::io::Error| GeoConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await.map_err(write_failed)?;
    let mut written = 0u64;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(download_failed(e.to_string()));
            }
        };
        file.write_all(&chunk).await.map_err(write_failed)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_failed)?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    info!("Saved {} bytes to {}", written, path.display());
    Ok(written)
}
