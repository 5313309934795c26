//! Source resolution: turn a user-supplied path into the bytes, file name and
//! MIME type a [`crate::ConversionRequest`] needs.
//!
//! The whole file is read into memory. Uploads are a single PUT of the raw
//! bytes, so there is nothing to gain from streaming here, and holding the
//! bytes lets the orchestrator size the transfer timeout up front.

use crate::error::GeoConvertError;
use crate::request::{ConversionRequest, FALLBACK_MIME_TYPE};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A local file ready to be uploaded.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    /// Seed a request with this file's name and MIME type.
    pub fn request(&self) -> ConversionRequest {
        ConversionRequest {
            source_file_name: self.file_name.clone(),
            declared_mime_type: self.mime_type.clone(),
            ..Default::default()
        }
    }
}

/// Guess a MIME type from the file extension.
///
/// Spatial extensions `mime_guess` doesn't know map to the fallback.
pub fn guess_mime_type(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("geojson") => "application/geo+json".to_string(),
        Some("parquet") | Some("geoparquet") => "application/vnd.apache.parquet".to_string(),
        _ => mime_guess::from_path(file_name)
            .first_raw()
            .unwrap_or(FALLBACK_MIME_TYPE)
            .to_string(),
    }
}

/// Read a local file for upload.
pub async fn resolve_source(path: impl AsRef<Path>) -> Result<SourceFile, GeoConvertError> {
    let path = path.as_ref().to_path_buf();

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(GeoConvertError::PermissionDenied { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GeoConvertError::FileNotFound { path });
        }
        Err(e) => {
            return Err(GeoConvertError::Internal(format!(
                "Failed to read '{}': {e}",
                path.display()
            )));
        }
    };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GeoConvertError::validation(format!(
                "'{}' has no usable file name",
                path.display()
            ))
        })?;

    let mime_type = guess_mime_type(&file_name);
    debug!(
        "Resolved source {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        mime_type
    );

    Ok(SourceFile {
        path,
        file_name,
        mime_type,
        bytes: Bytes::from(bytes),
    })
}
