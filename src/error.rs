//! Error types for the geoconvert library.
//!
//! Every workflow stage has its own variant so a failure can be localised to
//! the stage that produced it:
//!
//! | Stage | Variant |
//! |-------|---------|
//! | request assembly | [`GeoConvertError::Validation`] |
//! | upload ticket | [`GeoConvertError::TicketIssuance`] |
//! | byte transfer | [`GeoConvertError::Transfer`] |
//! | conversion call | [`GeoConvertError::ConversionTransport`], [`GeoConvertError::ConversionDomain`] |
//!
//! Each variant separates what a user may see ([`GeoConvertError::user_message`])
//! from what only belongs in logs ([`GeoConvertError::diagnostic`]). Raw
//! transport bodies from the ticket endpoint and collaborator tracebacks stay
//! on the diagnostic side.

use crate::output::WorkflowState;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the geoconvert library.
#[derive(Debug, Error)]
pub enum GeoConvertError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A required request field is missing or out of range. Raised before any
    /// network call is attempted.
    #[error("{message}")]
    Validation { message: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The backing store could not issue an upload location (unreachable,
    /// bad credentials, missing permission).
    #[error("Failed to get upload URL: {message}")]
    TicketIssuance { message: String, detail: Option<String> },

    /// The PUT to the upload location failed or returned a non-2xx status.
    #[error("Failed to upload file: {reason}")]
    Transfer { status: Option<u16>, reason: String },

    /// The collaborator returned a non-2xx status, could not be reached, or
    /// answered with a body that could not be understood. `body` is already
    /// the full `Conversion failed: ...` line.
    #[error("{body}")]
    ConversionTransport { status: Option<u16>, body: String },

    /// The collaborator answered 2xx but reported an error in the body.
    #[error("{message}")]
    ConversionDomain {
        message: String,
        traceback: Option<String>,
    },

    /// The invoking context cancelled the workflow.
    #[error("Conversion cancelled while {stage}")]
    Cancelled { stage: WorkflowState },

    // ── Local I/O errors ──────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the source file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Downloading the converted result failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Could not create or write a local output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GeoConvertError {
    /// Convenience constructor for [`GeoConvertError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// The single human-readable line shown to the end user.
    ///
    /// Never includes tracebacks or ticket-issuance internals.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Machine diagnostics that belong in logs only.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::TicketIssuance { detail, .. } => detail.as_deref(),
            Self::ConversionDomain { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }

    /// Short stage label used in structured log fields.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::TicketIssuance { .. } => "ticket",
            Self::Transfer { .. } => "transfer",
            Self::ConversionTransport { .. } | Self::ConversionDomain { .. } => "conversion",
            Self::Cancelled { .. } => "cancelled",
            Self::FileNotFound { .. } | Self::PermissionDenied { .. } => "source",
            Self::DownloadFailed { .. } | Self::OutputWriteFailed { .. } => "download",
            Self::InvalidConfig(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_error_hides_detail() {
        let e = GeoConvertError::TicketIssuance {
            message: "backing store unavailable".into(),
            detail: Some("invalid_grant: account disabled".into()),
        };
        let msg = e.user_message();
        assert!(msg.contains("upload URL"), "got: {msg}");
        assert!(!msg.contains("invalid_grant"));
        assert_eq!(e.diagnostic(), Some("invalid_grant: account disabled"));
    }

    #[test]
    fn domain_error_hides_traceback() {
        let e = GeoConvertError::ConversionDomain {
            message: "bad CRS".into(),
            traceback: Some("Traceback (most recent call last): ...".into()),
        };
        assert_eq!(e.user_message(), "bad CRS");
        assert!(e.diagnostic().unwrap().starts_with("Traceback"));
    }

    #[test]
    fn transport_error_includes_raw_body() {
        let e = GeoConvertError::ConversionTransport {
            status: Some(500),
            body: "Conversion failed: server exploded".into(),
        };
        assert_eq!(e.user_message(), "Conversion failed: server exploded");
        assert_eq!(e.stage(), "conversion");
    }

    #[test]
    fn cancelled_names_stage() {
        let e = GeoConvertError::Cancelled {
            stage: WorkflowState::Uploading,
        };
        assert!(e.to_string().contains("uploading"), "got: {e}");
    }
}
