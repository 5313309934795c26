//! Types produced by the workflow: upload tickets, conversion outcomes,
//! workflow states and the final report.

use crate::error::GeoConvertError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifetime of an upload ticket's write URL.
pub const UPLOAD_TICKET_TTL_SECS: i64 = 15 * 60;

/// A short-lived, write-scoped upload location for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub file_id: Uuid,
    /// Object key in the backing store: `{file_id}-{source_file_name}`.
    pub storage_key: String,
    pub write_url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadTicket {
    /// Build a ticket for `source_file_name` issued at `issued_at`.
    ///
    /// The storage key and expiry are derived here so every gateway
    /// implementation agrees on them.
    pub fn new(
        file_id: Uuid,
        source_file_name: &str,
        write_url: String,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file_id,
            storage_key: storage_key(file_id, source_file_name),
            write_url,
            issued_at,
            expires_at: issued_at + Duration::seconds(UPLOAD_TICKET_TTL_SECS),
        }
    }

    /// Whether the write URL has logically expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Derive the object key for a file id and original file name.
pub fn storage_key(file_id: Uuid, source_file_name: &str) -> String {
    format!("{file_id}-{source_file_name}")
}

/// Which side of the collaborator call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Non-2xx status, network failure, or an unreadable response.
    Transport,
    /// 2xx response whose body carried an `error` field.
    Domain,
}

/// Result of one conversion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ConversionOutcome {
    Success {
        download_url: String,
    },
    Failure {
        kind: FailureKind,
        error_message: String,
        /// Tracebacks and similar; logged, never shown to the user.
        diagnostic_detail: Option<String>,
        /// HTTP status for transport failures that got a response.
        status: Option<u16>,
    },
}

impl ConversionOutcome {
    /// Map the outcome into the workflow's result type.
    pub fn into_result(self) -> Result<String, GeoConvertError> {
        match self {
            ConversionOutcome::Success { download_url } => Ok(download_url),
            ConversionOutcome::Failure {
                kind: FailureKind::Domain,
                error_message,
                diagnostic_detail,
                ..
            } => Err(GeoConvertError::ConversionDomain {
                message: error_message,
                traceback: diagnostic_detail,
            }),
            ConversionOutcome::Failure {
                kind: FailureKind::Transport,
                error_message,
                status,
                ..
            } => Err(GeoConvertError::ConversionTransport {
                status,
                body: error_message,
            }),
        }
    }
}

/// Observable state of one convert workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowState {
    Idle,
    AwaitingTicket,
    Uploading,
    Converting,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, next) {
            (Idle, AwaitingTicket) => true,
            (AwaitingTicket, Uploading) => true,
            (Uploading, Converting) => true,
            (Converting, Completed) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Status line a Client Driver shows when this state is entered.
    ///
    /// `Failed` has no fixed text; see [`WorkflowReport::status_line`].
    pub fn status_message(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "",
            WorkflowState::AwaitingTicket => "Generating upload URL...",
            WorkflowState::Uploading => "Uploading file...",
            WorkflowState::Converting => "File uploaded. Starting conversion...",
            WorkflowState::Completed => "Conversion complete!",
            WorkflowState::Failed => "Error during conversion",
            WorkflowState::Cancelled => "Conversion cancelled.",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::AwaitingTicket => "awaiting ticket",
            WorkflowState::Uploading => "uploading",
            WorkflowState::Converting => "converting",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Everything a caller learns from one convert call.
#[derive(Debug)]
pub struct WorkflowReport {
    /// Set once a ticket was issued.
    pub file_id: Option<Uuid>,
    pub storage_key: Option<String>,
    /// Every state entered, starting with [`WorkflowState::Idle`].
    pub history: Vec<WorkflowState>,
    /// The download URL, or the error that ended the workflow.
    pub result: Result<String, GeoConvertError>,
    pub duration_ms: u64,
}

impl WorkflowReport {
    /// The state the workflow ended in.
    pub fn state(&self) -> WorkflowState {
        self.history.last().copied().unwrap_or(WorkflowState::Idle)
    }

    pub fn download_url(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }

    pub fn error(&self) -> Option<&GeoConvertError> {
        self.result.as_ref().err()
    }

    /// The final status line for the Client Driver.
    pub fn status_line(&self) -> String {
        match &self.result {
            Ok(_) => WorkflowState::Completed.status_message().to_string(),
            Err(GeoConvertError::Cancelled { .. }) => {
                WorkflowState::Cancelled.status_message().to_string()
            }
            Err(e) => format!(
                "{}: {}",
                WorkflowState::Failed.status_message(),
                e.user_message()
            ),
        }
    }

    /// JSON summary with user-facing fields only.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "fileId": self.file_id,
            "storageKey": self.storage_key,
            "state": self.state(),
            "history": self.history,
            "downloadUrl": self.download_url(),
            "error": self.error().map(|e| e.user_message()),
            "durationMs": self.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_expires_exactly_fifteen_minutes_after_issue() {
        let now = Utc::now();
        let t = UploadTicket::new(Uuid::new_v4(), "parcels.json", "https://w".into(), now);
        assert_eq!((t.expires_at - t.issued_at).num_seconds(), 900);
        assert!(!t.is_expired_at(now));
        assert!(t.is_expired_at(now + Duration::seconds(900)));
    }

    #[test]
    fn storage_key_prefixes_file_id() {
        let id = Uuid::new_v4();
        assert_eq!(storage_key(id, "a b.shp"), format!("{id}-a b.shp"));
    }

    #[test]
    fn transitions_follow_pipeline_order() {
        use WorkflowState::*;
        assert!(Idle.can_advance_to(AwaitingTicket));
        assert!(AwaitingTicket.can_advance_to(Uploading));
        assert!(Uploading.can_advance_to(Converting));
        assert!(Converting.can_advance_to(Completed));
        assert!(!Idle.can_advance_to(Converting));
        assert!(!Uploading.can_advance_to(Completed));
        assert!(Idle.can_advance_to(Failed));
        assert!(Uploading.can_advance_to(Cancelled));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(AwaitingTicket));
    }

    #[test]
    fn outcome_maps_to_stage_errors() {
        let domain = ConversionOutcome::Failure {
            kind: FailureKind::Domain,
            error_message: "bad CRS".into(),
            diagnostic_detail: Some("tb".into()),
            status: Some(200),
        };
        assert!(matches!(
            domain.into_result(),
            Err(GeoConvertError::ConversionDomain { .. })
        ));

        let ok = ConversionOutcome::Success {
            download_url: "https://x/y".into(),
        };
        assert_eq!(ok.into_result().unwrap(), "https://x/y");
    }

    #[test]
    fn report_status_line_prefixes_errors() {
        let report = WorkflowReport {
            file_id: None,
            storage_key: None,
            history: vec![WorkflowState::Idle, WorkflowState::Failed],
            result: Err(GeoConvertError::validation("missing things")),
            duration_ms: 0,
        };
        assert_eq!(report.state(), WorkflowState::Failed);
        assert_eq!(report.status_line(), "Error during conversion: missing things");
        assert_eq!(report.to_json()["error"], "missing things");
    }

    #[test]
    fn outcome_serializes_with_outcome_tag() {
        let failure = ConversionOutcome::Failure {
            kind: FailureKind::Transport,
            error_message: "Conversion failed: server exploded".into(),
            diagnostic_detail: None,
            status: Some(500),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["kind"], "transport");
        assert_eq!(json["status"], 500);

        let back: ConversionOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }
}
