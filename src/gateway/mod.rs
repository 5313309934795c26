//! Blob store gateway: issues short-lived, write-scoped upload locations.
//!
//! Two implementations of [`BlobStoreGateway`] cover the two sides of the
//! ticket endpoint:
//!
//! * [`GcsGateway`] signs Cloud Storage V4 URLs with a service-account key.
//!   The ticket server runs this one.
//! * [`RemoteTicketGateway`] asks a running ticket endpoint for a ticket.
//!   Client Drivers run this one, so credentials never leave the server.
//!
//! Issuing a ticket creates nothing in the store. The object appears only
//! when the client PUTs bytes to the write URL.

pub mod gcs;
pub mod remote;

pub use gcs::{GcsGateway, ServiceAccountKey};
pub use remote::RemoteTicketGateway;

use crate::error::GeoConvertError;
use crate::output::UploadTicket;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issues upload tickets against a backing object store.
#[async_trait]
pub trait BlobStoreGateway: Send + Sync {
    /// Issue a fresh ticket for `source_file_name`.
    ///
    /// Every call generates a new file id, so two tickets for the same name
    /// never share a storage key.
    async fn issue_upload_ticket(
        &self,
        source_file_name: &str,
    ) -> Result<UploadTicket, GeoConvertError>;
}

/// Body of `POST /api/convert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub file_name: String,
}

/// 200 response of `POST /api/convert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub upload_url: String,
    pub file_id: Uuid,
    /// The storage key (`{fileId}-{original name}`), not the original name.
    pub file_name: String,
    /// Absent from older endpoints; clients then assume issue time + 15 min.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&UploadTicket> for TicketResponse {
    fn from(t: &UploadTicket) -> Self {
        Self {
            upload_url: t.write_url.clone(),
            file_id: t.file_id,
            file_name: t.storage_key.clone(),
            expires_at: Some(t.expires_at),
        }
    }
}

/// Error body returned by the ticket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
