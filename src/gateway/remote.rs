//! Client side of the ticket endpoint.

use super::{BlobStoreGateway, ErrorBody, TicketRequest, TicketResponse};
use crate::error::GeoConvertError;
use crate::output::{UploadTicket, UPLOAD_TICKET_TTL_SECS};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// [`BlobStoreGateway`] that requests tickets from a ticket endpoint.
#[derive(Debug, Clone)]
pub struct RemoteTicketGateway {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RemoteTicketGateway {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BlobStoreGateway for RemoteTicketGateway {
    async fn issue_upload_ticket(
        &self,
        source_file_name: &str,
    ) -> Result<UploadTicket, GeoConvertError> {
        let requested_at = Utc::now();
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&TicketRequest {
                file_name: source_file_name.to_string(),
            })
            .send()
            .await
            .map_err(|e| {
                warn!(endpoint = %self.endpoint, "Ticket request failed: {}", e);
                GeoConvertError::TicketIssuance {
                    message: if e.is_timeout() {
                        format!("no response within {}s", self.timeout.as_secs())
                    } else {
                        "ticket endpoint unreachable".to_string()
                    },
                    detail: Some(e.to_string()),
                }
            })?;

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(status = status.as_u16(), "Could not read ticket endpoint response: {}", e);
                String::new()
            }
        };

        if !status.is_success() {
            // The endpoint's `error` text is meant for users; anything else
            // (an HTML error page from a proxy) is not.
            let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
            warn!(status = status.as_u16(), body = %text, "Ticket endpoint returned an error");
            return Err(GeoConvertError::TicketIssuance {
                message: body
                    .as_ref()
                    .map(|b| b.error.clone())
                    .unwrap_or_else(|| format!("HTTP {status}")),
                detail: Some(body.and_then(|b| b.details).unwrap_or(text)),
            });
        }

        let parsed: TicketResponse =
            serde_json::from_str(&text).map_err(|e| GeoConvertError::TicketIssuance {
                message: "unexpected response from ticket endpoint".into(),
                detail: Some(format!("{e}: {text}")),
            })?;

        let expected_prefix = format!("{}-", parsed.file_id);
        if !parsed.file_name.starts_with(&expected_prefix) {
            return Err(GeoConvertError::TicketIssuance {
                message: "unexpected response from ticket endpoint".into(),
                detail: Some(format!(
                    "storage key '{}' does not start with file id {}",
                    parsed.file_name, parsed.file_id
                )),
            });
        }

        // Rebuild from the storage key so the derived fields stay consistent.
        let mut ticket = UploadTicket::new(
            parsed.file_id,
            &parsed.file_name[expected_prefix.len()..],
            parsed.upload_url,
            requested_at,
        );
        if let Some(expires_at) = parsed.expires_at {
            ticket.issued_at = expires_at - chrono::Duration::seconds(UPLOAD_TICKET_TTL_SECS);
            ticket.expires_at = expires_at;
        }
        debug!(file_id = %ticket.file_id, "Received upload ticket");
        Ok(ticket)
    }
}
