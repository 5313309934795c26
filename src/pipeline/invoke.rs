//! Conversion invoker: one POST to the conversion collaborator.
//!
//! ## Failure mapping
//!
//! | Response | Outcome |
//! |----------|---------|
//! | network error / timeout | `Failure { Transport }` with a description |
//! | non-2xx | `Failure { Transport }`, message `Conversion failed: {body}` |
//! | 2xx, body has `error` | `Failure { Domain }`, `traceback` kept as diagnostic |
//! | 2xx, body has `downloadUrl` | `Success` |
//! | 2xx, anything else | `Failure { Transport }` with the raw text |
//!
//! There is no retry loop. A conversion may be expensive or have side effects
//! on the collaborator's side; a second attempt is a new workflow.

use crate::output::{ConversionOutcome, FailureKind};
use crate::request::{ConversionParams, SpatialFormat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Calls the external conversion collaborator.
#[async_trait]
pub trait ConversionInvoker: Send + Sync {
    /// Request conversion of the object at `storage_key`.
    async fn invoke(
        &self,
        file_id: Uuid,
        storage_key: &str,
        params: &ConversionParams,
    ) -> ConversionOutcome;
}

/// JSON body sent to the collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeBody<'a> {
    pub file_id: Uuid,
    /// The storage key, not the original file name.
    pub file_name: &'a str,
    pub output_format: SpatialFormat,
    pub input_format: SpatialFormat,
    #[serde(rename = "inputCRS")]
    pub input_crs: &'a str,
    #[serde(rename = "outputCRS")]
    pub output_crs: &'a str,
    pub simplification: u8,
}

impl<'a> InvokeBody<'a> {
    pub fn new(file_id: Uuid, storage_key: &'a str, params: &'a ConversionParams) -> Self {
        Self {
            file_id,
            file_name: storage_key,
            output_format: params.output_format,
            input_format: params.input_format,
            input_crs: &params.input_crs,
            output_crs: &params.output_crs,
            simplification: params.simplification,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollaboratorResponse {
    download_url: Option<String>,
    error: Option<String>,
    traceback: Option<String>,
}

/// [`ConversionInvoker`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConversionInvoker {
    client: reqwest::Client,
    endpoint: String,
    origin: Option<String>,
    timeout: Duration,
}

impl HttpConversionInvoker {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        origin: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            origin,
            timeout,
        }
    }
}

#[async_trait]
impl ConversionInvoker for HttpConversionInvoker {
    async fn invoke(
        &self,
        file_id: Uuid,
        storage_key: &str,
        params: &ConversionParams,
    ) -> ConversionOutcome {
        let body = InvokeBody::new(file_id, storage_key, params);
        info!(
            %file_id,
            storage_key,
            input_format = %params.input_format.as_str(),
            output_format = %params.output_format.as_str(),
            "Requesting conversion"
        );

        let mut req = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body);
        if let Some(ref origin) = self.origin {
            req = req.header(reqwest::header::ORIGIN, origin);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!(
                        "Conversion failed: no response within {}s",
                        self.timeout.as_secs()
                    )
                } else {
                    format!("Conversion failed: {e}")
                };
                warn!(%file_id, "Conversion request failed: {}", e);
                return transport_failure(message, None);
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(%file_id, "Failed to read conversion response: {}", e);
                return transport_failure(
                    format!("Conversion failed: could not read response: {e}"),
                    Some(status.as_u16()),
                );
            }
        };

        interpret_response(file_id, status, &text)
    }
}

/// Map a collaborator response (status + raw body) to an outcome.
pub fn interpret_response(
    file_id: Uuid,
    status: reqwest::StatusCode,
    text: &str,
) -> ConversionOutcome {
    if !status.is_success() {
        error!(%file_id, status = status.as_u16(), body = text, "Conversion failed");
        return transport_failure(format!("Conversion failed: {text}"), Some(status.as_u16()));
    }

    let parsed: CollaboratorResponse = match serde_json::from_str(text) {
        Ok(p) => p,
        Err(e) => {
            error!(%file_id, body = text, "Unparseable conversion response: {}", e);
            return transport_failure(
                format!("Conversion failed: unexpected response: {text}"),
                Some(status.as_u16()),
            );
        }
    };

    if let Some(message) = parsed.error.filter(|e| !e.trim().is_empty()) {
        error!(
            %file_id,
            error = %message,
            traceback = parsed.traceback.as_deref().unwrap_or(""),
            "Conversion error"
        );
        return ConversionOutcome::Failure {
            kind: FailureKind::Domain,
            error_message: message,
            diagnostic_detail: parsed.traceback.filter(|t| !t.is_empty()),
            status: Some(status.as_u16()),
        };
    }

    match parsed.download_url {
        Some(download_url) if !download_url.is_empty() => {
            debug!(%file_id, %download_url, "Conversion succeeded");
            ConversionOutcome::Success { download_url }
        }
        _ => {
            error!(%file_id, body = text, "Conversion response has no downloadUrl");
            transport_failure(
                format!("Conversion failed: response has no downloadUrl: {text}"),
                Some(status.as_u16()),
            )
        }
    }
}

fn transport_failure(error_message: String, status: Option<u16>) -> ConversionOutcome {
    ConversionOutcome::Failure {
        kind: FailureKind::Transport,
        error_message,
        diagnostic_detail: None,
        status,
    }
}
