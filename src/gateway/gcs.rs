//! Cloud Storage V4 signed URLs (`GOOG4-RSA-SHA256`).
//!
//! A signed URL is computed locally from the service-account key; no request
//! to the store is made. The URL grants `PUT` on exactly one object key for
//! [`UPLOAD_TICKET_TTL_SECS`] seconds.
//!
//! ```text
//! canonical request        string to sign                 URL
//! ─────────────────        ──────────────                 ───
//! PUT                      GOOG4-RSA-SHA256               https://{host}/{bucket}/{key}
//! /{bucket}/{key}          {timestamp}                      ?{canonical query}
//! {canonical query}        {date}/auto/storage/goog4_...    &X-Goog-Signature={hex}
//! host:{host}              hex(sha256(canonical request))
//!
//! host
//! UNSIGNED-PAYLOAD
//! ```
//!
//! The RSA-SHA256 (PKCS#1 v1.5) signature comes from `jsonwebtoken`'s crypto
//! module, which returns it base64url-encoded; Cloud Storage wants hex.

use super::BlobStoreGateway;
use crate::config::GatewayConfig;
use crate::error::GeoConvertError;
use crate::output::{UploadTicket, UPLOAD_TICKET_TTL_SECS};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};
use tracing::{debug, error, info};
use uuid::Uuid;

const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// The fields of a service-account key file that signing needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse a service-account key JSON document.
    pub fn from_json(json: &str) -> Result<Self, GeoConvertError> {
        serde_json::from_str(json).map_err(|e| GeoConvertError::TicketIssuance {
            message: "storage credentials are invalid".into(),
            detail: Some(format!("service-account JSON: {e}")),
        })
    }
}

/// [`BlobStoreGateway`] that signs Cloud Storage V4 URLs.
pub struct GcsGateway {
    bucket: String,
    storage_host: String,
    client_email: String,
    key: EncodingKey,
}

impl fmt::Debug for GcsGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsGateway")
            .field("bucket", &self.bucket)
            .field("storage_host", &self.storage_host)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl GcsGateway {
    /// Build a gateway from config.
    ///
    /// Fails with [`GeoConvertError::TicketIssuance`] when the credentials
    /// cannot be parsed; there is no point serving tickets that can't be
    /// signed.
    pub fn new(config: &GatewayConfig) -> Result<Self, GeoConvertError> {
        let account = ServiceAccountKey::from_json(&config.credentials_json)?;
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(|e| {
            GeoConvertError::TicketIssuance {
                message: "storage credentials are invalid".into(),
                detail: Some(format!("private key: {e}")),
            }
        })?;

        if let Some(ref key_project) = account.project_id {
            if !config.project_id.is_empty() && key_project != &config.project_id {
                info!(
                    key_project = %key_project,
                    project = %config.project_id,
                    "Service account belongs to a different project than the bucket"
                );
            }
        }

        info!(
            bucket = %config.bucket,
            client_email = %account.client_email,
            "Signed-URL gateway ready"
        );

        Ok(Self {
            bucket: config.bucket.clone(),
            storage_host: config.storage_host.clone(),
            client_email: account.client_email,
            key,
        })
    }

    /// Issue a ticket as of `now`.
    pub fn issue_at(
        &self,
        source_file_name: &str,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<UploadTicket, GeoConvertError> {
        let storage_key = crate::output::storage_key(file_id, source_file_name);
        let write_url = self.sign_put_url(&storage_key, now)?;
        Ok(UploadTicket::new(file_id, source_file_name, write_url, now))
    }

    /// Signed `PUT` URL for `object_key`, valid from `now` for the ticket TTL.
    pub fn sign_put_url(
        &self,
        object_key: &str,
        now: DateTime<Utc>,
    ) -> Result<String, GeoConvertError> {
        let parts = SigningParts::new(
            "PUT",
            &self.bucket,
            object_key,
            &self.storage_host,
            &self.client_email,
            now,
        );
        let signature = rsa_sha256_hex(parts.string_to_sign().as_bytes(), &self.key)?;
        Ok(format!(
            "https://{}{}?{}&X-Goog-Signature={}",
            self.storage_host, parts.canonical_uri, parts.canonical_query, signature
        ))
    }
}

#[async_trait]
impl BlobStoreGateway for GcsGateway {
    async fn issue_upload_ticket(
        &self,
        source_file_name: &str,
    ) -> Result<UploadTicket, GeoConvertError> {
        let ticket = self.issue_at(source_file_name, Uuid::new_v4(), Utc::now())?;
        debug!(
            file_id = %ticket.file_id,
            storage_key = %ticket.storage_key,
            expires_at = %ticket.expires_at,
            "Issued upload ticket"
        );
        Ok(ticket)
    }
}

/// The pieces of a V4 signature that depend only on the request.
#[derive(Debug)]
struct SigningParts {
    canonical_uri: String,
    canonical_query: String,
    canonical_request: String,
    timestamp: String,
    scope: String,
}

impl SigningParts {
    fn new(
        method: &str,
        bucket: &str,
        object_key: &str,
        host: &str,
        client_email: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/auto/storage/goog4_request");
        let credential = format!("{client_email}/{scope}");

        let canonical_uri = format!("/{}/{}", bucket, uri_encode(object_key, false));

        // Already in sorted order.
        let expires = UPLOAD_TICKET_TTL_SECS.to_string();
        let query = [
            ("X-Goog-Algorithm", SIGNING_ALGORITHM),
            ("X-Goog-Credential", credential.as_str()),
            ("X-Goog-Date", timestamp.as_str()),
            ("X-Goog-Expires", expires.as_str()),
            ("X-Goog-SignedHeaders", "host"),
        ];
        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{canonical_query}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD"
        );

        Self {
            canonical_uri,
            canonical_query,
            canonical_request,
            timestamp,
            scope,
        }
    }

    fn string_to_sign(&self) -> String {
        let digest = Sha256::digest(self.canonical_request.as_bytes());
        format!(
            "{SIGNING_ALGORITHM}\n{}\n{}\n{}",
            self.timestamp,
            self.scope,
            hex::encode(digest)
        )
    }
}

/// RFC 3986 percent-encoding. `/` is kept when encoding a path.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}

fn rsa_sha256_hex(message: &[u8], key: &EncodingKey) -> Result<String, GeoConvertError> {
    let sign_failed = |detail: String| {
        error!("URL signing failed: {}", detail);
        GeoConvertError::TicketIssuance {
            message: "could not sign upload URL".into(),
            detail: Some(detail),
        }
    };

    let b64 = jsonwebtoken::crypto::sign(message, key, Algorithm::RS256)
        .map_err(|e| sign_failed(e.to_string()))?;
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|e| sign_failed(e.to_string()))?;
    Ok(hex::encode(raw))
}
