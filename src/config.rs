//! Configuration types for the convert workflow and the ticket gateway.
//!
//! Two configs exist because the workflow runs in two places:
//!
//! * [`ConverterConfig`]: where the Client Driver runs. Names the ticket
//!   endpoint and the conversion collaborator, plus per-stage timeouts.
//! * [`GatewayConfig`]: where upload tickets are issued. Holds the object
//!   store coordinates and the service-account credentials that sign URLs.
//!
//! Both are built through builders that validate in `build()`, and both are
//! handed to constructors explicitly. Nothing is read from globals.

use crate::error::GeoConvertError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default host that serves signed object URLs.
pub const DEFAULT_STORAGE_HOST: &str = "storage.googleapis.com";

/// Configuration for running convert workflows.
///
/// # Example
/// ```rust
/// use geoconvert::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .ticket_endpoint("http://localhost:3000/api/convert")
///     .conversion_endpoint("https://convert.example.com/")
///     .origin("http://localhost:3000")
///     .build()
///     .unwrap();
/// assert_eq!(config.ticket_timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// URL of the ticket endpoint (`POST {fileName}` → upload URL).
    pub ticket_endpoint: String,

    /// URL of the conversion collaborator.
    pub conversion_endpoint: String,

    /// Value sent in the `Origin` header of the upload PUT and the conversion
    /// POST. Signed-URL CORS rules on the bucket match against it.
    pub origin: Option<String>,

    /// Timeout for the ticket request in seconds. Default: 30.
    pub ticket_timeout_secs: u64,

    /// Timeout for the conversion call in seconds. Default: 120.
    ///
    /// Conversions of large files take a while on the collaborator side, but
    /// the call still must not block indefinitely.
    pub conversion_timeout_secs: u64,

    /// Fixed part of the upload timeout in seconds. Default: 30.
    pub transfer_base_timeout_secs: u64,

    /// Slowest upload throughput tolerated, in bytes per second. The upload
    /// timeout grows by one second per this many bytes. Default: 256 KiB/s.
    pub transfer_min_throughput_bps: u64,

    /// Upper bound on the upload timeout in seconds. Default: 3600.
    pub transfer_max_timeout_secs: u64,

    /// Timeout for downloading a finished result. Default: 300.
    pub download_timeout_secs: u64,

    /// Receives state transitions as the workflow advances.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ticket_endpoint: "http://localhost:3000/api/convert".to_string(),
            conversion_endpoint: String::new(),
            origin: None,
            ticket_timeout_secs: 30,
            conversion_timeout_secs: 120,
            transfer_base_timeout_secs: 30,
            transfer_min_throughput_bps: 256 * 1024,
            transfer_max_timeout_secs: 3600,
            download_timeout_secs: 300,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("ticket_endpoint", &self.ticket_endpoint)
            .field("conversion_endpoint", &self.conversion_endpoint)
            .field("origin", &self.origin)
            .field("ticket_timeout_secs", &self.ticket_timeout_secs)
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("transfer_base_timeout_secs", &self.transfer_base_timeout_secs)
            .field("transfer_min_throughput_bps", &self.transfer_min_throughput_bps)
            .field("transfer_max_timeout_secs", &self.transfer_max_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn WorkflowProgressCallback>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Upload timeout for a body of `len` bytes.
    ///
    /// `base + ceil(len / min_throughput)`, capped at the configured maximum.
    pub fn transfer_timeout(&self, len: u64) -> Duration {
        let throughput = self.transfer_min_throughput_bps.max(1);
        let scaled = len.div_ceil(throughput);
        let secs = self
            .transfer_base_timeout_secs
            .saturating_add(scaled)
            .min(self.transfer_max_timeout_secs);
        Duration::from_secs(secs)
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn ticket_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ticket_endpoint = url.into();
        self
    }

    pub fn conversion_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.conversion_endpoint = url.into();
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = Some(origin.into());
        self
    }

    pub fn ticket_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ticket_timeout_secs = secs.max(1);
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs.max(1);
        self
    }

    pub fn transfer_base_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transfer_base_timeout_secs = secs.max(1);
        self
    }

    pub fn transfer_min_throughput_bps(mut self, bps: u64) -> Self {
        self.config.transfer_min_throughput_bps = bps.max(1);
        self
    }

    pub fn transfer_max_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transfer_max_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, GeoConvertError> {
        let c = &self.config;
        parse_http_url("ticket endpoint", &c.ticket_endpoint)?;
        if c.conversion_endpoint.trim().is_empty() {
            return Err(GeoConvertError::InvalidConfig(
                "conversion endpoint is not set (CONVERSION_FUNCTION_URL)".into(),
            ));
        }
        parse_http_url("conversion endpoint", &c.conversion_endpoint)?;
        if c.transfer_max_timeout_secs < c.transfer_base_timeout_secs {
            return Err(GeoConvertError::InvalidConfig(format!(
                "transfer max timeout ({}s) is below the base timeout ({}s)",
                c.transfer_max_timeout_secs, c.transfer_base_timeout_secs
            )));
        }
        Ok(self.config)
    }
}

/// Configuration for issuing signed upload URLs.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Cloud project that owns the bucket.
    pub project_id: String,

    /// Bucket receiving uploads.
    pub bucket: String,

    /// Service-account key JSON (`client_email`, `private_key`).
    pub credentials_json: String,

    /// Host serving signed URLs. Default: `storage.googleapis.com`.
    pub storage_host: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            bucket: String::new(),
            credentials_json: String::new(),
            storage_host: DEFAULT_STORAGE_HOST.to_string(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("project_id", &self.project_id)
            .field("bucket", &self.bucket)
            .field("credentials_json", &"<redacted>")
            .field("storage_host", &self.storage_host)
            .finish()
    }
}

impl GatewayConfig {
    /// Create a new builder for `GatewayConfig`.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = id.into();
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.bucket = bucket.into();
        self
    }

    pub fn credentials_json(mut self, json: impl Into<String>) -> Self {
        self.config.credentials_json = json.into();
        self
    }

    pub fn storage_host(mut self, host: impl Into<String>) -> Self {
        self.config.storage_host = host.into();
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Credentials are not inspected here; a bad key surfaces as a ticket
    /// issuance error when the gateway is constructed.
    pub fn build(self) -> Result<GatewayConfig, GeoConvertError> {
        let c = &self.config;
        if c.bucket.trim().is_empty() {
            return Err(GeoConvertError::InvalidConfig(
                "bucket name is not set (GCP_BUCKET_NAME)".into(),
            ));
        }
        if c.storage_host.trim().is_empty() || c.storage_host.contains('/') {
            return Err(GeoConvertError::InvalidConfig(format!(
                "storage host must be a bare host name, got '{}'",
                c.storage_host
            )));
        }
        Ok(self.config)
    }
}

fn parse_http_url(what: &str, raw: &str) -> Result<Url, GeoConvertError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| GeoConvertError::InvalidConfig(format!("{what} '{raw}' is not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(GeoConvertError::InvalidConfig(format!(
            "{what} must use http or https, got '{other}'"
        ))),
    }
}
