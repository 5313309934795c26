//! # geoconvert
//!
//! Upload a spatial data file, have a remote service convert its format and
//! coordinate reference system, and get back a download link.
//!
//! ## Why this crate?
//!
//! Conversion services for geospatial data are usually serverless functions
//! that read their input from object storage. Getting a file there from a
//! browser or a laptop means three round trips that each fail in their own
//! way: ask for a signed upload URL, PUT the bytes, then call the converter
//! with the storage key. This crate drives those steps as one explicit state
//! machine and reports every failure the same way, with a user-facing message
//! and, where there is one, a diagnostic detail for the logs.
//!
//! ## Workflow
//!
//! ```text
//! ConversionRequest + bytes
//!  │
//!  ├─ 0. Validate  every required field present            (Idle)
//!  ├─ 1. Ticket    POST /api/convert → signed PUT URL      (AwaitingTicket)
//!  ├─ 2. Upload    PUT bytes to the signed URL             (Uploading)
//!  ├─ 3. Convert   POST storage key + formats + CRS        (Converting)
//!  └─ 4. Report    download URL, or the stage that failed  (Completed | Failed)
//! ```
//!
//! The ticket endpoint itself ([`server`], feature `server`) wraps a
//! [`GcsGateway`] that signs Cloud Storage V4 URLs locally, so the storage
//! credentials stay on the server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geoconvert::{convert_file, ConversionRequest, ConverterConfig, SpatialFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Conversion endpoint from CONVERSION_FUNCTION_URL in the CLI; set directly here.
//!     let config = ConverterConfig::builder()
//!         .ticket_endpoint("http://localhost:3000/api/convert")
//!         .conversion_endpoint("https://convert.example.com/")
//!         .build()?;
//!     let request = ConversionRequest {
//!         input_format: Some(SpatialFormat::GeoJson),
//!         output_format: Some(SpatialFormat::Csv),
//!         input_crs: "EPSG:4326".into(),
//!         output_crs: "EPSG:3857".into(),
//!         ..Default::default()
//!     };
//!     let report = convert_file("parcels.json", request, &config).await?;
//!     match report.download_url() {
//!         Some(url) => println!("{url}"),
//!         None => eprintln!("{}", report.status_line()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | The ticket endpoint (axum + tower-http) |
//! | `cli`    | on      | The `geoconvert` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library users that only drive workflows can turn both off:
//! ```toml
//! geoconvert = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod gateway;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder, GatewayConfig, GatewayConfigBuilder};
pub use convert::{convert_file, Orchestrator};
pub use error::GeoConvertError;
pub use gateway::{BlobStoreGateway, GcsGateway, RemoteTicketGateway, ServiceAccountKey};
pub use output::{ConversionOutcome, FailureKind, UploadTicket, WorkflowReport, WorkflowState};
pub use pipeline::invoke::{ConversionInvoker, HttpConversionInvoker};
pub use pipeline::transfer::{ByteUploader, HttpUploader};
pub use progress::{NoopProgressCallback, ProgressCallback, WorkflowProgressCallback};
pub use request::{ConversionParams, ConversionRequest, SpatialFormat};
pub use stream::{convert_stream, WorkflowEvent, WorkflowStream};
