//! The upload-convert orchestrator.
//!
//! One call to [`Orchestrator::convert`] runs one workflow:
//!
//! ```text
//! Idle ─▶ AwaitingTicket ─▶ Uploading ─▶ Converting ─▶ Completed
//!   │            │              │             │
//!   └────────────┴──────────────┴─────────────┴──▶ Failed | Cancelled
//! ```
//!
//! The three network calls are the only suspension points. Each is raced
//! against the caller's [`CancellationToken`]; whichever finishes first wins,
//! and a cancelled stage's future is dropped on the spot, closing its
//! connection. All workflow state lives on the calling task's stack, so one
//! `Orchestrator` can run any number of workflows concurrently without
//! locking.

use crate::config::ConverterConfig;
use crate::error::GeoConvertError;
use crate::gateway::{BlobStoreGateway, RemoteTicketGateway};
use crate::output::{UploadTicket, WorkflowReport, WorkflowState};
use crate::pipeline::invoke::{ConversionInvoker, HttpConversionInvoker};
use crate::pipeline::source;
use crate::pipeline::transfer::{ByteUploader, HttpUploader};
use crate::progress::ProgressCallback;
use crate::request::ConversionRequest;
use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives upload-convert workflows against injected stage implementations.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn BlobStoreGateway>,
    uploader: Arc<dyn ByteUploader>,
    invoker: Arc<dyn ConversionInvoker>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("progress", &self.progress.as_ref().map(|_| "<dyn WorkflowProgressCallback>"))
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn BlobStoreGateway>,
        uploader: Arc<dyn ByteUploader>,
        invoker: Arc<dyn ConversionInvoker>,
    ) -> Self {
        Self {
            gateway,
            uploader,
            invoker,
            progress: None,
        }
    }

    /// Attach a callback that observes every workflow this orchestrator runs.
    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn progress_callback(&self) -> Option<ProgressCallback> {
        self.progress.clone()
    }

    /// Wire the HTTP stage implementations described by `config`.
    pub fn from_config(config: &ConverterConfig) -> Result<Self, GeoConvertError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("geoconvert/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GeoConvertError::Internal(format!("HTTP client: {e}")))?;

        let gateway = RemoteTicketGateway::new(
            client.clone(),
            config.ticket_endpoint.clone(),
            Duration::from_secs(config.ticket_timeout_secs),
        );
        let uploader = HttpUploader::from_config(client.clone(), config);
        let invoker = HttpConversionInvoker::new(
            client,
            config.conversion_endpoint.clone(),
            config.origin.clone(),
            Duration::from_secs(config.conversion_timeout_secs),
        );

        let mut orchestrator = Self::new(Arc::new(gateway), Arc::new(uploader), Arc::new(invoker));
        orchestrator.progress = config.progress_callback.clone();
        Ok(orchestrator)
    }

    /// Run one workflow to completion.
    ///
    /// Never returns `Err`: every failure ends the workflow in
    /// [`WorkflowState::Failed`] and is carried in [`WorkflowReport::result`].
    pub async fn convert(&self, request: &ConversionRequest, body: Bytes) -> WorkflowReport {
        self.run(request, body, &CancellationToken::new(), self.progress.as_ref())
            .await
    }

    /// Run one workflow, abandoning it when `cancel` fires.
    ///
    /// A cancelled workflow ends in [`WorkflowState::Cancelled`]. Tickets
    /// already issued and bytes already written stay where they are.
    pub async fn convert_with_cancel(
        &self,
        request: &ConversionRequest,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> WorkflowReport {
        self.run(request, body, cancel, self.progress.as_ref()).await
    }

    pub(crate) async fn run(
        &self,
        request: &ConversionRequest,
        body: Bytes,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> WorkflowReport {
        let mut wf = Workflow::start(progress);
        info!(
            file = %request.source_file_name,
            bytes = body.len(),
            "Starting conversion workflow"
        );

        // ── Idle → AwaitingTicket ────────────────────────────────────────
        let params = match request.validate() {
            Ok(p) => p,
            Err(e) => return wf.fail(e),
        };
        wf.advance(WorkflowState::AwaitingTicket);

        // ── AwaitingTicket → Uploading ───────────────────────────────────
        let issued = race(
            cancel,
            WorkflowState::AwaitingTicket,
            self.gateway.issue_upload_ticket(&params.source_file_name),
        )
        .await;
        let ticket = match issued {
            Ok(t) => t,
            Err(e) => return wf.fail(e),
        };
        wf.ticket_issued(&ticket);
        if ticket.is_expired_at(Utc::now()) {
            return wf.fail(GeoConvertError::Transfer {
                status: None,
                reason: format!("upload URL expired at {}", ticket.expires_at),
            });
        }
        wf.advance(WorkflowState::Uploading);

        // ── Uploading → Converting ───────────────────────────────────────
        let uploaded = race(
            cancel,
            WorkflowState::Uploading,
            self.uploader.put(&ticket, body, &params.mime_type),
        )
        .await;
        if let Err(e) = uploaded {
            return wf.fail(e);
        }
        wf.advance(WorkflowState::Converting);

        // ── Converting → Completed ───────────────────────────────────────
        let outcome = race(
            cancel,
            WorkflowState::Converting,
            async {
                Ok(self
                    .invoker
                    .invoke(ticket.file_id, &ticket.storage_key, &params)
                    .await)
            },
        )
        .await;
        match outcome.and_then(|o| o.into_result()) {
            Ok(url) => wf.complete(url),
            Err(e) => wf.fail(e),
        }
    }
}

/// Await `stage`, unless `cancel` fires first.
async fn race<T>(
    cancel: &CancellationToken,
    stage: WorkflowState,
    fut: impl Future<Output = Result<T, GeoConvertError>>,
) -> Result<T, GeoConvertError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(%stage, "Workflow cancelled");
            Err(GeoConvertError::Cancelled { stage })
        }
        out = fut => out,
    }
}

/// State of the one workflow a `run` call owns.
struct Workflow<'a> {
    history: Vec<WorkflowState>,
    file_id: Option<Uuid>,
    storage_key: Option<String>,
    progress: Option<&'a ProgressCallback>,
    started: Instant,
}

impl<'a> Workflow<'a> {
    fn start(progress: Option<&'a ProgressCallback>) -> Self {
        Self {
            history: vec![WorkflowState::Idle],
            file_id: None,
            storage_key: None,
            progress,
            started: Instant::now(),
        }
    }

    fn state(&self) -> WorkflowState {
        self.history.last().copied().unwrap_or(WorkflowState::Idle)
    }

    fn advance(&mut self, next: WorkflowState) {
        let from = self.state();
        debug_assert!(from.can_advance_to(next), "illegal transition {from} -> {next}");
        debug!(file_id = ?self.file_id, "{} -> {}", from, next);
        self.history.push(next);
        if let Some(cb) = self.progress {
            cb.on_state_change(from, next);
        }
    }

    fn ticket_issued(&mut self, ticket: &UploadTicket) {
        self.file_id = Some(ticket.file_id);
        self.storage_key = Some(ticket.storage_key.clone());
        if let Some(cb) = self.progress {
            cb.on_ticket_issued(ticket);
        }
    }

    fn complete(mut self, download_url: String) -> WorkflowReport {
        self.advance(WorkflowState::Completed);
        info!(
            file_id = ?self.file_id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Conversion complete: {}",
            download_url
        );
        if let Some(cb) = self.progress {
            cb.on_completed(&download_url);
        }
        self.finish(Ok(download_url))
    }

    fn fail(mut self, err: GeoConvertError) -> WorkflowReport {
        let next = match err {
            GeoConvertError::Cancelled { .. } => WorkflowState::Cancelled,
            _ => WorkflowState::Failed,
        };
        let message = err.user_message();
        error!(
            file_id = ?self.file_id,
            stage = err.stage(),
            state = %self.state(),
            "Workflow failed: {}",
            message
        );
        if let Some(diagnostic) = err.diagnostic() {
            warn!(file_id = ?self.file_id, stage = err.stage(), "Diagnostic detail:\n{}", diagnostic);
        }
        self.advance(next);
        if let Some(cb) = self.progress {
            cb.on_failed(&message);
        }
        self.finish(Err(err))
    }

    fn finish(self, result: Result<String, GeoConvertError>) -> WorkflowReport {
        WorkflowReport {
            file_id: self.file_id,
            storage_key: self.storage_key,
            history: self.history,
            result,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Convert a local file.
///
/// `request` supplies formats, CRS and tolerance; an empty file name or MIME
/// type is filled in from the file itself.
///
/// # Errors
/// Returns `Err` only when the workflow cannot be set up (file unreadable,
/// invalid config). Workflow failures are reported in the returned report.
///
/// # Example
/// ```rust,no_run
/// use geoconvert::{convert_file, ConversionRequest, ConverterConfig, SpatialFormat};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConverterConfig::builder()
///     .conversion_endpoint("https://convert.example.com/")
///     .build()?;
/// let request = ConversionRequest {
///     input_format: Some(SpatialFormat::GeoJson),
///     output_format: Some(SpatialFormat::GeoParquet),
///     input_crs: "EPSG:4326".into(),
///     output_crs: "EPSG:3857".into(),
///     simplification_tolerance: 10,
///     ..Default::default()
/// };
/// let report = convert_file("parcels.geojson", request, &config).await?;
/// println!("{}", report.status_line());
/// # Ok(())
/// # }
/// ```
pub async fn convert_file(
    path: impl AsRef<Path>,
    mut request: ConversionRequest,
    config: &ConverterConfig,
) -> Result<WorkflowReport, GeoConvertError> {
    let src = source::resolve_source(path).await?;
    if request.source_file_name.trim().is_empty() {
        request.source_file_name = src.file_name.clone();
    }
    if request.declared_mime_type.trim().is_empty() {
        request.declared_mime_type = src.mime_type.clone();
    }
    let orchestrator = Orchestrator::from_config(config)?;
    Ok(orchestrator.convert(&request, src.bytes).await)
}
