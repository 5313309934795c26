//! Streaming workflow API: observe transitions as they happen.
//!
//! [`convert_stream`] runs the workflow on a spawned task and yields a
//! [`WorkflowEvent`] for every state transition, then exactly one
//! [`WorkflowEvent::Finished`] carrying the report. A UI can render status
//! text from the stream without implementing a callback trait.
//!
//! Dropping the [`WorkflowStream`] cancels the workflow.

use crate::convert::Orchestrator;
use crate::output::{WorkflowReport, WorkflowState};
use crate::progress::{ProgressCallback, WorkflowProgressCallback};
use crate::request::ConversionRequest;
use bytes::Bytes;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

/// One observable step of a workflow.
#[derive(Debug)]
pub enum WorkflowEvent {
    StateChanged {
        from: WorkflowState,
        to: WorkflowState,
    },
    /// Always the last event.
    Finished(WorkflowReport),
}

impl WorkflowEvent {
    /// The status line a Client Driver shows for this event.
    pub fn status_line(&self) -> String {
        match self {
            WorkflowEvent::StateChanged { to, .. } => to.status_message().to_string(),
            WorkflowEvent::Finished(report) => report.status_line(),
        }
    }
}

/// Stream of [`WorkflowEvent`]s; cancels the workflow when dropped.
pub struct WorkflowStream {
    rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for WorkflowStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Forwards transitions into the channel, then the orchestrator's own
/// callback, if any.
struct ChannelCallback {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
    inner: Option<ProgressCallback>,
}

impl WorkflowProgressCallback for ChannelCallback {
    fn on_state_change(&self, from: WorkflowState, to: WorkflowState) {
        // A closed receiver means the stream was dropped and the workflow
        // is being cancelled anyway.
        let _ = self.tx.send(WorkflowEvent::StateChanged { from, to });
        if let Some(ref cb) = self.inner {
            cb.on_state_change(from, to);
        }
    }

    fn on_ticket_issued(&self, ticket: &crate::output::UploadTicket) {
        if let Some(ref cb) = self.inner {
            cb.on_ticket_issued(ticket);
        }
    }

    fn on_completed(&self, download_url: &str) {
        if let Some(ref cb) = self.inner {
            cb.on_completed(download_url);
        }
    }

    fn on_failed(&self, message: &str) {
        if let Some(ref cb) = self.inner {
            cb.on_failed(message);
        }
    }
}

/// Run a workflow in the background, streaming its events.
///
/// Must be called from within a Tokio runtime.
///
/// # Example
/// ```rust,no_run
/// use geoconvert::{convert_stream, ConversionRequest, ConverterConfig, Orchestrator};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConverterConfig::builder()
///     .conversion_endpoint("https://convert.example.com/")
///     .build()?;
/// let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
/// let bytes = std::fs::read("parcels.geojson")?;
/// let request = ConversionRequest::default();
/// let mut events = convert_stream(orchestrator, request, bytes.into());
/// while let Some(event) = events.next().await {
///     println!("{}", event.status_line());
/// }
/// # Ok(())
/// # }
/// ```
pub fn convert_stream(
    orchestrator: Arc<Orchestrator>,
    request: ConversionRequest,
    body: Bytes,
) -> WorkflowStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    info!(file = %request.source_file_name, "Starting streaming workflow");
    tokio::spawn(async move {
        let callback: ProgressCallback = Arc::new(ChannelCallback {
            tx: tx.clone(),
            inner: orchestrator.progress_callback(),
        });
        let report = orchestrator
            .run(&request, body, &task_cancel, Some(&callback))
            .await;
        let _ = tx.send(WorkflowEvent::Finished(report));
    });

    WorkflowStream {
        rx,
        _cancel_on_drop: cancel.drop_guard(),
    }
}
