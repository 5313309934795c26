//! Progress-callback trait for workflow state transitions.
//!
//! Inject an [`Arc<dyn WorkflowProgressCallback>`] via
//! [`crate::config::ConverterConfigBuilder::progress_callback`] (or
//! [`crate::convert::Orchestrator::with_progress`]) to observe each stage as
//! the workflow advances. The CLI renders these as status lines; the
//! [`crate::stream`] module forwards them into a `Stream`.
//!
//! # Example
//!
//! ```rust
//! use geoconvert::{WorkflowProgressCallback, WorkflowState};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct StatusLog(Mutex<Vec<String>>);
//!
//! impl WorkflowProgressCallback for StatusLog {
//!     fn on_state_change(&self, _from: WorkflowState, to: WorkflowState) {
//!         self.0.lock().unwrap().push(to.status_message().to_string());
//!     }
//! }
//!
//! let log = StatusLog::default();
//! log.on_state_change(WorkflowState::Idle, WorkflowState::AwaitingTicket);
//! assert_eq!(log.0.lock().unwrap()[0], "Generating upload URL...");
//! ```

use crate::output::{UploadTicket, WorkflowState};
use std::sync::Arc;

/// Called by the orchestrator as a workflow advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. One orchestrator may run many workflows at once, so
/// implementations shared between them must synchronise their own state.
pub trait WorkflowProgressCallback: Send + Sync {
    /// Called on every transition, including into terminal states.
    fn on_state_change(&self, from: WorkflowState, to: WorkflowState) {
        let _ = (from, to);
    }

    /// Called once the upload location is known.
    fn on_ticket_issued(&self, ticket: &UploadTicket) {
        let _ = ticket;
    }

    /// Called when the collaborator returned a download URL.
    fn on_completed(&self, download_url: &str) {
        let _ = download_url;
    }

    /// Called with the user-facing message when a workflow fails.
    fn on_failed(&self, message: &str) {
        let _ = message;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl WorkflowProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConverterConfig`].
pub type ProgressCallback = Arc<dyn WorkflowProgressCallback>;
