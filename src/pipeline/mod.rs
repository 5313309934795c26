//! Pipeline stages for the upload-convert workflow.
//!
//! Each submodule implements one step that touches the outside world. The
//! ticket stage lives in [`crate::gateway`] because the server reuses it.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ gateway ──▶ transfer ──▶ invoke
//! (path)     (ticket)    (PUT bytes)  (collaborator)
//! ```
//!
//! 1. [`source`]: read a local file, derive its name and MIME type
//! 2. [`crate::gateway`]: obtain a write-scoped upload URL
//! 3. [`transfer`]: PUT the bytes; size-scaled timeout
//! 4. [`invoke`]: ask the collaborator to convert; map the response

pub mod invoke;
pub mod source;
pub mod transfer;
