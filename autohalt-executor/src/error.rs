//! Error types for the executor crate.

use std::path::PathBuf;

use autohalt_core::{JobId, VmLocation};

use crate::backend::RawHandle;

/// Failures reported by a virtualization control service.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HostError {
    /// The control service could not be reached at all.
    #[error("control service unavailable: {reason}")]
    Unavailable { reason: String },

    /// The control tool binary was not found.
    #[error("control tool not found at {path}")]
    ToolNotFound { path: PathBuf },

    /// A control command ran but reported failure.
    #[error("`{command}` failed ({status}): {message}")]
    CommandFailed {
        command: String,
        status: String,
        message: String,
    },

    /// The handle is unknown to the service or was already released.
    #[error("invalid handle {0}")]
    InvalidHandle(RawHandle),

    /// The handle exists but is not of the kind the operation needs.
    #[error("handle {handle} is not a {expected}")]
    WrongHandleKind { handle: RawHandle, expected: &'static str },

    /// The job was already waited on.
    #[error("job {0} was already completed")]
    JobAlreadyCompleted(RawHandle),

    /// The job completed but did not carry a result handle.
    #[error("job {0} produced no result handle")]
    MissingResult(RawHandle),

    /// The VM location does not name a known VM.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while driving a shutdown cycle.
///
/// Each variant names the component step that issued the failing call.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The host session could not be opened.
    #[error("failed to connect to localhost: {0}")]
    Connect(#[source] HostError),

    /// Listing running VMs failed.
    #[error("failed to find running VMs: {0}")]
    Enumerate(#[source] HostError),

    /// A VM could not be opened.
    #[error("failed to open VM {job} ({location}): {source}")]
    Open {
        job: JobId,
        location: VmLocation,
        #[source]
        source: HostError,
    },

    /// The power-off request failed.
    #[error("failed to power off VM {job} ({location}): {source}")]
    PowerOff {
        job: JobId,
        location: VmLocation,
        #[source]
        source: HostError,
    },
}
