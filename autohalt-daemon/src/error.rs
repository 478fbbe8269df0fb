//! Daemon-level errors.

/// Failures of the session-end listener.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DaemonError {
    /// The OS session-end handler could not be registered.
    #[error("failed to install session-end listener: {0}")]
    ListenerInstall(#[source] std::io::Error),

    /// The event source stopped before a session-end event arrived.
    #[error("session-end event source closed")]
    EventSourceClosed,

    /// The shutdown cycle task ended without reporting a result.
    #[error("shutdown handler stopped before reporting")]
    HandlerStopped,
}
