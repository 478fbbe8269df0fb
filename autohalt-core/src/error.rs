use crate::phase::ShutdownPhase;

/// Errors produced by the `autohalt-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A shutdown cycle attempted a transition the state machine forbids.
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: ShutdownPhase, to: ShutdownPhase },

    /// A VM location string could not be accepted.
    #[error("invalid VM location: {reason}")]
    InvalidLocation { reason: String },
}
