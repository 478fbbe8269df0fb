use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Progress of one shutdown cycle.
///
/// ```text
/// Idle -> Connecting -> Enumerating -> PoweringOff -> Done
///            |
///            +--> Idle   (connect failed, cycle abandoned)
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ShutdownPhase {
    /// Waiting for the session-end signal.
    #[default]
    Idle,
    /// Opening the host session.
    Connecting,
    /// Listing running VMs and collecting jobs.
    Enumerating,
    /// Power-off jobs are running.
    PoweringOff,
    /// All jobs joined and the session is closed. Terminal.
    Done,
}

impl ShutdownPhase {
    /// Returns `true` if the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Enumerating | Self::Idle)
                | (Self::Enumerating, Self::PoweringOff)
                | (Self::PoweringOff, Self::Done)
        )
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidTransition`] for a forbidden transition,
    /// including any transition out of [`ShutdownPhase::Done`].
    pub fn advance(&mut self, next: Self) -> Result<(), CoreError> {
        if !self.can_advance_to(next) {
            return Err(CoreError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    /// Returns `true` for the terminal phase.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Enumerating => "enumerating",
            Self::PoweringOff => "powering-off",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}
