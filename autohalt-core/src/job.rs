use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JobId, VmLocation};

/// One discovered VM waiting to be powered off.
///
/// Records are created by the discovery callback and consumed by the
/// coordinator when it launches the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct JobRecord {
    /// Sequence number within the cycle.
    pub id: JobId,
    /// Location of the VM this job powers off.
    pub location: VmLocation,
    /// When the VM was reported by the host.
    pub discovered_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(id: JobId, location: VmLocation) -> Self {
        Self {
            id,
            location,
            discovered_at: Utc::now(),
        }
    }
}

/// Step of a power-off job at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum JobStage {
    /// Opening a handle to the VM.
    Open,
    /// Requesting the guest to power off.
    PowerOff,
    /// The job's task ended without reporting an outcome.
    Join,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::PowerOff => "power off",
            Self::Join => "join",
        };
        f.write_str(name)
    }
}

/// Final result of one power-off job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum JobOutcome {
    /// The host acknowledged the power-off request.
    PoweredOff,
    /// The job stopped early. The VM is left as-is.
    Failed {
        /// Step that failed.
        stage: JobStage,
        /// Human-readable description of the failure.
        reason: String,
    },
}

impl JobOutcome {
    /// Build a failure outcome from any displayable error.
    #[must_use]
    pub fn failed(stage: JobStage, reason: impl fmt::Display) -> Self {
        Self::Failed {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the VM was powered off.
    #[must_use]
    pub fn is_powered_off(&self) -> bool {
        matches!(self, Self::PoweredOff)
    }
}
