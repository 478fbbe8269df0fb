use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Unique identifier for one shutdown cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CycleId(pub Uuid);

impl CycleId {
    /// Creates a new random `CycleId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number of a power-off job within one cycle.
///
/// Assigned in discovery order, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Location string identifying one VM known to the host.
///
/// For VMware hosts this is the path of the `.vmx` file. The value is
/// opaque to everything except the control service that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmLocation(String);

impl VmLocation {
    /// Copies a location reported by the control service into owned storage.
    ///
    /// Surrounding whitespace is trimmed.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidLocation`] if the location is empty.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidLocation {
                reason: "location is empty".to_owned(),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the location as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for VmLocation {
    type Error = CoreError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl AsRef<str> for VmLocation {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
