//! Core types for the autohalt VM shutdown orchestrator.
//!
//! Defines the domain vocabulary shared by the executor and the daemon:
//! VM locations, job records and outcomes, and the shutdown phase machine.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod id;
pub mod job;
pub mod phase;

pub use error::CoreError;
pub use id::{CycleId, JobId, VmLocation};
pub use job::{JobOutcome, JobRecord, JobStage};
pub use phase::ShutdownPhase;
