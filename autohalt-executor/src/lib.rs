//! VM shutdown orchestration for the autohalt daemon.
//!
//! Connects to the local virtualization host, lists the running VMs and
//! powers all of them off in parallel, returning only once every power-off
//! job has finished.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod enumerator;
pub mod error;
pub mod handle;
pub mod job;
pub mod pipeline;
pub mod session;
pub mod vmrun;

pub use backend::{DiscoverySink, HostService, JobProperty, PowerOpMode, RawHandle, ServiceProvider};
pub use completion::{completion_channel, CompletionSignal, CompletionWatch};
pub use config::{HostConfig, ParseNameError};
pub use coordinator::{BatchReport, JobCollector, JobCoordinator};
pub use enumerator::enumerate_running;
pub use error::{ExecutorError, HostError};
pub use handle::{HandleGuard, HandleKind};
pub use job::PowerOffJob;
pub use pipeline::{CycleOutcome, CycleReport, ShutdownPipeline};
pub use session::{HostSession, SessionRef};
pub use vmrun::{parse_running_list, RunningVms, VmrunService};
