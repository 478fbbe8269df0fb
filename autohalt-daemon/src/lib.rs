//! The autohalt daemon: waits for the user session to end and powers off
//! every running VM before the OS tears the session down.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cli;
pub mod error;
pub mod logging;
#[cfg(windows)]
pub mod session_window;
pub mod trigger;

pub use cli::Cli;
pub use error::DaemonError;
pub use logging::init_logging;
#[cfg(unix)]
pub use trigger::OsSessionEvents;
pub use trigger::{listen_for_session_end, run, run_until_session_end, SessionEvent, SessionEvents};
