//! Session-end trigger: waits for the OS to announce logoff or shutdown,
//! then runs one shutdown cycle to completion.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use autohalt_executor::{completion_channel, CycleReport, HostService, ShutdownPipeline};

use crate::DaemonError;

/// The OS event that ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The user is logging off.
    Logoff,
    /// The system is shutting down.
    Shutdown,
    /// `SIGTERM`, sent by init at system shutdown.
    Terminate,
    /// `SIGHUP`, sent when the controlling session goes away.
    Hangup,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Logoff => "logoff",
            Self::Shutdown => "shutdown",
            Self::Terminate => "terminate",
            Self::Hangup => "hangup",
        };
        f.write_str(name)
    }
}

/// A source of session-end events.
#[async_trait]
pub trait SessionEvents: Send {
    /// Wait for the next event. `None` means the source is gone.
    async fn next_event(&mut self) -> Option<SessionEvent>;
}

/// `SIGTERM` and `SIGHUP`, as delivered to a Unix session process.
#[cfg(unix)]
pub struct OsSessionEvents {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSessionEvents {
    /// Register the signal handlers. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns [`DaemonError::ListenerInstall`] if a handler cannot be
    /// registered.
    pub fn install() -> Result<Self, DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = signal(SignalKind::terminate()).map_err(DaemonError::ListenerInstall)?;
        let hangup = signal(SignalKind::hangup()).map_err(DaemonError::ListenerInstall)?;
        tracing::info!("listening for SIGTERM and SIGHUP");
        Ok(Self { terminate, hangup })
    }
}

#[cfg(unix)]
#[async_trait]
impl SessionEvents for OsSessionEvents {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            got = self.terminate.recv() => got.map(|()| SessionEvent::Terminate),
            got = self.hangup.recv() => got.map(|()| SessionEvent::Hangup),
        }
    }
}

/// Wait for the session to end, then power off every running VM.
///
/// The shutdown cycle runs in its own task and reports back through a
/// completion channel. Until the watch reports completion the loop keeps
/// reading `events`, but later events are only logged; there is one cycle
/// per process.
///
/// # Errors
/// Returns [`DaemonError::EventSourceClosed`] if `events` ends before a
/// session-end event arrives, or [`DaemonError::HandlerStopped`] if the
/// cycle task dies without reporting.
pub async fn run_until_session_end<S, E>(
    pipeline: Arc<ShutdownPipeline<S>>,
    events: &mut E,
) -> Result<CycleReport, DaemonError>
where
    S: HostService + ?Sized + 'static,
    E: SessionEvents + ?Sized,
{
    tracing::info!("waiting for the session to end");
    let event = events.next_event().await.ok_or(DaemonError::EventSourceClosed)?;
    tracing::debug!(%event, "session event received");
    tracing::info!("session is ending, shutting down all running VMs");

    let (signal, mut watch) = completion_channel();
    let mut handler = tokio::spawn(async move {
        let report = pipeline.run_cycle().await;
        signal.complete(report);
    });

    let mut events_open = true;
    let mut handler_done = false;
    while !watch.is_complete() {
        tokio::select! {
            joined = &mut handler, if !handler_done => {
                handler_done = true;
                if let Err(e) = joined {
                    tracing::error!(error = %e, "shutdown handler task failed");
                }
            }
            event = events.next_event(), if events_open => match event {
                Some(event) => tracing::info!(%event, "shutdown already in progress, ignoring event"),
                None => events_open = false,
            },
            else => break,
        }
    }
    if !handler_done {
        if let Err(e) = handler.await {
            tracing::error!(error = %e, "shutdown handler task failed");
        }
    }

    watch.wait().await.ok_or(DaemonError::HandlerStopped)
}

/// Run the daemon.
///
/// With `debug` set, one cycle runs immediately and `until_session_end` is
/// never called. Otherwise the pipeline is handed to `until_session_end`,
/// which waits for the session to end and runs the cycle then.
///
/// # Errors
/// Whatever `until_session_end` reports.
pub async fn run<S, F, Fut>(
    pipeline: Arc<ShutdownPipeline<S>>,
    debug: bool,
    until_session_end: F,
) -> Result<CycleReport, DaemonError>
where
    S: HostService + ?Sized + 'static,
    F: FnOnce(Arc<ShutdownPipeline<S>>) -> Fut,
    Fut: Future<Output = Result<CycleReport, DaemonError>>,
{
    if debug {
        tracing::info!("debug mode, shutting down all VMs now");
        return Ok(pipeline.run_cycle().await);
    }
    until_session_end(pipeline).await
}

/// Install the platform's session-end listener and wait on it.
///
/// # Errors
/// Returns [`DaemonError::ListenerInstall`] if the listener cannot be set
/// up, or any error of [`run_until_session_end`].
#[cfg(unix)]
pub async fn listen_for_session_end<S>(pipeline: Arc<ShutdownPipeline<S>>) -> Result<CycleReport, DaemonError>
where
    S: HostService + ?Sized + 'static,
{
    let mut events = OsSessionEvents::install()?;
    run_until_session_end(pipeline, &mut events).await
}

/// Create the hidden session window and wait for `WM_ENDSESSION`.
///
/// # Errors
/// Returns [`DaemonError::ListenerInstall`] if the window class cannot be
/// registered or the window cannot be created.
#[cfg(windows)]
pub async fn listen_for_session_end<S>(pipeline: Arc<ShutdownPipeline<S>>) -> Result<CycleReport, DaemonError>
where
    S: HostService + ?Sized + 'static,
{
    crate::session_window::run_until_session_end(pipeline).await
}
