//! Host session: one live connection to the local control service.

use std::sync::Arc;

use crate::backend::{HostService, JobProperty, RawHandle, ServiceProvider};
use crate::handle::HandleGuard;
use crate::{ExecutorError, HostError};

/// A connection to the local virtualization host.
///
/// Owned by exactly one shutdown cycle. Dropping the session disconnects
/// it, so the connection is closed on every exit path of the cycle.
pub struct HostSession<S: HostService + ?Sized> {
    service: Arc<S>,
    host: RawHandle,
    connected: bool,
}

impl<S: HostService + ?Sized> HostSession<S> {
    /// Connect to the local host and wait for the connection to be ready.
    ///
    /// The connect job handle is released before this returns, whether or
    /// not the connection succeeded.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Connect`] if the service is unavailable or
    /// the connect job yields no host handle.
    pub async fn connect(service: Arc<S>, provider: ServiceProvider) -> Result<Self, ExecutorError> {
        tracing::info!(?provider, "connecting to localhost");
        let host = {
            let job = HandleGuard::job(&*service, service.connect(provider));
            tracing::debug!(job = %job.raw(), "connect job issued");
            service
                .wait(job.raw(), JobProperty::ResultHandle)
                .await
                .map_err(ExecutorError::Connect)?
                .ok_or_else(|| ExecutorError::Connect(HostError::MissingResult(job.raw())))?
        };
        tracing::info!(%host, "connected to localhost");

        Ok(Self {
            service,
            host,
            connected: true,
        })
    }

    /// The host handle.
    #[must_use]
    pub fn host(&self) -> RawHandle {
        self.host
    }

    /// The control service behind this session.
    #[must_use]
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// A read-only view for power-off tasks. It cannot disconnect.
    #[must_use]
    pub fn share(&self) -> SessionRef<S> {
        SessionRef {
            service: Arc::clone(&self.service),
            host: self.host,
        }
    }

    /// Close the connection now.
    pub fn disconnect(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.connected, false) {
            tracing::info!(host = %self.host, "disconnecting from localhost");
            self.service.disconnect(self.host);
        }
    }
}

impl<S: HostService + ?Sized> Drop for HostSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shared, read-only access to a connected session.
///
/// Handed to every power-off task. Tasks issue requests through it but
/// never close the connection; only the owning [`HostSession`] can.
pub struct SessionRef<S: HostService + ?Sized> {
    service: Arc<S>,
    host: RawHandle,
}

impl<S: HostService + ?Sized> SessionRef<S> {
    /// The host handle.
    #[must_use]
    pub fn host(&self) -> RawHandle {
        self.host
    }

    /// The control service behind the session.
    #[must_use]
    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S: HostService + ?Sized> Clone for SessionRef<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            host: self.host,
        }
    }
}
