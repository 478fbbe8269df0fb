//! Scoped ownership of control-service handles.

use crate::backend::{HostService, RawHandle};

/// What a guarded handle refers to. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// An in-flight or completed host job.
    Job,
    /// An opened VM.
    Vm,
}

/// Owns one handle and releases it when dropped.
///
/// Guards declared in the same scope drop in reverse declaration order, so
/// handles acquired one after another are released newest first on every
/// exit path, including early returns through `?`.
#[must_use = "dropping the guard releases the handle immediately"]
pub struct HandleGuard<'a, S: HostService + ?Sized> {
    service: &'a S,
    handle: RawHandle,
    kind: HandleKind,
}

impl<'a, S: HostService + ?Sized> HandleGuard<'a, S> {
    /// Take ownership of `handle`.
    pub fn new(service: &'a S, handle: RawHandle, kind: HandleKind) -> Self {
        tracing::trace!(%handle, ?kind, "handle acquired");
        Self { service, handle, kind }
    }

    /// Guard a freshly issued job handle.
    pub fn job(service: &'a S, handle: RawHandle) -> Self {
        Self::new(service, handle, HandleKind::Job)
    }

    /// Guard an opened VM handle.
    pub fn vm(service: &'a S, handle: RawHandle) -> Self {
        Self::new(service, handle, HandleKind::Vm)
    }

    /// The guarded handle. Still owned by the guard.
    #[must_use]
    pub fn raw(&self) -> RawHandle {
        self.handle
    }
}

impl<S: HostService + ?Sized> Drop for HandleGuard<'_, S> {
    fn drop(&mut self) {
        tracing::trace!(handle = %self.handle, kind = ?self.kind, "handle released");
        self.service.release(self.handle);
    }
}
