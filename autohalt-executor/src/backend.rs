//! Virtualization control service abstraction.
//!
//! The service speaks in opaque handles. Every operation that talks to the
//! host is issued as a *job*: the issuing call returns a job handle at once,
//! and [`HostService::wait`] completes it and fetches its result property.
//! Every handle returned by the service must eventually be given back
//! through [`HostService::release`] (or [`HostService::disconnect`] for a
//! host handle).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::HostError;

/// Opaque reference to a host-side object: a connection, a VM or a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawHandle(u64);

impl RawHandle {
    /// Wrap a service-specific handle value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Which local hypervisor product the session talks to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ServiceProvider {
    /// VMware Workstation.
    #[default]
    Workstation,
    /// VMware Workstation Player.
    Player,
    /// VMware Fusion.
    Fusion,
}

/// How a VM should be powered off.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum PowerOpMode {
    /// Ask the guest OS to shut itself down.
    #[default]
    FromGuest,
    /// Cut power without involving the guest.
    Hard,
}

/// Result property requested when waiting on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProperty {
    /// Only wait for completion.
    None,
    /// Wait and return the handle the job produced.
    ResultHandle,
}

/// Receives the location of each running VM during enumeration.
///
/// The `&str` is only valid for the duration of the call; copy it to keep it.
pub type DiscoverySink = Box<dyn FnMut(&str) + Send>;

/// Virtualization control service.
///
/// Implementations must be `Send + Sync`: one session is shared by every
/// power-off task of a cycle.
#[async_trait]
pub trait HostService: Send + Sync {
    /// Issue a connection job to the local host.
    ///
    /// The job's result handle is the host handle.
    fn connect(&self, provider: ServiceProvider) -> RawHandle;

    /// Issue a job listing running VMs on `host`.
    ///
    /// `sink` is called once per running VM while the job is waited on,
    /// before [`HostService::wait`] returns. Implementations must not hold
    /// their own locks while calling it.
    fn find_running_vms(&self, host: RawHandle, sink: DiscoverySink) -> RawHandle;

    /// Issue a job opening the VM at `location`.
    ///
    /// The job's result handle is the VM handle.
    fn open_vm(&self, host: RawHandle, location: &str) -> RawHandle;

    /// Issue a job powering off the VM behind `vm`.
    fn power_off(&self, vm: RawHandle, mode: PowerOpMode) -> RawHandle;

    /// Wait for `job` to complete and fetch `property`.
    ///
    /// Returns `Some(handle)` when `property` is [`JobProperty::ResultHandle`],
    /// `None` otherwise. The returned handle is owned by the caller.
    ///
    /// # Errors
    /// Returns the [`HostError`] the job failed with, or
    /// [`HostError::MissingResult`] if a result handle was requested and the
    /// job produced none.
    async fn wait(
        &self,
        job: RawHandle,
        property: JobProperty,
    ) -> Result<Option<RawHandle>, HostError>;

    /// Give back a job or VM handle. Unknown handles are ignored.
    fn release(&self, handle: RawHandle);

    /// Close a host connection. Unknown handles are ignored.
    fn disconnect(&self, host: RawHandle);
}
