//! VMware control service backed by the `vmrun` command-line tool.
//!
//! `vmrun` has no notion of handles or jobs, so this backend keeps its own
//! handle table. Issuing a job only records what to do; the `vmrun`
//! invocation happens when the job is waited on.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;

use crate::backend::{DiscoverySink, HostService, JobProperty, PowerOpMode, RawHandle, ServiceProvider};
use crate::{HostConfig, HostError};

const LIST_HEADER: &str = "Total running VMs:";

/// Output of `vmrun list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningVms<'a> {
    /// Count printed in the header line, if there was a readable one.
    pub declared: Option<usize>,
    /// One `.vmx` path per running VM, in listing order.
    pub locations: Vec<&'a str>,
}

/// Parse the output of `vmrun list`.
///
/// ```text
/// Total running VMs: 2
/// /vms/build/build.vmx
/// /vms/db/db.vmx
/// ```
///
/// Blank lines are ignored. Locations borrow from `output`.
#[must_use]
pub fn parse_running_list(output: &str) -> RunningVms<'_> {
    let mut declared = None;
    let mut locations = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(count) = line.strip_prefix(LIST_HEADER) {
            declared = count.trim().parse().ok();
            continue;
        }
        locations.push(line);
    }
    RunningVms { declared, locations }
}

enum Pending {
    Connect(ServiceProvider),
    FindRunning { host: RawHandle, sink: DiscoverySink },
    Open { host: RawHandle, location: String },
    PowerOff { vm: RawHandle, mode: PowerOpMode },
}

enum Entry {
    Host(ServiceProvider),
    Vm { provider: ServiceProvider, path: PathBuf },
    Job(Option<Pending>),
}

#[derive(Default)]
struct HandleTable {
    last: u64,
    entries: HashMap<RawHandle, Entry>,
}

impl HandleTable {
    fn insert(&mut self, entry: Entry) -> RawHandle {
        self.last += 1;
        let handle = RawHandle::new(self.last);
        self.entries.insert(handle, entry);
        handle
    }
}

/// [`HostService`] implementation driving a local VMware product through
/// `vmrun`.
pub struct VmrunService {
    binary: PathBuf,
    table: Mutex<HandleTable>,
}

impl VmrunService {
    /// Create a service that runs the `vmrun` binary at `binary`.
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            table: Mutex::new(HandleTable::default()),
        }
    }

    /// Create a service from a [`HostConfig`].
    #[must_use]
    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.vmrun_path.clone())
    }

    /// Number of handles issued and not yet released.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.table().entries.len()
    }

    fn table(&self) -> MutexGuard<'_, HandleTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, pending: Pending) -> RawHandle {
        self.table().insert(Entry::Job(Some(pending)))
    }

    fn take_pending(&self, job: RawHandle) -> Result<Pending, HostError> {
        match self.table().entries.get_mut(&job) {
            Some(Entry::Job(pending)) => pending.take().ok_or(HostError::JobAlreadyCompleted(job)),
            Some(_) => Err(HostError::WrongHandleKind {
                handle: job,
                expected: "job",
            }),
            None => Err(HostError::InvalidHandle(job)),
        }
    }

    fn host_provider(&self, host: RawHandle) -> Result<ServiceProvider, HostError> {
        match self.table().entries.get(&host) {
            Some(Entry::Host(provider)) => Ok(*provider),
            Some(_) => Err(HostError::WrongHandleKind {
                handle: host,
                expected: "host",
            }),
            None => Err(HostError::InvalidHandle(host)),
        }
    }

    fn vm_target(&self, vm: RawHandle) -> Result<(ServiceProvider, PathBuf), HostError> {
        match self.table().entries.get(&vm) {
            Some(Entry::Vm { provider, path }) => Ok((*provider, path.clone())),
            Some(_) => Err(HostError::WrongHandleKind {
                handle: vm,
                expected: "VM",
            }),
            None => Err(HostError::InvalidHandle(vm)),
        }
    }

    async fn run(&self, provider: ServiceProvider, args: &[&OsStr]) -> Result<String, HostError> {
        let rendered = render_command(&self.binary, provider, args);
        tracing::debug!(command = %rendered, "running vmrun");

        let output = Command::new(&self.binary)
            .arg("-T")
            .arg(provider.host_type())
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => HostError::ToolNotFound {
                    path: self.binary.clone(),
                },
                _ => HostError::Io(e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        // vmrun prints its "Error: ..." lines on stdout.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("no output")
            .to_owned();
        Err(HostError::CommandFailed {
            command: rendered,
            status: output.status.to_string(),
            message,
        })
    }

    async fn complete(&self, pending: Pending) -> Result<Option<RawHandle>, HostError> {
        match pending {
            Pending::Connect(provider) => {
                self.run(provider, &[OsStr::new("list")]).await?;
                Ok(Some(self.table().insert(Entry::Host(provider))))
            }
            Pending::FindRunning { host, mut sink } => {
                let provider = self.host_provider(host)?;
                let output = self.run(provider, &[OsStr::new("list")]).await?;
                let running = parse_running_list(&output);
                if let Some(declared) = running.declared {
                    if declared != running.locations.len() {
                        tracing::warn!(
                            declared,
                            listed = running.locations.len(),
                            "vmrun list count does not match its entries"
                        );
                    }
                }
                for location in running.locations {
                    sink(location);
                }
                Ok(None)
            }
            Pending::Open { host, location } => {
                let provider = self.host_provider(host)?;
                let path = PathBuf::from(location);
                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => {}
                    Ok(_) => return Err(HostError::VmNotFound(path.display().to_string())),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(HostError::VmNotFound(path.display().to_string()));
                    }
                    Err(e) => return Err(HostError::Io(e)),
                }
                Ok(Some(self.table().insert(Entry::Vm { provider, path })))
            }
            Pending::PowerOff { vm, mode } => {
                let (provider, path) = self.vm_target(vm)?;
                self.run(
                    provider,
                    &[OsStr::new("stop"), path.as_os_str(), OsStr::new(mode.vmrun_arg())],
                )
                .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl HostService for VmrunService {
    fn connect(&self, provider: ServiceProvider) -> RawHandle {
        self.issue(Pending::Connect(provider))
    }

    fn find_running_vms(&self, host: RawHandle, sink: DiscoverySink) -> RawHandle {
        self.issue(Pending::FindRunning { host, sink })
    }

    fn open_vm(&self, host: RawHandle, location: &str) -> RawHandle {
        self.issue(Pending::Open {
            host,
            location: location.to_owned(),
        })
    }

    fn power_off(&self, vm: RawHandle, mode: PowerOpMode) -> RawHandle {
        self.issue(Pending::PowerOff { vm, mode })
    }

    async fn wait(
        &self,
        job: RawHandle,
        property: JobProperty,
    ) -> Result<Option<RawHandle>, HostError> {
        let pending = self.take_pending(job)?;
        let result = self.complete(pending).await?;
        match (property, result) {
            (JobProperty::ResultHandle, Some(handle)) => Ok(Some(handle)),
            (JobProperty::ResultHandle, None) => Err(HostError::MissingResult(job)),
            (JobProperty::None, Some(unwanted)) => {
                // Nobody asked for it, so nobody would release it.
                self.release(unwanted);
                Ok(None)
            }
            (JobProperty::None, None) => Ok(None),
        }
    }

    fn release(&self, handle: RawHandle) {
        if self.table().entries.remove(&handle).is_none() {
            tracing::debug!(%handle, "release of unknown handle ignored");
        }
    }

    fn disconnect(&self, host: RawHandle) {
        let mut table = self.table();
        if matches!(table.entries.get(&host), Some(Entry::Host(_))) {
            table.entries.remove(&host);
        } else {
            tracing::debug!(%host, "disconnect of unknown host ignored");
        }
    }
}

fn render_command(binary: &Path, provider: ServiceProvider, args: &[&OsStr]) -> String {
    let mut rendered = format!("{} -T {}", binary.display(), provider.host_type());
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
