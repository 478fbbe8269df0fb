//! In-memory control service with failure injection and handle accounting.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use autohalt_executor::{DiscoverySink, HostError, HostService, JobProperty, PowerOpMode, RawHandle, ServiceProvider};
use tokio::sync::Barrier;

enum MockJob {
    Connect,
    Find(DiscoverySink),
    Open(String),
    PowerOff(String),
    BadTarget(RawHandle),
}

enum MockEntry {
    Host,
    Vm(String),
    Job(Option<MockJob>),
}

/// Counters observed by the tests.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    /// Every handle handed out, in issue order.
    pub acquired: Vec<RawHandle>,
    /// Every handle given back, in release order. Host handles included.
    pub released: Vec<RawHandle>,
    /// Releases of handles that were not live.
    pub double_releases: usize,
    pub disconnects: usize,
    pub enumerations: usize,
    pub open_attempts: Vec<String>,
    pub power_off_attempts: Vec<String>,
    pub power_off_modes: Vec<PowerOpMode>,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

#[derive(Default)]
struct MockState {
    last: u64,
    live: HashMap<RawHandle, MockEntry>,
    stats: MockStats,
}

impl MockState {
    fn insert(&mut self, entry: MockEntry) -> RawHandle {
        self.last += 1;
        let handle = RawHandle::new(self.last);
        self.live.insert(handle, entry);
        self.stats.acquired.push(handle);
        handle
    }

    fn give_back(&mut self, handle: RawHandle) {
        if self.live.remove(&handle).is_some() {
            self.stats.released.push(handle);
        } else {
            self.stats.double_releases += 1;
        }
    }
}

#[derive(Default)]
pub struct MockHost {
    vms: Vec<String>,
    fail_connect: bool,
    fail_enumeration_after: Option<usize>,
    fail_open: HashSet<String>,
    fail_power_off: HashSet<String>,
    power_off_delay: HashMap<String, Duration>,
    power_off_gate: Option<Arc<Barrier>>,
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn with_vms<S: AsRef<str>>(vms: &[S]) -> Self {
        Self {
            vms: vms.iter().map(|vm| vm.as_ref().to_owned()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Report the first `count` VMs, then fail the listing.
    pub fn failing_enumeration_after(mut self, count: usize) -> Self {
        self.fail_enumeration_after = Some(count);
        self
    }

    pub fn failing_open(mut self, vm: &str) -> Self {
        self.fail_open.insert(vm.to_owned());
        self
    }

    pub fn failing_power_off(mut self, vm: &str) -> Self {
        self.fail_power_off.insert(vm.to_owned());
        self
    }

    pub fn power_off_delay(mut self, vm: &str, delay: Duration) -> Self {
        self.power_off_delay.insert(vm.to_owned(), delay);
        self
    }

    /// Hold every power-off until `parties` of them are in flight at once.
    pub fn gated_power_off(mut self, parties: usize) -> Self {
        self.power_off_gate = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn stats(&self) -> MockStats {
        self.state().stats.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.state().live.len()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn issue(&self, job: MockJob) -> RawHandle {
        self.state().insert(MockEntry::Job(Some(job)))
    }

    async fn complete(&self, job: MockJob) -> Result<Option<RawHandle>, HostError> {
        match job {
            MockJob::Connect => {
                if self.fail_connect {
                    return Err(HostError::Unavailable {
                        reason: "mock host refuses connections".to_owned(),
                    });
                }
                Ok(Some(self.state().insert(MockEntry::Host)))
            }
            MockJob::Find(mut sink) => {
                self.state().stats.enumerations += 1;
                for (index, vm) in self.vms.iter().enumerate() {
                    if self.fail_enumeration_after == Some(index) {
                        return Err(mock_failure("list"));
                    }
                    // The sink only ever sees a short-lived buffer.
                    let buffer = vm.clone();
                    sink(&buffer);
                    drop(buffer);
                }
                if self.fail_enumeration_after == Some(self.vms.len()) {
                    return Err(mock_failure("list"));
                }
                Ok(None)
            }
            MockJob::Open(location) => {
                self.state().stats.open_attempts.push(location.clone());
                if self.fail_open.contains(&location) {
                    return Err(HostError::VmNotFound(location));
                }
                Ok(Some(self.state().insert(MockEntry::Vm(location))))
            }
            MockJob::PowerOff(location) => {
                {
                    let mut state = self.state();
                    state.stats.power_off_attempts.push(location.clone());
                    state.stats.in_flight += 1;
                    state.stats.max_in_flight = state.stats.max_in_flight.max(state.stats.in_flight);
                }
                if let Some(gate) = &self.power_off_gate {
                    gate.wait().await;
                }
                if let Some(delay) = self.power_off_delay.get(&location) {
                    tokio::time::sleep(*delay).await;
                }
                self.state().stats.in_flight -= 1;
                if self.fail_power_off.contains(&location) {
                    return Err(mock_failure("stop"));
                }
                Ok(None)
            }
            MockJob::BadTarget(handle) => Err(HostError::InvalidHandle(handle)),
        }
    }
}

fn mock_failure(command: &str) -> HostError {
    HostError::CommandFailed {
        command: format!("mock {command}"),
        status: "exit status: 255".to_owned(),
        message: "Error: injected failure".to_owned(),
    }
}

#[async_trait]
impl HostService for MockHost {
    fn connect(&self, _provider: ServiceProvider) -> RawHandle {
        self.issue(MockJob::Connect)
    }

    fn find_running_vms(&self, _host: RawHandle, sink: DiscoverySink) -> RawHandle {
        self.issue(MockJob::Find(sink))
    }

    fn open_vm(&self, _host: RawHandle, location: &str) -> RawHandle {
        self.issue(MockJob::Open(location.to_owned()))
    }

    fn power_off(&self, vm: RawHandle, mode: PowerOpMode) -> RawHandle {
        let mut state = self.state();
        state.stats.power_off_modes.push(mode);
        let job = match state.live.get(&vm) {
            Some(MockEntry::Vm(location)) => MockJob::PowerOff(location.clone()),
            _ => MockJob::BadTarget(vm),
        };
        state.insert(MockEntry::Job(Some(job)))
    }

    async fn wait(
        &self,
        job: RawHandle,
        property: JobProperty,
    ) -> Result<Option<RawHandle>, HostError> {
        let pending = match self.state().live.get_mut(&job) {
            Some(MockEntry::Job(pending)) => pending.take().ok_or(HostError::JobAlreadyCompleted(job))?,
            Some(_) => {
                return Err(HostError::WrongHandleKind {
                    handle: job,
                    expected: "job",
                })
            }
            None => return Err(HostError::InvalidHandle(job)),
        };
        let result = self.complete(pending).await?;
        match property {
            JobProperty::ResultHandle => result.ok_or(HostError::MissingResult(job)).map(Some),
            JobProperty::None => {
                if let Some(unwanted) = result {
                    self.release(unwanted);
                }
                Ok(None)
            }
        }
    }

    fn release(&self, handle: RawHandle) {
        self.state().give_back(handle);
    }

    fn disconnect(&self, host: RawHandle) {
        let mut state = self.state();
        state.stats.disconnects += 1;
        state.give_back(host);
    }
}

pub fn vm(name: &str) -> String {
    format!("/vms/{name}/{name}.vmx")
}
