//! Debug and session-end entry paths of the daemon.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autohalt_core::ShutdownPhase;
use autohalt_daemon::{run, run_until_session_end, DaemonError, SessionEvent, SessionEvents};
use autohalt_executor::{
    CycleOutcome, DiscoverySink, HostConfig, HostError, HostService, JobProperty, PowerOpMode, RawHandle,
    ServiceProvider, ShutdownPipeline,
};

#[derive(Clone, Copy)]
enum OnConnect {
    Refuse,
    RefuseAfter(Duration),
    Panic,
}

/// A host that never accepts a connection, so every cycle ends at connect.
struct RefusingHost {
    on_connect: OnConnect,
    connects: AtomicUsize,
    next: AtomicUsize,
}

impl RefusingHost {
    fn new(on_connect: OnConnect) -> Arc<Self> {
        Arc::new(Self {
            on_connect,
            connects: AtomicUsize::new(0),
            next: AtomicUsize::new(1),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn handle(&self) -> RawHandle {
        RawHandle::new(self.next.fetch_add(1, Ordering::SeqCst) as u64)
    }
}

#[async_trait]
impl HostService for RefusingHost {
    fn connect(&self, _provider: ServiceProvider) -> RawHandle {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.handle()
    }

    fn find_running_vms(&self, _host: RawHandle, _sink: DiscoverySink) -> RawHandle {
        self.handle()
    }

    fn open_vm(&self, _host: RawHandle, _location: &str) -> RawHandle {
        self.handle()
    }

    fn power_off(&self, _vm: RawHandle, _mode: PowerOpMode) -> RawHandle {
        self.handle()
    }

    async fn wait(&self, _job: RawHandle, _property: JobProperty) -> Result<Option<RawHandle>, HostError> {
        match self.on_connect {
            OnConnect::Refuse => {}
            OnConnect::RefuseAfter(delay) => tokio::time::sleep(delay).await,
            OnConnect::Panic => panic!("host service crashed"),
        }
        Err(HostError::Unavailable {
            reason: "no hypervisor".to_owned(),
        })
    }

    fn release(&self, _handle: RawHandle) {}

    fn disconnect(&self, _host: RawHandle) {}
}

struct ScriptedEvents(VecDeque<SessionEvent>);

#[async_trait]
impl SessionEvents for ScriptedEvents {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.0.pop_front()
    }
}

fn pipeline(host: &Arc<RefusingHost>) -> Arc<ShutdownPipeline<RefusingHost>> {
    Arc::new(ShutdownPipeline::new(Arc::clone(host), HostConfig::default()))
}

fn assert_aborted_at_connect(outcome: &CycleOutcome) {
    assert!(
        matches!(outcome, CycleOutcome::Aborted { at: ShutdownPhase::Connecting, .. }),
        "expected an abort at connect, got {outcome:?}"
    );
}

#[tokio::test]
async fn debug_mode_runs_one_cycle_without_listening() {
    let host = RefusingHost::new(OnConnect::Refuse);
    let listened = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&listened);

    let result = run(pipeline(&host), true, move |_pipeline| {
        flag.store(true, Ordering::SeqCst);
        async { Err(DaemonError::EventSourceClosed) }
    })
    .await;

    let report = result.unwrap_or_else(|e| panic!("debug cycle failed: {e}"));
    assert_aborted_at_connect(&report.outcome);
    assert_eq!(host.connects(), 1, "exactly one cycle");
    assert!(!listened.load(Ordering::SeqCst), "debug mode must not install a listener");
}

#[tokio::test]
async fn normal_mode_waits_for_the_session_to_end() {
    let host = RefusingHost::new(OnConnect::Refuse);
    let result = run(pipeline(&host), false, |pipeline| async move {
        let mut events = ScriptedEvents(VecDeque::from([SessionEvent::Logoff]));
        run_until_session_end(pipeline, &mut events).await
    })
    .await;

    let report = result.unwrap_or_else(|e| panic!("cycle failed: {e}"));
    assert_aborted_at_connect(&report.outcome);
    assert_eq!(host.connects(), 1);
}

#[tokio::test]
async fn listener_failure_is_reported() {
    let host = RefusingHost::new(OnConnect::Refuse);
    let result = run(pipeline(&host), false, |_pipeline| async {
        Err(DaemonError::ListenerInstall(std::io::Error::other("no session")))
    })
    .await;

    assert!(matches!(result, Err(DaemonError::ListenerInstall(_))));
    assert_eq!(host.connects(), 0, "no cycle without a session-end event");
}

#[tokio::test]
async fn panicking_cycle_reports_handler_stopped() {
    let host = RefusingHost::new(OnConnect::Panic);
    let mut events = ScriptedEvents(VecDeque::from([SessionEvent::Shutdown]));

    let result = run_until_session_end(pipeline(&host), &mut events).await;
    assert!(matches!(result, Err(DaemonError::HandlerStopped)), "got {result:?}");
    assert_eq!(host.connects(), 1);
}

#[tokio::test]
async fn events_during_the_cycle_are_drained_without_a_second_cycle() {
    let host = RefusingHost::new(OnConnect::RefuseAfter(Duration::from_millis(100)));
    let mut events = ScriptedEvents(VecDeque::from([
        SessionEvent::Terminate,
        SessionEvent::Hangup,
        SessionEvent::Terminate,
    ]));

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_until_session_end(pipeline(&host), &mut events),
    )
    .await
    .unwrap_or_else(|_| panic!("event loop did not finish"));

    let report = result.unwrap_or_else(|e| panic!("cycle failed: {e}"));
    assert_aborted_at_connect(&report.outcome);
    assert_eq!(host.connects(), 1, "later events must not start another cycle");
    assert!(events.0.is_empty(), "events during the cycle are read and logged");
}
