//! Windows session-end listener.
//!
//! Windows announces logoff and shutdown to top-level windows with
//! `WM_QUERYENDSESSION` followed by `WM_ENDSESSION`; console control events
//! for logoff and shutdown only reach services. The daemon therefore owns a
//! hidden top-level window and pumps its messages on a dedicated thread.
//! `WM_ENDSESSION` runs the whole shutdown cycle before the window
//! procedure returns, which holds the session open until every VM is off.

use std::cell::RefCell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use autohalt_executor::{completion_channel, CycleReport, HostService, ShutdownPipeline};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use windows_sys::Win32::Foundation::{GetLastError, ERROR_CLASS_ALREADY_EXISTS, HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, PostMessageW, RegisterClassExW,
    TranslateMessage, ENDSESSION_LOGOFF, MSG, WM_ENDSESSION, WM_NULL, WNDCLASSEXW,
};

use crate::{DaemonError, SessionEvent};

/// Window class and title of the hidden session window.
pub const WINDOW_CLASS: &str = "AutohaltSessionWindow";

type EndSessionHandler = Box<dyn FnMut(SessionEvent)>;

thread_local! {
    static ON_END_SESSION: RefCell<Option<EndSessionHandler>> = const { RefCell::new(None) };
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

/// A hidden top-level window owned by the thread that created it.
struct SessionWindow {
    hwnd: HWND,
}

impl SessionWindow {
    fn create() -> Result<Self, DaemonError> {
        let class_name = wide(WINDOW_CLASS);
        // SAFETY: a null module name yields the handle of the running executable.
        let instance = unsafe { GetModuleHandleW(ptr::null()) };

        // SAFETY: WNDCLASSEXW is a plain C struct; all-zero is a valid empty value.
        let mut class: WNDCLASSEXW = unsafe { std::mem::zeroed() };
        class.cbSize = u32::try_from(std::mem::size_of::<WNDCLASSEXW>()).unwrap_or(u32::MAX);
        class.lpfnWndProc = Some(window_proc);
        class.hInstance = instance;
        class.lpszClassName = class_name.as_ptr();

        // SAFETY: `class` and the class name it points to outlive the call.
        let atom = unsafe { RegisterClassExW(&class) };
        if atom == 0 {
            // SAFETY: reads the calling thread's last error code.
            if unsafe { GetLastError() } != ERROR_CLASS_ALREADY_EXISTS {
                return Err(DaemonError::ListenerInstall(io::Error::last_os_error()));
            }
        }
        tracing::info!(class = WINDOW_CLASS, "window class registered");

        // Not a message-only window: those never see the session-end broadcast.
        // SAFETY: the class was registered above and the strings outlive the call.
        let hwnd = unsafe {
            CreateWindowExW(
                0,
                class_name.as_ptr(),
                class_name.as_ptr(),
                0,
                0,
                0,
                0,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                instance,
                ptr::null(),
            )
        };
        if hwnd.is_null() {
            return Err(DaemonError::ListenerInstall(io::Error::last_os_error()));
        }
        tracing::info!(hwnd = ?hwnd, "session window created");
        Ok(Self { hwnd })
    }

    /// Retrieve and dispatch one message. Returns `false` on `WM_QUIT`.
    fn dispatch_next(&self) -> bool {
        // SAFETY: MSG is a plain C struct filled in by GetMessageW.
        let mut msg: MSG = unsafe { std::mem::zeroed() };
        // SAFETY: `msg` is valid for writes and `hwnd` belongs to this thread.
        match unsafe { GetMessageW(&mut msg, self.hwnd, 0, 0) } {
            0 => false,
            -1 => {
                tracing::error!(error = %io::Error::last_os_error(), "failed to get message");
                true
            }
            _ => {
                // SAFETY: `msg` was just filled in by GetMessageW.
                unsafe {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
                true
            }
        }
    }
}

impl Drop for SessionWindow {
    fn drop(&mut self) {
        // SAFETY: the window was created by this thread and is destroyed once.
        unsafe { DestroyWindow(self.hwnd) };
    }
}

unsafe extern "system" fn window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    tracing::trace!(msg, wparam, lparam, "message received");
    if msg == WM_ENDSESSION && wparam != 0 {
        let event = if is_logoff(lparam) {
            SessionEvent::Logoff
        } else {
            SessionEvent::Shutdown
        };
        let handler = ON_END_SESSION.with(|cell| cell.borrow_mut().take());
        if let Some(mut handler) = handler {
            handler(event);
            ON_END_SESSION.with(|cell| *cell.borrow_mut() = Some(handler));
        }
        // Wake the pump so it sees the completion.
        // SAFETY: `hwnd` is the live window this procedure was called for.
        unsafe { PostMessageW(hwnd, WM_NULL, 0, 0) };
        return 0;
    }
    // SAFETY: forwards the arguments the system passed in.
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn is_logoff(lparam: LPARAM) -> bool {
    (lparam as u32) & ENDSESSION_LOGOFF != 0
}

/// Create the window on this thread and pump messages until the shutdown
/// cycle has completed. Blocks; `runtime` drives the cycle.
fn pump_until_session_end<S>(pipeline: &Arc<ShutdownPipeline<S>>, runtime: &Handle) -> Result<CycleReport, DaemonError>
where
    S: HostService + ?Sized + 'static,
{
    let window = SessionWindow::create()?;
    let (signal, mut watch) = completion_channel();

    let mut signal = Some(signal);
    let pipeline = Arc::clone(pipeline);
    let cycle_runtime = runtime.clone();
    let handler: EndSessionHandler = Box::new(move |event| {
        let Some(signal) = signal.take() else {
            tracing::info!(%event, "shutdown already done, ignoring event");
            return;
        };
        tracing::debug!(%event, "session event received");
        tracing::info!("session is ending, shutting down all running VMs");
        // A panic must not unwind into the window procedure. Dropping the
        // signal still completes the watch.
        let cycle = panic::catch_unwind(AssertUnwindSafe(|| cycle_runtime.block_on(pipeline.run_cycle())));
        match cycle {
            Ok(report) => signal.complete(report),
            Err(_) => tracing::error!("shutdown handler panicked"),
        }
    });
    ON_END_SESSION.with(|cell| *cell.borrow_mut() = Some(handler));

    tracing::info!("waiting for the session to end");
    while !watch.is_complete() {
        if !window.dispatch_next() {
            break;
        }
    }
    ON_END_SESSION.with(|cell| *cell.borrow_mut() = None);
    drop(window);

    runtime.block_on(watch.wait()).ok_or(DaemonError::HandlerStopped)
}

/// Run the session window on its own thread and wait for its report.
///
/// # Errors
/// Returns [`DaemonError::ListenerInstall`] if the thread, the window class
/// or the window cannot be created, and [`DaemonError::HandlerStopped`] if
/// the cycle never reported.
pub async fn run_until_session_end<S>(pipeline: Arc<ShutdownPipeline<S>>) -> Result<CycleReport, DaemonError>
where
    S: HostService + ?Sized + 'static,
{
    let runtime = Handle::current();
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("session-window".to_owned())
        .spawn(move || {
            let _ = tx.send(pump_until_session_end(&pipeline, &runtime));
        })
        .map_err(DaemonError::ListenerInstall)?;
    rx.await.unwrap_or(Err(DaemonError::HandlerStopped))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use autohalt_core::ShutdownPhase;
    use autohalt_executor::{HostConfig, VmrunService};
    use windows_sys::Win32::UI::WindowsAndMessaging::{FindWindowW, SendMessageW};

    use super::*;

    #[test]
    fn logoff_flag_is_read_from_lparam() {
        #[allow(clippy::cast_possible_wrap)]
        let logoff = ENDSESSION_LOGOFF as LPARAM;
        assert!(is_logoff(logoff));
        assert!(!is_logoff(0));
    }

    #[test]
    fn end_session_message_runs_one_cycle() {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => panic!("runtime: {e}"),
        };
        let config = HostConfig::new(r"C:\nonexistent\autohalt-test\vmrun.exe".into());
        let pipeline = Arc::new(ShutdownPipeline::new(Arc::new(VmrunService::from_config(&config)), config));
        let pump = runtime.spawn(run_until_session_end(pipeline));

        let class_name = wide(WINDOW_CLASS);
        let deadline = Instant::now() + Duration::from_secs(10);
        let hwnd = loop {
            // SAFETY: the class name is a valid NUL-terminated wide string.
            let hwnd = unsafe { FindWindowW(class_name.as_ptr(), ptr::null()) };
            if !hwnd.is_null() {
                break hwnd;
            }
            assert!(Instant::now() < deadline, "session window never appeared");
            std::thread::sleep(Duration::from_millis(20));
        };
        // SAFETY: SendMessageW blocks until the owning thread has handled it.
        unsafe { SendMessageW(hwnd, WM_ENDSESSION, 1, 0) };

        let report = match runtime.block_on(pump) {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => panic!("session window failed: {e}"),
            Err(e) => panic!("pump task failed: {e}"),
        };
        assert_eq!(report.phase, ShutdownPhase::Idle, "unreachable host aborts at connect");
    }
}
