//! Single-use completion signal between the shutdown handler and the event
//! loop.
//!
//! [`CompletionSignal::complete`] consumes the signal, so a cycle can be
//! reported complete at most once. Once a [`CompletionWatch`] has observed
//! completion it keeps reporting it.

use tokio::sync::oneshot::{self, error::TryRecvError};

/// Create a connected signal/watch pair.
#[must_use]
pub fn completion_channel<T>() -> (CompletionSignal<T>, CompletionWatch<T>) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSignal { tx },
        CompletionWatch {
            state: WatchState::Pending(rx),
        },
    )
}

/// Sending half. Consumed by [`CompletionSignal::complete`].
#[derive(Debug)]
pub struct CompletionSignal<T> {
    tx: oneshot::Sender<T>,
}

impl<T> CompletionSignal<T> {
    /// Mark the cycle complete and hand `value` to the watcher.
    pub fn complete(self, value: T) {
        if self.tx.send(value).is_err() {
            tracing::debug!("completion watcher already gone");
        }
    }
}

#[derive(Debug)]
enum WatchState<T> {
    Pending(oneshot::Receiver<T>),
    Completed(Option<T>),
}

/// Receiving half, polled by the event loop.
///
/// A signal dropped without calling `complete` also counts as completion,
/// with no value, so the loop can never wait on a handler that is gone.
#[derive(Debug)]
pub struct CompletionWatch<T> {
    state: WatchState<T>,
}

impl<T> CompletionWatch<T> {
    /// Returns `true` once the signal has fired or been dropped.
    pub fn is_complete(&mut self) -> bool {
        if let WatchState::Pending(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(value) => self.state = WatchState::Completed(Some(value)),
                Err(TryRecvError::Closed) => self.state = WatchState::Completed(None),
                Err(TryRecvError::Empty) => return false,
            }
        }
        true
    }

    /// Wait for completion and take the completed value.
    ///
    /// Returns `None` if the signal was dropped without completing, or if
    /// the value was already taken.
    pub async fn wait(&mut self) -> Option<T> {
        if let WatchState::Pending(rx) = &mut self.state {
            let value = rx.await.ok();
            self.state = WatchState::Completed(value);
        }
        match &mut self.state {
            WatchState::Completed(value) => value.take(),
            WatchState::Pending(_) => None,
        }
    }
}
