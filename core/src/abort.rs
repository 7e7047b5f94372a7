//! Cancellation tokens and the caller/timeout merger.
//!
//! # Design
//! `AbortSignal` is a clonable, one-shot token. Triggering it runs every
//! registered listener exactly once and wakes every task awaiting
//! `cancelled()`. Listeners registered after the trigger are refused, so a
//! pre-aborted signal never accumulates callbacks.
//!
//! `merge_signals` combines a caller-supplied token with an internally
//! derived timeout token. Zero or one input is passed through untouched; two
//! inputs produce a fresh token fed by one listener per input, and the
//! returned `SignalCleanup` removes those listeners when the request settles.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{Result, TunnelError};

/// Why a signal was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Explicit `abort()` by the owner of the controller.
    Aborted,
    /// A timeout token fired.
    TimedOut,
    /// Caller-defined reason.
    Other(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Aborted => write!(f, "the operation was aborted"),
            AbortReason::TimedOut => write!(f, "the operation timed out"),
            AbortReason::Other(msg) => write!(f, "{msg}"),
        }
    }
}

type Listener = Box<dyn FnOnce(&AbortReason) + Send>;

/// Identifies a listener registered with [`AbortSignal::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct SignalState {
    reason: Option<AbortReason>,
    listeners: Vec<(ListenerId, Listener)>,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    notify: Notify,
}

/// A one-shot cancellation token.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AbortSignal")
            .field("reason", &state.reason)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl AbortSignal {
    /// A signal that is already triggered with `reason`.
    pub fn aborted(reason: AbortReason) -> Self {
        let signal = AbortSignal::default();
        signal.trigger(reason);
        signal
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().reason.is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.inner.state.lock().reason.clone()
    }

    /// Registers `listener` to run when the signal fires.
    ///
    /// Returns `None` without registering anything if the signal has already
    /// fired.
    pub fn add_listener<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce(&AbortReason) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.reason.is_some() {
            return None;
        }
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        state.listeners.push((id, Box::new(listener)));
        Some(id)
    }

    /// Removes a listener. Returns false if it already ran or was removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Resolves once the signal has fired.
    pub async fn cancelled(&self) {
        loop {
            // Registered with Notify on creation, so a trigger between the
            // check and the await is not lost.
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    fn trigger(&self, reason: AbortReason) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        for (_, listener) in listeners {
            listener(&reason);
        }
        self.inner.notify.notify_waiters();
        true
    }
}

/// Owner side of an [`AbortSignal`].
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) -> bool {
        self.abort_with(AbortReason::Aborted)
    }

    /// Triggers the signal. Returns false if it had already fired.
    pub fn abort_with(&self, reason: AbortReason) -> bool {
        self.signal.trigger(reason)
    }
}

/// A signal that fires with [`AbortReason::TimedOut`] after a delay.
///
/// Dropping the value cancels the timer; the signal itself stays usable.
#[derive(Debug)]
pub struct TimeoutSignal {
    signal: AbortSignal,
    timer: JoinHandle<()>,
}

impl TimeoutSignal {
    /// Starts the timer. Must be called inside a tokio runtime.
    pub fn start(after: Duration) -> Self {
        let controller = AbortController::new();
        let signal = controller.signal();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            controller.abort_with(AbortReason::TimedOut);
        });
        Self { signal, timer }
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn fired(&self) -> bool {
        self.signal.reason() == Some(AbortReason::TimedOut)
    }
}

impl Drop for TimeoutSignal {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Removes the listeners a merge registered. Idempotent; also runs on drop.
#[derive(Default)]
pub struct SignalCleanup {
    registrations: Mutex<Vec<(AbortSignal, ListenerId)>>,
}

impl fmt::Debug for SignalCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalCleanup")
            .field("pending", &self.registrations.lock().len())
            .finish()
    }
}

impl SignalCleanup {
    pub fn run(&self) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for (signal, id) in registrations {
            signal.remove_listener(id);
        }
    }
}

impl Drop for SignalCleanup {
    fn drop(&mut self) {
        self.run();
    }
}

/// The effective token produced by [`merge_signals`].
#[derive(Debug, Default)]
pub struct MergedSignal {
    pub signal: Option<AbortSignal>,
    pub cleanup: SignalCleanup,
}

/// Combines a caller token and an internal token into one effective token.
pub fn merge_signals(caller: Option<&AbortSignal>, internal: Option<&AbortSignal>) -> MergedSignal {
    let (a, b) = match (caller, internal) {
        (None, None) => return MergedSignal::default(),
        (Some(only), None) | (None, Some(only)) => {
            return MergedSignal {
                signal: Some(only.clone()),
                cleanup: SignalCleanup::default(),
            }
        }
        (Some(a), Some(b)) => (a, b),
    };

    for input in [a, b] {
        if let Some(reason) = input.reason() {
            return MergedSignal {
                signal: Some(AbortSignal::aborted(reason)),
                cleanup: SignalCleanup::default(),
            };
        }
    }

    let controller = AbortController::new();
    let merged = controller.signal();
    let cleanup = SignalCleanup::default();
    for input in [a, b] {
        let forward = controller.clone();
        let registered = input.add_listener(move |reason| {
            forward.abort_with(reason.clone());
        });
        match registered {
            Some(id) => cleanup.registrations.lock().push((input.clone(), id)),
            // Fired between the pre-check and registration.
            None => {
                if let Some(reason) = input.reason() {
                    controller.abort_with(reason);
                }
            }
        }
    }

    MergedSignal {
        signal: Some(merged),
        cleanup,
    }
}

/// Drives `future` until it completes or `signal` fires, whichever is first.
///
/// A signal that has already fired rejects without polling `future`.
pub async fn race<F, T>(signal: Option<&AbortSignal>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(signal) = signal else {
        return future.await;
    };
    if let Some(reason) = signal.reason() {
        return Err(TunnelError::from_abort(reason));
    }
    tokio::select! {
        biased;
        _ = signal.cancelled() => {
            Err(TunnelError::from_abort(signal.reason().unwrap_or(AbortReason::Aborted)))
        }
        result = future => result,
    }
}

/// Attributes a failure to the timeout or abort that caused it, if any.
pub fn settle_error(err: TunnelError, signal: Option<&AbortSignal>, timeout: Option<&TimeoutSignal>) -> TunnelError {
    if timeout.is_some_and(TimeoutSignal::fired) {
        return TunnelError::TimedOut;
    }
    match signal.and_then(AbortSignal::reason) {
        Some(reason) => TunnelError::from_abort(reason),
        None => err,
    }
}
