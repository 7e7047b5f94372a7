//! Lifecycle handle shared by an interceptor and its owner.
//!
//! `active` and `inactive` toggle freely; `restore()` is terminal and runs
//! the uninstall hook once.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Active,
    Inactive,
    Terminated,
}

const ACTIVE: u8 = 0;
const INACTIVE: u8 = 1;
const TERMINATED: u8 = 2;

type RestoreHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct HandleInner {
    state: AtomicU8,
    on_restore: Mutex<Vec<RestoreHook>>,
}

/// Clonable control handle; every clone sees the same state.
#[derive(Clone, Default)]
pub struct AdapterHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl AdapterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AdapterState {
        match self.inner.state.load(Ordering::Acquire) {
            ACTIVE => AdapterState::Active,
            INACTIVE => AdapterState::Inactive,
            _ => AdapterState::Terminated,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == AdapterState::Active
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == AdapterState::Terminated
    }

    /// Resumes interception. No-op once terminated.
    pub fn start(&self) {
        let _ = self
            .inner
            .state
            .compare_exchange(INACTIVE, ACTIVE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Pauses interception; new requests go native. No-op once terminated.
    pub fn stop(&self) {
        let _ = self
            .inner
            .state
            .compare_exchange(ACTIVE, INACTIVE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Terminates the adapter and runs the registered uninstall hooks.
    pub fn restore(&self) {
        if self.inner.state.swap(TERMINATED, Ordering::AcqRel) == TERMINATED {
            return;
        }
        let hooks = std::mem::take(&mut *self.inner.on_restore.lock());
        for hook in hooks {
            hook();
        }
    }

    /// Registers work to run on `restore()`. Runs immediately if the handle
    /// is already terminated.
    pub fn on_restore<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_terminated() {
            hook();
            return;
        }
        self.inner.on_restore.lock().push(Box::new(hook));
    }
}
