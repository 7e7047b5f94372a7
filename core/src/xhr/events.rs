//! Progress events and listener bookkeeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::state::ReadyState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XhrEventKind {
    LoadStart,
    ReadyStateChange,
    Progress,
    Load,
    Error,
    Abort,
    Timeout,
    LoadEnd,
}

impl XhrEventKind {
    pub const ALL: [XhrEventKind; 8] = [
        XhrEventKind::LoadStart,
        XhrEventKind::ReadyStateChange,
        XhrEventKind::Progress,
        XhrEventKind::Load,
        XhrEventKind::Error,
        XhrEventKind::Abort,
        XhrEventKind::Timeout,
        XhrEventKind::LoadEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            XhrEventKind::LoadStart => "loadstart",
            XhrEventKind::ReadyStateChange => "readystatechange",
            XhrEventKind::Progress => "progress",
            XhrEventKind::Load => "load",
            XhrEventKind::Error => "error",
            XhrEventKind::Abort => "abort",
            XhrEventKind::Timeout => "timeout",
            XhrEventKind::LoadEnd => "loadend",
        }
    }
}

impl fmt::Display for XhrEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhrEvent {
    pub kind: XhrEventKind,
    /// State at dispatch time.
    pub ready_state: ReadyState,
    pub loaded: u64,
    pub total: u64,
    pub length_computable: bool,
}

pub type XhrListener = Arc<dyn Fn(&XhrEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XhrListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    entries: Mutex<Vec<(XhrListenerId, XhrEventKind, XhrListener)>>,
    next: AtomicU64,
}

impl Listeners {
    pub(crate) fn add(&self, kind: XhrEventKind, listener: XhrListener) -> XhrListenerId {
        let id = XhrListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, kind, listener));
        id
    }

    pub(crate) fn remove(&self, id: XhrListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _, _)| *existing != id);
        entries.len() != before
    }

    /// Runs the listeners for `event.kind` in registration order, with no
    /// lock held so they may call back into the request object.
    pub(crate) fn dispatch(&self, event: &XhrEvent) {
        let targets: Vec<XhrListener> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in targets {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: XhrEventKind) -> XhrEvent {
        XhrEvent {
            kind,
            ready_state: ReadyState::Done,
            loaded: 0,
            total: 0,
            length_computable: false,
        }
    }

    #[test]
    fn dispatch_filters_by_kind() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        listeners.add(
            XhrEventKind::Load,
            Arc::new(move |e: &XhrEvent| log.lock().push(e.kind)),
        );
        listeners.dispatch(&event(XhrEventKind::Error));
        listeners.dispatch(&event(XhrEventKind::Load));
        assert_eq!(*seen.lock(), vec![XhrEventKind::Load]);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(0));
        let count = seen.clone();
        let id = listeners.add(XhrEventKind::Abort, Arc::new(move |_: &XhrEvent| *count.lock() += 1));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.dispatch(&event(XhrEventKind::Abort));
        assert_eq!(*seen.lock(), 0);
    }
}
