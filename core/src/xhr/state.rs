//! Ready states and the transition table of the stateful request object.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[repr(u8)]
pub enum ReadyState {
    #[default]
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Everything that can move a request between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Open,
    SetRequestHeader,
    Send,
    ReceiveHeaders,
    ReceiveBody,
    Finish,
    Fail,
    Abort,
}

/// The state `op` leads to from `(state, sent)`, or `None` if `op` is not
/// valid there.
///
/// `Abort` lands in `Done`; the caller drops to `Unsent` once the abort
/// events have been dispatched.
pub(crate) fn transition(state: ReadyState, sent: bool, op: Op) -> Option<ReadyState> {
    use ReadyState::*;
    match (op, state, sent) {
        (Op::Open, _, _) => Some(Opened),
        (Op::SetRequestHeader, Opened, false) => Some(Opened),
        (Op::Send, Opened, false) => Some(Opened),
        (Op::ReceiveHeaders, Opened, true) => Some(HeadersReceived),
        (Op::ReceiveBody, HeadersReceived, true) => Some(Loading),
        (Op::Finish, Loading, true) => Some(Done),
        (Op::Fail, Opened | HeadersReceived | Loading, true) => Some(Done),
        (Op::Abort, Opened | HeadersReceived | Loading, true) => Some(Done),
        _ => None,
    }
}

/// Whether the response type or MIME override may still change.
pub(crate) fn response_settings_mutable(state: ReadyState) -> bool {
    !matches!(state, ReadyState::Loading | ReadyState::Done)
}

/// Whether `withCredentials` may still change.
pub(crate) fn credentials_mutable(state: ReadyState, sent: bool) -> bool {
    matches!(state, ReadyState::Unsent | ReadyState::Opened) && !sent
}
