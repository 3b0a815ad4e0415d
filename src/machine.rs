//! Call/line transition table.
//!
//! Transitions are pure: each handler reads a [`ModemStatus`] snapshot and
//! returns the [`Effect`]s the coordinator in [`modem`](crate::modem) must
//! execute, in order. Handle acquisition, release and notifications all
//! happen there, under the lock each effect needs.

use crate::backend::{LineErrorCode, RequestId};
use crate::error::ErrorKind;
use crate::signaling::{CallProgress, LineDeviceChange, SignalingEvent};
use crate::state::{CallState, DisconnectReason, LineState, ModemStatus};

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Record the call state and notify.
    SetCallState(CallState),
    /// Record the line state and notify.
    SetLineState(LineState),
    /// Record why the call ended.
    SetDisconnectReason(DisconnectReason),
    /// Obtain the comm handle, start the data path, then mark the call connected.
    AcquireComm,
    /// Release call, line and comm handle.
    Teardown,
    /// Teardown, then release the subsystem session.
    Shutdown,
    /// Store and notify an error.
    RaiseError(ErrorKind, Option<LineErrorCode>),
    /// Forward a successful asynchronous reply.
    EmitReply { request_id: RequestId, result: u32 },
}

/// Transitions for one decoded signaling event that passed the ownership check.
pub(crate) fn on_signaling_event(status: &ModemStatus, event: &SignalingEvent) -> Vec<Effect> {
    match *event {
        SignalingEvent::CallStateChanged { progress, .. } => on_call_progress(status, progress),
        SignalingEvent::LineClosed { .. } => {
            vec![Effect::SetLineState(LineState::Closed), Effect::Teardown]
        }
        SignalingEvent::LineDeviceStateChanged { change, .. } => on_line_change(change),
        SignalingEvent::AsyncReplyCompleted { request_id, result } => {
            if result != 0 {
                vec![
                    Effect::RaiseError(ErrorKind::LineReplyError, Some(LineErrorCode(result))),
                    Effect::Teardown,
                ]
            } else {
                vec![Effect::EmitReply { request_id, result }]
            }
        }
        SignalingEvent::LineCreated { .. } => Vec::new(),
    }
}

fn on_call_progress(status: &ModemStatus, progress: CallProgress) -> Vec<Effect> {
    match progress {
        CallProgress::Dialing => vec![Effect::SetCallState(CallState::Dialing)],
        CallProgress::Busy => vec![Effect::SetCallState(CallState::Busy), Effect::Teardown],
        CallProgress::Idle => vec![Effect::SetCallState(CallState::Idle), Effect::Teardown],
        CallProgress::SpecialInfo => {
            vec![Effect::SetCallState(CallState::CannotDial), Effect::Teardown]
        }
        CallProgress::Disconnected(reason) => vec![
            Effect::SetDisconnectReason(reason),
            Effect::SetCallState(CallState::Disconnected),
            Effect::Teardown,
        ],
        // Modems may repeat CONNECTED; only the first one sets up the data path.
        CallProgress::Connected if status.call == CallState::Connected => Vec::new(),
        CallProgress::Connected => vec![Effect::AcquireComm],
        CallProgress::Other(_) => Vec::new(),
    }
}

fn on_line_change(change: LineDeviceChange) -> Vec<Effect> {
    match change {
        LineDeviceChange::Reinit { reason: 0 } => vec![
            Effect::SetLineState(LineState::Reinitialization),
            Effect::Shutdown,
        ],
        LineDeviceChange::Reinit { .. } => Vec::new(),
        LineDeviceChange::OutOfService => vec![
            Effect::SetLineState(LineState::OutOfService),
            Effect::Teardown,
        ],
        LineDeviceChange::Disconnected => vec![
            Effect::SetLineState(LineState::Disconnected),
            Effect::Teardown,
        ],
        LineDeviceChange::Maintenance => vec![
            Effect::SetLineState(LineState::Maintenance),
            Effect::Teardown,
        ],
        LineDeviceChange::Removed => vec![
            Effect::SetLineState(LineState::DeviceRemoved),
            Effect::Teardown,
        ],
        LineDeviceChange::Other(_) => Vec::new(),
    }
}

/// A fatal poll result takes the session down.
pub(crate) fn on_fatal_poll(code: LineErrorCode) -> Vec<Effect> {
    vec![
        Effect::Shutdown,
        Effect::RaiseError(ErrorKind::OperationError, Some(code)),
    ]
}

/// State resets after an explicit hang-up.
pub(crate) fn on_end_connection() -> Vec<Effect> {
    vec![
        Effect::SetCallState(CallState::Default),
        Effect::SetLineState(LineState::Closed),
        Effect::SetDisconnectReason(DisconnectReason::ByFunction),
    ]
}

/// Call state after teardown released the handles.
///
/// A call still marked connected (or dialing) lost its data channel, so it
/// falls back to `Default`; terminal states reported by the subsystem stay.
pub(crate) fn call_state_after_teardown(status: &ModemStatus) -> Option<CallState> {
    match status.call {
        CallState::Connected | CallState::Dialing => Some(CallState::Default),
        _ => None,
    }
}

/// Line state after teardown closed the line handle.
pub(crate) fn line_state_after_teardown(status: &ModemStatus) -> Option<LineState> {
    match status.line {
        LineState::Opened => Some(LineState::Closed),
        _ => None,
    }
}

/// Whether teardown still has to close the line handle.
///
/// After `LINE_CLOSE` the subsystem already invalidated it.
pub(crate) fn line_needs_close(status: &ModemStatus) -> bool {
    status.line != LineState::Closed
}
