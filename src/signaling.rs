//! Signaling channel: pulling subsystem messages and decoding them into typed events

use crate::backend::{
    CallHandle, LineErrorCode, LineHandle, LineMessage, RequestId, SessionHandle, Telephony,
};
use crate::constants::*;
use crate::state::DisconnectReason;
use tracing::{trace, warn};

/// Result of one poll of the subsystem message queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A message was dequeued.
    Message(LineMessage),
    /// Nothing queued, or the session is already gone. Not an error.
    NoMessage,
    /// The subsystem is unusable; the session must be shut down.
    Fatal(LineErrorCode),
}

/// Dequeue one message, classifying failures into benign and fatal.
pub fn poll_signaling_event<T: Telephony + ?Sized>(
    api: &T,
    session: SessionHandle,
) -> PollOutcome {
    match api.poll_message(session) {
        Ok(message) => {
            trace!(
                "[SIGNAL] message {} device={:#x} p1={:#x} p2={:#x} p3={:#x}",
                message.message_id,
                message.device,
                message.param1,
                message.param2,
                message.param3
            );
            PollOutcome::Message(message)
        }
        Err(code) if code == LineErrorCode::INVALPOINTER || code == LineErrorCode::NOMEM => {
            warn!("[SIGNAL] fatal subsystem error while polling: {}", code);
            PollOutcome::Fatal(code)
        }
        Err(code) => {
            trace!("[SIGNAL] no message: {}", code);
            PollOutcome::NoMessage
        }
    }
}

/// Call progress carried by `LINE_CALLSTATE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallProgress {
    Dialing,
    Busy,
    Idle,
    /// Special information tones: the number cannot be reached.
    SpecialInfo,
    Disconnected(DisconnectReason),
    Connected,
    /// Any other `LINECALLSTATE_*` value; ignored.
    Other(u32),
}

impl CallProgress {
    fn decode(state: u32, detail: u32) -> Self {
        match state {
            LINECALLSTATE_DIALING => Self::Dialing,
            LINECALLSTATE_BUSY => Self::Busy,
            LINECALLSTATE_IDLE => Self::Idle,
            LINECALLSTATE_SPECIALINFO => Self::SpecialInfo,
            LINECALLSTATE_DISCONNECTED => {
                Self::Disconnected(DisconnectReason::from_disconnect_mode(detail))
            }
            LINECALLSTATE_CONNECTED => Self::Connected,
            other => Self::Other(other),
        }
    }
}

/// Line device change carried by `LINE_LINEDEVSTATE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDeviceChange {
    /// The subsystem is restarting; a zero reason means every client must
    /// shut down.
    Reinit { reason: u32 },
    OutOfService,
    Disconnected,
    Maintenance,
    Removed,
    /// Any other `LINEDEVSTATE_*` value; ignored.
    Other(u32),
}

impl LineDeviceChange {
    fn decode(state: u32, reason: u32) -> Self {
        match state {
            LINEDEVSTATE_REINIT => Self::Reinit { reason },
            LINEDEVSTATE_OUTOFSERVICE => Self::OutOfService,
            LINEDEVSTATE_DISCONNECTED => Self::Disconnected,
            LINEDEVSTATE_MAINTENANCE => Self::Maintenance,
            LINEDEVSTATE_REMOVED => Self::Removed,
            other => Self::Other(other),
        }
    }
}

/// Typed subsystem event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Call progress on `call`.
    CallStateChanged {
        call: CallHandle,
        progress: CallProgress,
    },
    /// The line was closed under us.
    LineClosed { line: LineHandle },
    /// The line device changed state.
    LineDeviceStateChanged {
        line: LineHandle,
        change: LineDeviceChange,
    },
    /// An asynchronous request finished; a zero result means success.
    AsyncReplyCompleted { request_id: RequestId, result: u32 },
    /// A new line device appeared. Ignored.
    LineCreated { device_id: u32 },
}

impl SignalingEvent {
    /// Decode a raw message. Unknown message identifiers yield `None`.
    pub fn decode(message: &LineMessage) -> Option<Self> {
        let p1 = message.param1 as u32;
        let p2 = message.param2 as u32;
        match message.message_id {
            LINE_CALLSTATE => Some(Self::CallStateChanged {
                call: CallHandle(message.device),
                progress: CallProgress::decode(p1, p2),
            }),
            LINE_CLOSE => Some(Self::LineClosed {
                line: LineHandle(message.device),
            }),
            LINE_LINEDEVSTATE => Some(Self::LineDeviceStateChanged {
                line: LineHandle(message.device),
                change: LineDeviceChange::decode(p1, p2),
            }),
            LINE_REPLY => Some(Self::AsyncReplyCompleted {
                request_id: RequestId(p1),
                result: p2,
            }),
            LINE_CREATE => Some(Self::LineCreated { device_id: p1 }),
            _ => None,
        }
    }

    /// Ownership check against the handles currently tracked.
    ///
    /// Messages about another call or line (including stale ones arriving
    /// after teardown cleared the handle) are not ours. Replies and device
    /// announcements are not addressed to a handle.
    pub fn is_addressed_to(&self, call: Option<CallHandle>, line: Option<LineHandle>) -> bool {
        match self {
            Self::CallStateChanged { call: target, .. } => call == Some(*target),
            Self::LineClosed { line: target }
            | Self::LineDeviceStateChanged { line: target, .. } => line == Some(*target),
            Self::AsyncReplyCompleted { .. } | Self::LineCreated { .. } => true,
        }
    }
}
