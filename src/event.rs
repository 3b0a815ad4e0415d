//! Notifications delivered through [`ModemEventStream`](crate::ModemEventStream)

use crate::backend::RequestId;
use crate::error::ErrorKind;
use crate::state::{CallState, LineState, TapiState};
use std::fmt;

/// Something the application may want to react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModemEvent {
    /// An operation failed. The same kind is stored until
    /// [`clear_error`](crate::TapiModem::clear_error).
    Error(ErrorKind),
    /// The subsystem session came up or went away.
    TapiStateChanged(TapiState),
    /// The call moved to a new state.
    CallStateChanged(CallState),
    /// The line moved to a new state.
    LineStateChanged(LineState),
    /// A data channel is open; reads and writes may start.
    Connected,
    /// Call, line and data channel were released.
    Disconnected,
    /// Pending writes finished, transferring this many bytes in total.
    BytesWritten(u64),
    /// New bytes were appended to the inbound buffer.
    ReadyRead,
    /// An asynchronous request completed successfully.
    LineReply { request_id: RequestId, result: u32 },
    /// The application fell behind and notifications were dropped.
    ///
    /// Delivered once per overflow episode, before the next notification
    /// that fits. See [`TapiModem::dropped_event_count`](crate::TapiModem::dropped_event_count).
    QueueOverflow,
}

impl ModemEvent {
    /// Short lowercase name of the notification.
    pub fn name(&self) -> &'static str {
        match self {
            ModemEvent::Error(_) => "error",
            ModemEvent::TapiStateChanged(_) => "tapi-state-changed",
            ModemEvent::CallStateChanged(_) => "call-state-changed",
            ModemEvent::LineStateChanged(_) => "line-state-changed",
            ModemEvent::Connected => "connected",
            ModemEvent::Disconnected => "disconnected",
            ModemEvent::BytesWritten(_) => "bytes-written",
            ModemEvent::ReadyRead => "ready-read",
            ModemEvent::LineReply { .. } => "line-reply",
            ModemEvent::QueueOverflow => "queue-overflow",
        }
    }

    /// Whether this is a state-change notification.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            ModemEvent::TapiStateChanged(_)
                | ModemEvent::CallStateChanged(_)
                | ModemEvent::LineStateChanged(_)
        )
    }
}

impl fmt::Display for ModemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemEvent::Error(kind) => write!(f, "error: {}", kind),
            ModemEvent::TapiStateChanged(state) => write!(f, "tapi-state-changed: {}", state),
            ModemEvent::CallStateChanged(state) => write!(f, "call-state-changed: {}", state),
            ModemEvent::LineStateChanged(state) => write!(f, "line-state-changed: {}", state),
            ModemEvent::BytesWritten(n) => write!(f, "bytes-written: {}", n),
            ModemEvent::LineReply { request_id, result } => {
                write!(f, "line-reply: request {} result {:#x}", request_id.0, result)
            }
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_payload() {
        assert_eq!(
            ModemEvent::CallStateChanged(CallState::CannotDial).to_string(),
            "call-state-changed: cannot-dial"
        );
        assert_eq!(
            ModemEvent::Error(ErrorKind::CommWriteError).to_string(),
            "error: comm-write-error"
        );
        assert_eq!(ModemEvent::BytesWritten(42).to_string(), "bytes-written: 42");
        assert_eq!(
            ModemEvent::LineReply {
                request_id: RequestId(7),
                result: 0
            }
            .to_string(),
            "line-reply: request 7 result 0x0"
        );
    }

    #[test]
    fn test_display_without_payload() {
        assert_eq!(ModemEvent::Connected.to_string(), "connected");
        assert_eq!(ModemEvent::ReadyRead.to_string(), "ready-read");
        assert_eq!(ModemEvent::QueueOverflow.to_string(), "queue-overflow");
    }

    #[test]
    fn test_state_change_classification() {
        assert!(ModemEvent::LineStateChanged(LineState::Opened).is_state_change());
        assert!(ModemEvent::TapiStateChanged(TapiState::Initialized).is_state_change());
        assert!(!ModemEvent::Disconnected.is_state_change());
        assert!(!ModemEvent::BytesWritten(1).is_state_change());
    }
}
