//! Error types for the modem wrapper

use crate::backend::LineErrorCode;
use std::fmt;
use thiserror::Error;

/// Error returned when parsing an invalid error kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseErrorKindError(pub String);

impl fmt::Display for ParseErrorKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error kind: {}", self.0)
    }
}

impl std::error::Error for ParseErrorKindError {}

define_code_enum! {
    error_type: ParseErrorKindError,
    /// Category of a subsystem or comm-port failure, delivered with
    /// [`ModemEvent::Error`](crate::ModemEvent::Error).
    ///
    /// These describe failed operations, not what happens on the line; watch
    /// call and line state changes for that.
    pub enum ErrorKind {
        InitError = 0x01 => "init-error",
        CommAquireError = 0x02 => "comm-aquire-error",
        LineReplyError = 0x03 => "line-reply-error",
        CallStatusAquireError = 0x04 => "call-status-aquire-error",
        CallDeallocationError = 0x05 => "call-deallocation-error",
        NoDeviceFoundError = 0x06 => "no-device-found-error",
        NegotiationError = 0x07 => "negotiation-error",
        LineOpenError = 0x08 => "line-open-error",
        CallMakeError = 0x09 => "call-make-error",
        CommWriteError = 0x0A => "comm-write-error",
        LineDeallocationError = 0x0B => "line-deallocation-error",
        CommReadError = 0x0C => "comm-read-error",
        OperationError = 0xFF => "operation-error",
    }
}

impl ErrorKind {
    /// Whether this failure takes the whole subsystem session down rather
    /// than only the current call.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::OperationError
                | Self::CallStatusAquireError
                | Self::CallDeallocationError
                | Self::LineDeallocationError
        )
    }
}

/// Errors returned by [`TapiModem`](crate::TapiModem) operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModemError {
    /// A telephony subsystem call failed.
    #[error("{kind}: subsystem returned {code}")]
    Subsystem {
        /// Error category, also delivered as a notification.
        kind: ErrorKind,
        /// Raw `LINEERR_*` code.
        code: LineErrorCode,
    },

    /// A comm-port operation failed.
    #[error("{kind}: {source}")]
    Comm {
        /// Error category, also delivered as a notification.
        kind: ErrorKind,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `initialize` has not completed.
    #[error("telephony subsystem is not initialized")]
    NotInitialized,

    /// No comm handle is open.
    #[error("no data connection")]
    NotConnected,
}

impl ModemError {
    /// Error category, if the failure maps to one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ModemError::Subsystem { kind, .. } | ModemError::Comm { kind, .. } => Some(*kind),
            ModemError::NotInitialized | ModemError::NotConnected => None,
        }
    }
}

/// Result type alias for modem operations
pub type ModemResult<T> = Result<T, ModemError>;
