//! State enumerations tracked for the subsystem, the line and the call.
//!
//! Each enum carries the numeric code reported by [`as_number`](TapiState::as_number)
//! and a lowercase name used by `Display` / `FromStr`.

use crate::constants::*;
use crate::error::ErrorKind;
use std::fmt;

/// Error returned when parsing an invalid subsystem state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTapiStateError(pub String);

impl fmt::Display for ParseTapiStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tapi state: {}", self.0)
    }
}

impl std::error::Error for ParseTapiStateError {}

define_code_enum! {
    error_type: ParseTapiStateError,
    /// Whether the telephony subsystem session is up.
    pub enum TapiState {
        Uninitialized = 0x00 => "uninitialized",
        Initialized = 0x01 => "initialized",
    }
}

/// Error returned when parsing an invalid line state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLineStateError(pub String);

impl fmt::Display for ParseLineStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown line state: {}", self.0)
    }
}

impl std::error::Error for ParseLineStateError {}

define_code_enum! {
    error_type: ParseLineStateError,
    /// State of the line device the call is placed on.
    pub enum LineState {
        Closed = 0x00 => "closed",
        Opened = 0x01 => "opened",
        Disconnected = 0x02 => "disconnected",
        Maintenance = 0x03 => "maintenance",
        OutOfService = 0x04 => "out-of-service",
        DeviceRemoved = 0x05 => "device-removed",
        Reinitialization = 0x06 => "reinitialization",
        Unknown = 0xFF => "unknown",
    }
}

/// Error returned when parsing an invalid call state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCallStateError(pub String);

impl fmt::Display for ParseCallStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown call state: {}", self.0)
    }
}

impl std::error::Error for ParseCallStateError {}

define_code_enum! {
    error_type: ParseCallStateError,
    /// State of the outbound call.
    ///
    /// `Connected` holds exactly while a data channel is open on the call.
    pub enum CallState {
        Default = 0x00 => "default",
        Dialing = 0x01 => "dialing",
        Busy = 0x02 => "busy",
        Idle = 0x03 => "idle",
        CannotDial = 0x04 => "cannot-dial",
        Disconnected = 0x05 => "disconnected",
        Connected = 0x06 => "connected",
        Unknown = 0xFF => "unknown",
    }
}

/// Error returned when parsing an invalid disconnect reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDisconnectReasonError(pub String);

impl fmt::Display for ParseDisconnectReasonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown disconnect reason: {}", self.0)
    }
}

impl std::error::Error for ParseDisconnectReasonError {}

define_code_enum! {
    error_type: ParseDisconnectReasonError,
    /// Why the last call ended, as reported by the subsystem.
    ///
    /// `ByFunction` marks an explicit [`end_connection`](crate::TapiModem::end_connection).
    pub enum DisconnectReason {
        Default = 0x00 => "default",
        ByRemote = 0x01 => "by-remote",
        Reject = 0x02 => "reject",
        Pickup = 0x03 => "pickup",
        Forwarded = 0x04 => "forwarded",
        Busy = 0x05 => "busy",
        NoAnswer = 0x06 => "no-answer",
        BadAddress = 0x07 => "bad-address",
        Unreachable = 0x08 => "unreachable",
        Congestion = 0x09 => "congestion",
        Incompatible = 0x0A => "incompatible",
        Unavailable = 0x0B => "unavailable",
        NoDialTone = 0x0C => "no-dial-tone",
        Blocked = 0x0D => "blocked",
        Cancelled = 0x0E => "cancelled",
        DoNotDisturb = 0x0F => "do-not-disturb",
        NumberChanged = 0x10 => "number-changed",
        OutOfOrder = 0x11 => "out-of-order",
        QosUnavailable = 0x12 => "qos-unavailable",
        TemporaryFailure = 0x13 => "temporary-failure",
        ByFunction = 0xFE => "by-function",
        Unknown = 0xFF => "unknown",
    }
}

impl DisconnectReason {
    /// Map a `LINEDISCONNECTMODE_*` value carried by a disconnected call-state
    /// message. Unmapped modes become [`Unknown`](Self::Unknown).
    pub fn from_disconnect_mode(mode: u32) -> Self {
        match mode {
            LINEDISCONNECTMODE_NORMAL => Self::ByRemote,
            LINEDISCONNECTMODE_BUSY => Self::Busy,
            LINEDISCONNECTMODE_NOANSWER => Self::NoAnswer,
            LINEDISCONNECTMODE_REJECT => Self::Reject,
            LINEDISCONNECTMODE_PICKUP => Self::Pickup,
            LINEDISCONNECTMODE_FORWARDED => Self::Forwarded,
            LINEDISCONNECTMODE_BADADDRESS => Self::BadAddress,
            LINEDISCONNECTMODE_UNREACHABLE => Self::Unreachable,
            LINEDISCONNECTMODE_CONGESTION => Self::Congestion,
            LINEDISCONNECTMODE_INCOMPATIBLE => Self::Incompatible,
            LINEDISCONNECTMODE_UNAVAIL => Self::Unavailable,
            LINEDISCONNECTMODE_NODIALTONE => Self::NoDialTone,
            LINEDISCONNECTMODE_BLOCKED => Self::Blocked,
            LINEDISCONNECTMODE_CANCELLED => Self::Cancelled,
            LINEDISCONNECTMODE_DONOTDISTURB => Self::DoNotDisturb,
            LINEDISCONNECTMODE_NUMBERCHANGED => Self::NumberChanged,
            LINEDISCONNECTMODE_OUTOFORDER => Self::OutOfOrder,
            LINEDISCONNECTMODE_QOSUNAVAIL => Self::QosUnavailable,
            LINEDISCONNECTMODE_TEMPFAILURE => Self::TemporaryFailure,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of every state flag, published through a `watch` channel.
///
/// The generation counters advance each time the matching notification
/// fires; the `wait_for_*` helpers race them against a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemStatus {
    /// Subsystem session state.
    pub tapi: TapiState,
    /// Line state.
    pub line: LineState,
    /// Call state.
    pub call: CallState,
    /// Reason the last call ended.
    pub disconnect_reason: DisconnectReason,
    /// Last error raised, until cleared.
    pub error: Option<ErrorKind>,
    /// Whether a comm handle is currently held.
    pub comm_open: bool,
    pub(crate) connected_gen: u64,
    pub(crate) disconnected_gen: u64,
    pub(crate) ready_read_gen: u64,
}

impl Default for ModemStatus {
    fn default() -> Self {
        Self {
            tapi: TapiState::Uninitialized,
            line: LineState::Closed,
            call: CallState::Default,
            disconnect_reason: DisconnectReason::Default,
            error: None,
            comm_open: false,
            connected_gen: 0,
            disconnected_gen: 0,
            ready_read_gen: 0,
        }
    }
}

impl ModemStatus {
    /// Whether every sign points at a live data connection.
    pub fn is_connected(&self) -> bool {
        self.tapi == TapiState::Initialized
            && self.call == CallState::Connected
            && self.line == LineState::Opened
            && self.comm_open
    }
}
