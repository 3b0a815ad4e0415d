//! Platform seam: the telephony subsystem and the comm port it hands out.
//!
//! [`Telephony`] mirrors the handful of `line*` calls the modem needs; every
//! call is synchronous and either succeeds or returns a raw
//! [`LineErrorCode`]. Asynchronous completions arrive later as
//! [`LineMessage`]s, announced through the session's notifier.
//!
//! [`CommPort`] is the data channel obtained once a call is connected. Reads
//! and event waits are async; writes are submitted without waiting and their
//! completion is polled with [`CommPort::write_status`].
//!
//! [`sim`](crate::sim) provides an in-process implementation of both.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::constants::*;
use crate::negotiate::Negotiated;

/// Telephony subsystem session handle (`HLINEAPP`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Open line handle (`HLINE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineHandle(pub u64);

/// Call handle (`HCALL`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHandle(pub u64);

/// Identifier of an asynchronous request, echoed back in `LINE_REPLY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

/// Raw `LINEERR_*` failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineErrorCode(pub u32);

impl LineErrorCode {
    pub const ALLOCATED: Self = Self(0x8000_0001);
    pub const BADDEVICEID: Self = Self(0x8000_0002);
    pub const INCOMPATIBLEAPIVERSION: Self = Self(0x8000_000C);
    pub const INUSE: Self = Self(0x8000_000F);
    pub const INVALADDRESS: Self = Self(0x8000_0010);
    pub const INVALAPPHANDLE: Self = Self(0x8000_0014);
    pub const INVALCALLHANDLE: Self = Self(0x8000_0018);
    pub const INVALCALLSTATE: Self = Self(0x8000_001C);
    pub const INVALLINEHANDLE: Self = Self(0x8000_002B);
    pub const INVALPOINTER: Self = Self(0x8000_0035);
    pub const NODEVICE: Self = Self(0x8000_0042);
    pub const NOMEM: Self = Self(0x8000_0044);
    pub const OPERATIONFAILED: Self = Self(0x8000_0048);
    pub const OPERATIONUNAVAIL: Self = Self(0x8000_0049);
    pub const RESOURCEUNAVAIL: Self = Self(0x8000_004B);
    pub const STRUCTURETOOSMALL: Self = Self(0x8000_004D);
    pub const UNINITIALIZED: Self = Self(0x8000_0050);
    pub const REINIT: Self = Self(0x8000_0052);

    /// The device id does not name a usable device.
    pub fn is_no_device(self) -> bool {
        self == Self::NODEVICE || self == Self::BADDEVICEID
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::ALLOCATED => "LINEERR_ALLOCATED",
            Self::BADDEVICEID => "LINEERR_BADDEVICEID",
            Self::INCOMPATIBLEAPIVERSION => "LINEERR_INCOMPATIBLEAPIVERSION",
            Self::INUSE => "LINEERR_INUSE",
            Self::INVALADDRESS => "LINEERR_INVALADDRESS",
            Self::INVALAPPHANDLE => "LINEERR_INVALAPPHANDLE",
            Self::INVALCALLHANDLE => "LINEERR_INVALCALLHANDLE",
            Self::INVALCALLSTATE => "LINEERR_INVALCALLSTATE",
            Self::INVALLINEHANDLE => "LINEERR_INVALLINEHANDLE",
            Self::INVALPOINTER => "LINEERR_INVALPOINTER",
            Self::NODEVICE => "LINEERR_NODEVICE",
            Self::NOMEM => "LINEERR_NOMEM",
            Self::OPERATIONFAILED => "LINEERR_OPERATIONFAILED",
            Self::OPERATIONUNAVAIL => "LINEERR_OPERATIONUNAVAIL",
            Self::RESOURCEUNAVAIL => "LINEERR_RESOURCEUNAVAIL",
            Self::STRUCTURETOOSMALL => "LINEERR_STRUCTURETOOSMALL",
            Self::UNINITIALIZED => "LINEERR_UNINITIALIZED",
            Self::REINIT => "LINEERR_REINIT",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for LineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// Result of a successful subsystem initialization
#[derive(Debug, Clone)]
pub struct SessionInit {
    /// Session handle used for every later call.
    pub session: SessionHandle,
    /// Number of line devices the subsystem knows about.
    pub device_count: u32,
    /// Signaled whenever messages are queued for [`Telephony::poll_message`].
    pub notifier: Arc<Notify>,
}

/// One queued subsystem message (`LINEMESSAGE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMessage {
    /// Handle the message is about: a call for `LINE_CALLSTATE`, a line for
    /// `LINE_CLOSE` / `LINE_LINEDEVSTATE`.
    pub device: u64,
    /// `LINE_*` message identifier.
    pub message_id: u32,
    pub param1: u64,
    pub param2: u64,
    pub param3: u64,
}

/// Parameters passed when placing a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParams {
    pub bearer_mode: u32,
    pub media_mode: u32,
    pub flags: u32,
    pub address_mode: u32,
    pub address_id: u32,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            bearer_mode: LINEBEARERMODE_VOICE,
            media_mode: LINEMEDIAMODE_DATAMODEM,
            flags: LINECALLPARAMFLAGS_IDLE,
            address_mode: LINEADDRESSMODE_ADDRESSID,
            address_id: 0,
        }
    }
}

/// Call status record (`LINECALLSTATUS`), reduced to what teardown needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStatus {
    /// `LINECALLSTATE_*` bits.
    pub call_state: u32,
}

impl CallStatus {
    /// Whether the call has already gone idle and needs no drop.
    pub fn is_idle(&self) -> bool {
        self.call_state & LINECALLSTATE_IDLE != 0
    }
}

/// Line device capabilities (`LINEDEVCAPS`), reduced to what enumeration needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    /// `LINEMEDIAMODE_*` bits the device supports.
    pub media_modes: u32,
    /// Device name, when the driver reports one.
    pub line_name: Option<String>,
}

/// Timeout and error-handling settings applied to a freshly opened comm port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommSettings {
    /// Maximum silence between two received bytes before a read completes.
    pub read_interval_timeout: Duration,
    /// Fixed total read timeout; zero means none.
    pub read_total_timeout: Duration,
    /// Fixed total write timeout; zero means none.
    pub write_total_timeout: Duration,
    /// Whether a line error aborts pending I/O.
    pub abort_on_error: bool,
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            read_interval_timeout: Duration::from_millis(READ_INTERVAL_TIMEOUT_MS),
            read_total_timeout: Duration::ZERO,
            write_total_timeout: Duration::ZERO,
            abort_on_error: false,
        }
    }
}

/// Comm port event mask (`EV_*` bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommEvents(pub u32);

impl CommEvents {
    pub const NONE: Self = Self(0);
    /// A byte was received.
    pub const RX_CHAR: Self = Self(EV_RXCHAR);
    /// The transmit buffer drained.
    pub const TX_EMPTY: Self = Self(EV_TXEMPTY);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CommEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CommEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Identifies one in-flight asynchronous write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteToken(pub u64);

/// Immediate outcome of submitting a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStart {
    /// The write finished synchronously.
    Completed(usize),
    /// The write is in flight; poll it with [`CommPort::write_status`].
    Pending(WriteToken),
}

/// Completion state of an in-flight write
#[derive(Debug)]
pub enum WriteStatus {
    /// Finished, with the number of bytes transferred.
    Complete(usize),
    /// Still in flight.
    Incomplete,
    /// Failed.
    Failed(io::Error),
}

/// The telephony subsystem
pub trait Telephony: Send + Sync + 'static {
    /// Data channel handed out for connected calls.
    type Port: CommPort;

    /// Start a session (`lineInitializeEx`). Returns [`LineErrorCode::REINIT`]
    /// while the subsystem is restarting.
    fn initialize(&self, app_name: &str, api_version: u32) -> Result<SessionInit, LineErrorCode>;

    /// End a session (`lineShutdown`).
    fn shutdown(&self, session: SessionHandle) -> Result<(), LineErrorCode>;

    /// Dequeue one message without waiting (`lineGetMessage`).
    ///
    /// An empty queue is reported as [`LineErrorCode::OPERATIONFAILED`].
    fn poll_message(&self, session: SessionHandle) -> Result<LineMessage, LineErrorCode>;

    /// Agree on an API version for a device (`lineNegotiateAPIVersion`).
    fn negotiate_api_version(
        &self,
        session: SessionHandle,
        device_id: u32,
        low: u32,
        high: u32,
    ) -> Result<u32, LineErrorCode>;

    /// Open a line as owner for the given media mode (`lineOpen`).
    fn open_line(
        &self,
        session: SessionHandle,
        device_id: u32,
        api_version: u32,
        media_mode: u32,
    ) -> Result<LineHandle, LineErrorCode>;

    /// Choose which `LINEDEVSTATE_*` changes are reported (`lineSetStatusMessages`).
    fn set_status_messages(&self, line: LineHandle, line_states: u32) -> Result<(), LineErrorCode>;

    /// Place a call (`lineMakeCall`). Progress arrives as `LINE_CALLSTATE`
    /// messages and the request result as `LINE_REPLY`.
    fn make_call(
        &self,
        line: LineHandle,
        number: &str,
        params: &CallParams,
    ) -> Result<(CallHandle, RequestId), LineErrorCode>;

    /// Read the call status record into a buffer of `capacity` bytes
    /// (`lineGetCallStatus`).
    fn call_status(
        &self,
        call: CallHandle,
        capacity: usize,
    ) -> Result<Negotiated<CallStatus>, LineErrorCode>;

    /// Hang up the call (`lineDrop`).
    fn drop_call(&self, call: CallHandle) -> Result<RequestId, LineErrorCode>;

    /// Release the call handle (`lineDeallocateCall`).
    fn deallocate_call(&self, call: CallHandle) -> Result<(), LineErrorCode>;

    /// Close the line (`lineClose`).
    fn close_line(&self, line: LineHandle) -> Result<(), LineErrorCode>;

    /// Obtain the call's data channel for [`COMM_DEVICE_CLASS`] into a
    /// buffer of `capacity` bytes (`lineGetID`).
    fn comm_handle(
        &self,
        call: CallHandle,
        capacity: usize,
    ) -> Result<Negotiated<Self::Port>, LineErrorCode>;

    /// Read a device capability record into a buffer of `capacity` bytes
    /// (`lineGetDevCaps`).
    fn device_caps(
        &self,
        session: SessionHandle,
        device_id: u32,
        api_version: u32,
        capacity: usize,
    ) -> Result<Negotiated<DeviceCaps>, LineErrorCode>;
}

/// Raw data channel of a connected call
#[async_trait]
pub trait CommPort: Send + Sync + 'static {
    /// Whether the handle refers to a character device.
    fn is_char_device(&self) -> bool;

    /// Apply timeouts and error handling.
    fn configure(&self, settings: &CommSettings) -> io::Result<()>;

    /// Choose which events [`wait_event`](Self::wait_event) reports.
    fn set_event_mask(&self, mask: CommEvents) -> io::Result<()>;

    /// Wait until one of the armed events fires.
    async fn wait_event(&self) -> io::Result<CommEvents>;

    /// Bytes waiting in the receive queue.
    fn queued_bytes(&self) -> io::Result<usize>;

    /// Read up to `len` bytes.
    async fn read(&self, len: usize) -> io::Result<Vec<u8>>;

    /// Submit a write without waiting for it.
    fn start_write(&self, data: &[u8]) -> io::Result<WriteStart>;

    /// Poll an in-flight write.
    fn write_status(&self, token: WriteToken) -> WriteStatus;

    /// Abandon an in-flight write and release its resources.
    fn cancel_write(&self, token: WriteToken);

    /// Flush the transmit buffer.
    fn flush(&self) -> io::Result<()>;

    /// Cancel all outstanding I/O.
    fn cancel_io(&self);

    /// Close the handle. Later calls fail.
    fn close(&self);
}
