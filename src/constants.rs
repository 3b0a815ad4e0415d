//! Telephony subsystem codes and configuration defaults
//!
//! Numeric values mirror the TAPI 2.x headers (`tapi.h`) so a native backend
//! can pass raw message parameters straight through.

/// Highest TAPI version this crate negotiates
pub const TAPI_SUPPORTED_API: u32 = 0x0002_0002;

/// Lowest TAPI version accepted during negotiation
pub const TAPI_LOWEST_API: u32 = 0x0001_0004;

/// Application name registered with the subsystem unless overridden
pub const DEFAULT_FRIENDLY_NAME: &str = "TapiModem";

/// Maximum number of queued notifications before dropping
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;

/// Inter-byte read timeout: the remote end is assumed done after 250ms of silence
pub const READ_INTERVAL_TIMEOUT_MS: u64 = 250;

/// Initial capacity for variable-length subsystem records (fixed header + 1KB)
pub const INITIAL_RECORD_CAPACITY: usize = 1024 + 64;

/// Initial capacity used when querying device capabilities during enumeration
pub const DEVICE_CAPS_CAPACITY: usize = 4096;

/// Default timeout for the blocking `wait_for_*` helpers
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Device class requested when asking for the call's data channel
pub const COMM_DEVICE_CLASS: &str = "comm/datamodem";

// --- LINE_* message identifiers ---

pub const LINE_CALLSTATE: u32 = 2;
pub const LINE_CLOSE: u32 = 3;
pub const LINE_LINEDEVSTATE: u32 = 8;
pub const LINE_REPLY: u32 = 12;
pub const LINE_CREATE: u32 = 19;

// --- LINECALLSTATE_* ---

pub const LINECALLSTATE_IDLE: u32 = 0x0000_0001;
pub const LINECALLSTATE_OFFERING: u32 = 0x0000_0002;
pub const LINECALLSTATE_DIALTONE: u32 = 0x0000_0008;
pub const LINECALLSTATE_DIALING: u32 = 0x0000_0010;
pub const LINECALLSTATE_RINGBACK: u32 = 0x0000_0020;
pub const LINECALLSTATE_BUSY: u32 = 0x0000_0040;
pub const LINECALLSTATE_SPECIALINFO: u32 = 0x0000_0080;
pub const LINECALLSTATE_CONNECTED: u32 = 0x0000_0100;
pub const LINECALLSTATE_PROCEEDING: u32 = 0x0000_0200;
pub const LINECALLSTATE_DISCONNECTED: u32 = 0x0000_4000;
pub const LINECALLSTATE_UNKNOWN: u32 = 0x0000_8000;

// --- LINEDISCONNECTMODE_* ---

pub const LINEDISCONNECTMODE_NORMAL: u32 = 0x0000_0001;
pub const LINEDISCONNECTMODE_UNKNOWN: u32 = 0x0000_0002;
pub const LINEDISCONNECTMODE_REJECT: u32 = 0x0000_0004;
pub const LINEDISCONNECTMODE_PICKUP: u32 = 0x0000_0008;
pub const LINEDISCONNECTMODE_FORWARDED: u32 = 0x0000_0010;
pub const LINEDISCONNECTMODE_BUSY: u32 = 0x0000_0020;
pub const LINEDISCONNECTMODE_NOANSWER: u32 = 0x0000_0040;
pub const LINEDISCONNECTMODE_BADADDRESS: u32 = 0x0000_0080;
pub const LINEDISCONNECTMODE_UNREACHABLE: u32 = 0x0000_0100;
pub const LINEDISCONNECTMODE_CONGESTION: u32 = 0x0000_0200;
pub const LINEDISCONNECTMODE_INCOMPATIBLE: u32 = 0x0000_0400;
pub const LINEDISCONNECTMODE_UNAVAIL: u32 = 0x0000_0800;
pub const LINEDISCONNECTMODE_NODIALTONE: u32 = 0x0000_1000;
pub const LINEDISCONNECTMODE_NUMBERCHANGED: u32 = 0x0000_2000;
pub const LINEDISCONNECTMODE_OUTOFORDER: u32 = 0x0000_4000;
pub const LINEDISCONNECTMODE_TEMPFAILURE: u32 = 0x0000_8000;
pub const LINEDISCONNECTMODE_QOSUNAVAIL: u32 = 0x0001_0000;
pub const LINEDISCONNECTMODE_BLOCKED: u32 = 0x0002_0000;
pub const LINEDISCONNECTMODE_DONOTDISTURB: u32 = 0x0004_0000;
pub const LINEDISCONNECTMODE_CANCELLED: u32 = 0x0008_0000;

// --- LINEDEVSTATE_* ---

pub const LINEDEVSTATE_CONNECTED: u32 = 0x0000_0004;
pub const LINEDEVSTATE_DISCONNECTED: u32 = 0x0000_0008;
pub const LINEDEVSTATE_OUTOFSERVICE: u32 = 0x0000_0080;
pub const LINEDEVSTATE_MAINTENANCE: u32 = 0x0000_0100;
pub const LINEDEVSTATE_CLOSE: u32 = 0x0000_0400;
pub const LINEDEVSTATE_REINIT: u32 = 0x0004_0000;
pub const LINEDEVSTATE_REMOVED: u32 = 0x0100_0000;

/// Device-state changes the line is subscribed to after opening
pub const LINE_STATUS_MESSAGES: u32 = LINEDEVSTATE_CONNECTED
    | LINEDEVSTATE_DISCONNECTED
    | LINEDEVSTATE_OUTOFSERVICE
    | LINEDEVSTATE_MAINTENANCE
    | LINEDEVSTATE_CLOSE
    | LINEDEVSTATE_REINIT
    | LINEDEVSTATE_REMOVED;

// --- Call parameters ---

pub const LINEMEDIAMODE_DATAMODEM: u32 = 0x0000_0010;
pub const LINEBEARERMODE_VOICE: u32 = 0x0000_0001;
pub const LINECALLPRIVILEGE_OWNER: u32 = 0x0000_0004;
pub const LINECALLPARAMFLAGS_IDLE: u32 = 0x0000_0010;
pub const LINEADDRESSMODE_ADDRESSID: u32 = 0x0000_0001;

// --- Comm port event mask bits ---

pub const EV_RXCHAR: u32 = 0x0001;
pub const EV_TXEMPTY: u32 = 0x0004;
