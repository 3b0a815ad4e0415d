//! In-process telephony subsystem and comm port.
//!
//! [`SimTelephony`] keeps its sessions, lines and calls in memory and queues
//! [`LineMessage`]s that tests (or the demo) push with the `signal_*`
//! helpers. Every trait call is recorded in an operation log, and any call
//! can be made to fail with [`SimTelephony::fail_next`].
//!
//! [`SimCommPort`] is the data channel handed out for connected calls. Bytes
//! arrive with [`SimCommPort::feed`]; writes complete immediately, stay
//! pending until [`SimCommPort::complete_writes`], or fail, depending on
//! [`SimWriteMode`].
//!
//! ```rust
//! use tapi_modem_tokio::sim::{SimOp, SimTelephony};
//!
//! let sim = SimTelephony::with_modems(2);
//! sim.fail_next(SimOp::OpenLine, tapi_modem_tokio::LineErrorCode::INUSE);
//! assert!(sim.operations().is_empty());
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

use crate::backend::{
    CallHandle, CallParams, CallStatus, CommEvents, CommPort, CommSettings, DeviceCaps,
    LineErrorCode, LineHandle, LineMessage, RequestId, SessionHandle, SessionInit, Telephony,
    WriteStart, WriteStatus, WriteToken,
};
use crate::constants::*;
use crate::negotiate::Negotiated;

/// Size the simulated records report unless overridden.
const DEFAULT_RECORD_SIZE: usize = 256;

/// Subsystem call recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Initialize,
    Shutdown,
    /// Never logged; only usable with [`SimTelephony::fail_next`].
    PollMessage,
    NegotiateApiVersion,
    OpenLine,
    SetStatusMessages,
    MakeCall,
    CallStatus,
    DropCall,
    DeallocateCall,
    CloseLine,
    CommHandle,
    DeviceCaps,
}

/// One simulated line device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    /// Name reported in the capability record.
    pub name: Option<String>,
    /// `LINEMEDIAMODE_*` bits.
    pub media_modes: u32,
    /// Failure returned by every `open_line` on this device.
    pub open_error: Option<LineErrorCode>,
}

impl SimDevice {
    /// A working data modem with the given name.
    pub fn modem(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            media_modes: LINEMEDIAMODE_DATAMODEM,
            open_error: None,
        }
    }
}

#[derive(Debug)]
struct SimCall {
    line: LineHandle,
    number: String,
    state: u32,
}

#[derive(Debug)]
struct SimState {
    devices: Vec<SimDevice>,
    session: Option<SessionHandle>,
    notifier: Arc<Notify>,
    next_handle: u64,
    next_request: u32,
    lines: HashMap<LineHandle, u32>,
    calls: HashMap<CallHandle, SimCall>,
    last_line: Option<LineHandle>,
    last_call: Option<CallHandle>,
    last_request: Option<RequestId>,
    last_port: Option<SimCommPort>,
    queue: VecDeque<LineMessage>,
    failures: HashMap<SimOp, VecDeque<LineErrorCode>>,
    reinit_answers: u32,
    record_size: usize,
    char_device: bool,
    log: Vec<SimOp>,
}

impl SimState {
    fn record(&mut self, op: SimOp) -> Result<(), LineErrorCode> {
        trace!("[SIM] {:?}", op);
        self.log
            .push(op);
        match self
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn request(&mut self) -> RequestId {
        self.next_request += 1;
        let id = RequestId(self.next_request);
        self.last_request = Some(id);
        id
    }

    fn check_session(&self, session: SessionHandle) -> Result<(), LineErrorCode> {
        if self.session == Some(session) {
            Ok(())
        } else {
            Err(LineErrorCode::INVALAPPHANDLE)
        }
    }

    fn device(&self, device_id: u32) -> Result<&SimDevice, LineErrorCode> {
        self.devices
            .get(device_id as usize)
            .ok_or(LineErrorCode::BADDEVICEID)
    }

    fn enqueue(&mut self, message: LineMessage) {
        self.queue
            .push_back(message);
        self.notifier
            .notify_one();
    }
}

/// Simulated telephony subsystem (Clone, shares state)
#[derive(Debug, Clone)]
pub struct SimTelephony {
    state: Arc<Mutex<SimState>>,
}

impl SimTelephony {
    /// Subsystem exposing the given line devices.
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                devices,
                session: None,
                notifier: Arc::new(Notify::new()),
                next_handle: 0x100,
                next_request: 0,
                lines: HashMap::new(),
                calls: HashMap::new(),
                last_line: None,
                last_call: None,
                last_request: None,
                last_port: None,
                queue: VecDeque::new(),
                failures: HashMap::new(),
                reinit_answers: 0,
                record_size: DEFAULT_RECORD_SIZE,
                char_device: true,
                log: Vec::new(),
            })),
        }
    }

    /// Subsystem with `count` working data modems named `Sim Modem <id>`.
    pub fn with_modems(count: u32) -> Self {
        Self::new(
            (0..count)
                .map(|id| SimDevice::modem(format!("Sim Modem {}", id)))
                .collect(),
        )
    }

    /// Make the next call of `op` fail with `code`. Failures queue up.
    pub fn fail_next(&self, op: SimOp, code: LineErrorCode) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(code);
    }

    /// Answer the next `count` initializations with `LINEERR_REINIT`.
    pub fn reinit_in_progress(&self, count: u32) {
        self.state
            .lock()
            .reinit_answers = count;
    }

    /// Size every variable-length record reports as needed.
    pub fn set_record_size(&self, size: usize) {
        self.state
            .lock()
            .record_size = size;
    }

    /// Whether comm handles handed out from now on are character devices.
    pub fn set_char_device(&self, char_device: bool) {
        self.state
            .lock()
            .char_device = char_device;
    }

    /// Every subsystem call made so far, in order.
    pub fn operations(&self) -> Vec<SimOp> {
        self.state
            .lock()
            .log
            .clone()
    }

    /// How many times `op` was called.
    pub fn count(&self, op: SimOp) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|&&logged| logged == op)
            .count()
    }

    pub fn clear_operations(&self) {
        self.state
            .lock()
            .log
            .clear();
    }

    /// Whether a session is open.
    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .session
            .is_some()
    }

    pub fn open_lines(&self) -> usize {
        self.state
            .lock()
            .lines
            .len()
    }

    pub fn active_calls(&self) -> usize {
        self.state
            .lock()
            .calls
            .len()
    }

    /// Handle of the most recently placed call.
    pub fn last_call(&self) -> Option<CallHandle> {
        self.state
            .lock()
            .last_call
    }

    /// Handle of the most recently opened line.
    pub fn last_line(&self) -> Option<LineHandle> {
        self.state
            .lock()
            .last_line
    }

    /// Request id of the most recent asynchronous request.
    pub fn last_request(&self) -> Option<RequestId> {
        self.state
            .lock()
            .last_request
    }

    /// Number dialed by the most recent call.
    pub fn dialed_number(&self) -> Option<String> {
        let state = self
            .state
            .lock();
        state
            .last_call
            .and_then(|call| state.calls.get(&call))
            .map(|call| call.number.clone())
    }

    /// Comm port handed out most recently.
    pub fn last_port(&self) -> Option<SimCommPort> {
        self.state
            .lock()
            .last_port
            .clone()
    }

    /// Queue a raw message and wake the session's notifier.
    pub fn push_message(&self, message: LineMessage) {
        self.state
            .lock()
            .enqueue(message);
    }

    /// Report call progress on the most recent call.
    pub fn signal_call_state(&self, call_state: u32, detail: u32) {
        let mut state = self
            .state
            .lock();
        let Some(call) = state.last_call else {
            return;
        };
        self.signal_call_state_on_locked(&mut state, call, call_state, detail);
    }

    /// Report call progress on an explicit call handle, tracked or not.
    pub fn signal_call_state_on(&self, call: CallHandle, call_state: u32, detail: u32) {
        let mut state = self
            .state
            .lock();
        self.signal_call_state_on_locked(&mut state, call, call_state, detail);
    }

    fn signal_call_state_on_locked(
        &self,
        state: &mut SimState,
        call: CallHandle,
        call_state: u32,
        detail: u32,
    ) {
        if let Some(sim_call) = state
            .calls
            .get_mut(&call)
        {
            sim_call.state = call_state;
        }
        state.enqueue(LineMessage {
            device: call.0,
            message_id: LINE_CALLSTATE,
            param1: call_state as u64,
            param2: detail as u64,
            param3: 0,
        });
    }

    /// Close the most recent line from the subsystem side and report it.
    pub fn signal_line_closed(&self) {
        let mut state = self
            .state
            .lock();
        let Some(line) = state.last_line else {
            return;
        };
        state
            .lines
            .remove(&line);
        state.enqueue(LineMessage {
            device: line.0,
            message_id: LINE_CLOSE,
            param1: 0,
            param2: 0,
            param3: 0,
        });
    }

    /// Report a line device state change on the most recent line.
    pub fn signal_line_device_state(&self, line_state: u32, reason: u32) {
        let mut state = self
            .state
            .lock();
        let Some(line) = state.last_line else {
            return;
        };
        state.enqueue(LineMessage {
            device: line.0,
            message_id: LINE_LINEDEVSTATE,
            param1: line_state as u64,
            param2: reason as u64,
            param3: 0,
        });
    }

    /// Complete an asynchronous request.
    pub fn signal_reply(&self, request_id: RequestId, result: u32) {
        self.state
            .lock()
            .enqueue(LineMessage {
                device: 0,
                message_id: LINE_REPLY,
                param1: request_id.0 as u64,
                param2: result as u64,
                param3: 0,
            });
    }
}

impl Telephony for SimTelephony {
    type Port = SimCommPort;

    fn initialize(&self, _app_name: &str, _api_version: u32) -> Result<SessionInit, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::Initialize)?;
        if state.reinit_answers > 0 {
            state.reinit_answers -= 1;
            return Err(LineErrorCode::REINIT);
        }
        let session = SessionHandle(state.handle());
        state.session = Some(session);
        state.notifier = Arc::new(Notify::new());
        Ok(SessionInit {
            session,
            device_count: state.devices.len() as u32,
            notifier: state
                .notifier
                .clone(),
        })
    }

    fn shutdown(&self, session: SessionHandle) -> Result<(), LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::Shutdown)?;
        state.check_session(session)?;
        state.session = None;
        state
            .lines
            .clear();
        state
            .calls
            .clear();
        state
            .queue
            .clear();
        Ok(())
    }

    fn poll_message(&self, session: SessionHandle) -> Result<LineMessage, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.check_session(session)?;
        if let Some(code) = state
            .failures
            .get_mut(&SimOp::PollMessage)
            .and_then(VecDeque::pop_front)
        {
            return Err(code);
        }
        state
            .queue
            .pop_front()
            .ok_or(LineErrorCode::OPERATIONFAILED)
    }

    fn negotiate_api_version(
        &self,
        session: SessionHandle,
        device_id: u32,
        low: u32,
        high: u32,
    ) -> Result<u32, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::NegotiateApiVersion)?;
        state.check_session(session)?;
        state.device(device_id)?;
        if low > high {
            return Err(LineErrorCode::INCOMPATIBLEAPIVERSION);
        }
        Ok(high)
    }

    fn open_line(
        &self,
        session: SessionHandle,
        device_id: u32,
        _api_version: u32,
        media_mode: u32,
    ) -> Result<LineHandle, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::OpenLine)?;
        state.check_session(session)?;
        let device = state.device(device_id)?;
        if let Some(code) = device.open_error {
            return Err(code);
        }
        if device.media_modes & media_mode == 0 {
            return Err(LineErrorCode::OPERATIONUNAVAIL);
        }
        let line = LineHandle(state.handle());
        state
            .lines
            .insert(line, device_id);
        state.last_line = Some(line);
        Ok(line)
    }

    fn set_status_messages(
        &self,
        line: LineHandle,
        _line_states: u32,
    ) -> Result<(), LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::SetStatusMessages)?;
        if !state
            .lines
            .contains_key(&line)
        {
            return Err(LineErrorCode::INVALLINEHANDLE);
        }
        Ok(())
    }

    fn make_call(
        &self,
        line: LineHandle,
        number: &str,
        _params: &CallParams,
    ) -> Result<(CallHandle, RequestId), LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::MakeCall)?;
        if !state
            .lines
            .contains_key(&line)
        {
            return Err(LineErrorCode::INVALLINEHANDLE);
        }
        if number.is_empty() {
            return Err(LineErrorCode::INVALADDRESS);
        }
        let call = CallHandle(state.handle());
        state.calls.insert(
            call,
            SimCall {
                line,
                number: number.to_string(),
                state: LINECALLSTATE_DIALTONE,
            },
        );
        state.last_call = Some(call);
        let request = state.request();
        Ok((call, request))
    }

    fn call_status(
        &self,
        call: CallHandle,
        capacity: usize,
    ) -> Result<Negotiated<CallStatus>, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::CallStatus)?;
        if capacity < state.record_size {
            return Ok(Negotiated::NeedsCapacity(state.record_size));
        }
        state
            .calls
            .get(&call)
            .map(|sim_call| {
                Negotiated::Ready(CallStatus {
                    call_state: sim_call.state,
                })
            })
            .ok_or(LineErrorCode::INVALCALLHANDLE)
    }

    fn drop_call(&self, call: CallHandle) -> Result<RequestId, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::DropCall)?;
        let sim_call = state
            .calls
            .get_mut(&call)
            .ok_or(LineErrorCode::INVALCALLHANDLE)?;
        sim_call.state = LINECALLSTATE_IDLE;
        Ok(state.request())
    }

    fn deallocate_call(&self, call: CallHandle) -> Result<(), LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::DeallocateCall)?;
        state
            .calls
            .remove(&call)
            .map(|_| ())
            .ok_or(LineErrorCode::INVALCALLHANDLE)
    }

    fn close_line(&self, line: LineHandle) -> Result<(), LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::CloseLine)?;
        state
            .lines
            .remove(&line)
            .ok_or(LineErrorCode::INVALLINEHANDLE)?;
        state
            .calls
            .retain(|_, sim_call| sim_call.line != line);
        Ok(())
    }

    fn comm_handle(
        &self,
        call: CallHandle,
        capacity: usize,
    ) -> Result<Negotiated<SimCommPort>, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::CommHandle)?;
        if !state
            .calls
            .contains_key(&call)
        {
            return Err(LineErrorCode::INVALCALLHANDLE);
        }
        if capacity < state.record_size {
            return Ok(Negotiated::NeedsCapacity(state.record_size));
        }
        let port = SimCommPort::new();
        port.set_char_device(state.char_device);
        state.last_port = Some(port.clone());
        Ok(Negotiated::Ready(port))
    }

    fn device_caps(
        &self,
        session: SessionHandle,
        device_id: u32,
        _api_version: u32,
        capacity: usize,
    ) -> Result<Negotiated<DeviceCaps>, LineErrorCode> {
        let mut state = self
            .state
            .lock();
        state.record(SimOp::DeviceCaps)?;
        state.check_session(session)?;
        if capacity < state.record_size {
            return Ok(Negotiated::NeedsCapacity(state.record_size));
        }
        let device = state.device(device_id)?;
        Ok(Negotiated::Ready(DeviceCaps {
            media_modes: device.media_modes,
            line_name: device
                .name
                .clone(),
        }))
    }
}

/// How [`SimCommPort`] answers writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimWriteMode {
    /// Writes finish synchronously.
    #[default]
    Immediate,
    /// Writes stay in flight until completed or failed explicitly.
    Pending,
    /// Writes are rejected at submission.
    Reject,
}

#[derive(Debug)]
enum SimWrite {
    InFlight(usize),
    Done(usize),
    Failed,
}

#[derive(Debug, Default)]
struct PortState {
    char_device: bool,
    configure_fails: bool,
    read_fails: bool,
    settings: Option<CommSettings>,
    mask: CommEvents,
    fired: CommEvents,
    rx: VecDeque<u8>,
    transmitted: Vec<u8>,
    write_mode: SimWriteMode,
    next_token: u64,
    writes: HashMap<WriteToken, SimWrite>,
    cancelled_writes: usize,
    flushed: bool,
    io_cancelled: bool,
    closed: bool,
}

impl PortState {
    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(io::ErrorKind::NotConnected, "comm port closed"))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct PortShared {
    state: Mutex<PortState>,
    wake: Notify,
}

/// Simulated comm port (Clone, shares state)
#[derive(Debug, Clone)]
pub struct SimCommPort {
    shared: Arc<PortShared>,
}

impl Default for SimCommPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCommPort {
    /// An open character device with no events armed.
    pub fn new() -> Self {
        let shared = PortShared::default();
        shared
            .state
            .lock()
            .char_device = true;
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn set_char_device(&self, char_device: bool) {
        self.shared
            .state
            .lock()
            .char_device = char_device;
    }

    /// Make `configure` fail.
    pub fn fail_configure(&self, fail: bool) {
        self.shared
            .state
            .lock()
            .configure_fails = fail;
    }

    /// Make `read` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.shared
            .state
            .lock()
            .read_fails = fail;
    }

    pub fn set_write_mode(&self, mode: SimWriteMode) {
        self.shared
            .state
            .lock()
            .write_mode = mode;
    }

    /// Deliver bytes from the remote end and raise `RX_CHAR`.
    pub fn feed(&self, bytes: &[u8]) {
        {
            let mut state = self
                .shared
                .state
                .lock();
            state
                .rx
                .extend(bytes.iter().copied());
            state.fired |= CommEvents::RX_CHAR;
        }
        self.shared
            .wake
            .notify_one();
    }

    /// Finish every in-flight write and raise `TX_EMPTY`.
    pub fn complete_writes(&self) {
        self.settle_writes(true);
    }

    /// Fail every in-flight write and raise `TX_EMPTY`.
    pub fn fail_pending_writes(&self) {
        self.settle_writes(false);
    }

    fn settle_writes(&self, succeed: bool) {
        {
            let mut state = self
                .shared
                .state
                .lock();
            for write in state
                .writes
                .values_mut()
            {
                if let SimWrite::InFlight(len) = *write {
                    *write = if succeed {
                        SimWrite::Done(len)
                    } else {
                        SimWrite::Failed
                    };
                }
            }
            state.fired |= CommEvents::TX_EMPTY;
        }
        self.shared
            .wake
            .notify_one();
    }

    /// Writes submitted and not yet completed, failed or cancelled.
    pub fn pending_writes(&self) -> usize {
        self.shared
            .state
            .lock()
            .writes
            .values()
            .filter(|write| matches!(write, SimWrite::InFlight(_)))
            .count()
    }

    pub fn cancelled_writes(&self) -> usize {
        self.shared
            .state
            .lock()
            .cancelled_writes
    }

    /// Bytes accepted by synchronous writes.
    pub fn transmitted(&self) -> Vec<u8> {
        self.shared
            .state
            .lock()
            .transmitted
            .clone()
    }

    /// Settings applied by `configure`.
    pub fn settings(&self) -> Option<CommSettings> {
        self.shared
            .state
            .lock()
            .settings
            .clone()
    }

    pub fn event_mask(&self) -> CommEvents {
        self.shared
            .state
            .lock()
            .mask
    }

    pub fn was_flushed(&self) -> bool {
        self.shared
            .state
            .lock()
            .flushed
    }

    pub fn io_cancelled(&self) -> bool {
        self.shared
            .state
            .lock()
            .io_cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .state
            .lock()
            .closed
    }
}

#[async_trait]
impl CommPort for SimCommPort {
    fn is_char_device(&self) -> bool {
        self.shared
            .state
            .lock()
            .char_device
    }

    fn configure(&self, settings: &CommSettings) -> io::Result<()> {
        let mut state = self
            .shared
            .state
            .lock();
        state.check_open()?;
        if state.configure_fails {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad comm settings"));
        }
        state.settings = Some(settings.clone());
        Ok(())
    }

    fn set_event_mask(&self, mask: CommEvents) -> io::Result<()> {
        let mut state = self
            .shared
            .state
            .lock();
        state.check_open()?;
        state.mask = mask;
        Ok(())
    }

    async fn wait_event(&self) -> io::Result<CommEvents> {
        loop {
            let notified = self
                .shared
                .wake
                .notified();
            {
                let mut state = self
                    .shared
                    .state
                    .lock();
                state.check_open()?;
                let ready = CommEvents(state.fired.0 & state.mask.0);
                if !ready.is_empty() {
                    state.fired = CommEvents(state.fired.0 & !ready.0);
                    return Ok(ready);
                }
            }
            notified.await;
        }
    }

    fn queued_bytes(&self) -> io::Result<usize> {
        let state = self
            .shared
            .state
            .lock();
        state.check_open()?;
        Ok(state.rx.len())
    }

    async fn read(&self, len: usize) -> io::Result<Vec<u8>> {
        let mut state = self
            .shared
            .state
            .lock();
        state.check_open()?;
        if state.read_fails {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "carrier lost"));
        }
        let n = len.min(state.rx.len());
        Ok(state
            .rx
            .drain(..n)
            .collect())
    }

    fn start_write(&self, data: &[u8]) -> io::Result<WriteStart> {
        let mut state = self
            .shared
            .state
            .lock();
        state.check_open()?;
        match state.write_mode {
            SimWriteMode::Immediate => {
                state
                    .transmitted
                    .extend_from_slice(data);
                Ok(WriteStart::Completed(data.len()))
            }
            SimWriteMode::Pending => {
                state.next_token += 1;
                let token = WriteToken(state.next_token);
                state
                    .writes
                    .insert(token, SimWrite::InFlight(data.len()));
                Ok(WriteStart::Pending(token))
            }
            SimWriteMode::Reject => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write rejected",
            )),
        }
    }

    fn write_status(&self, token: WriteToken) -> WriteStatus {
        let mut state = self
            .shared
            .state
            .lock();
        match state
            .writes
            .get(&token)
        {
            Some(SimWrite::InFlight(_)) => WriteStatus::Incomplete,
            Some(SimWrite::Done(len)) => {
                let len = *len;
                state
                    .writes
                    .remove(&token);
                WriteStatus::Complete(len)
            }
            Some(SimWrite::Failed) => {
                state
                    .writes
                    .remove(&token);
                WriteStatus::Failed(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"))
            }
            None => WriteStatus::Failed(io::Error::new(
                io::ErrorKind::NotFound,
                "unknown write token",
            )),
        }
    }

    fn cancel_write(&self, token: WriteToken) {
        let mut state = self
            .shared
            .state
            .lock();
        if state
            .writes
            .remove(&token)
            .is_some()
        {
            state.cancelled_writes += 1;
        }
    }

    fn flush(&self) -> io::Result<()> {
        let mut state = self
            .shared
            .state
            .lock();
        state.check_open()?;
        state.flushed = true;
        Ok(())
    }

    fn cancel_io(&self) {
        self.shared
            .state
            .lock()
            .io_cancelled = true;
        self.shared
            .wake
            .notify_one();
    }

    fn close(&self) {
        self.shared
            .state
            .lock()
            .closed = true;
        self.shared
            .wake
            .notify_one();
    }
}
