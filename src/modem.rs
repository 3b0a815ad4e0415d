//! Modem handle, notification stream and the coordinator behind them

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backend::{
        CallHandle, CallParams, CommPort, CommSettings, LineErrorCode, LineHandle, LineMessage,
        SessionHandle, Telephony, WriteStart,
    },
    buffer::InboundBuffer,
    constants::*,
    datapath::{comm_loop, configure_port, DataPathEvents},
    error::{ErrorKind, ModemError, ModemResult},
    event::ModemEvent,
    machine::{self, Effect},
    negotiate::negotiate_sized,
    signaling::{poll_signaling_event, PollOutcome, SignalingEvent},
    state::{CallState, DisconnectReason, LineState, ModemStatus, TapiState},
    writer::WriteTracker,
};

/// Options for modem configuration.
///
/// Fixed when the [`TapiModem`] is created. Use [`Default::default()`] for
/// standard settings.
#[derive(Debug, Clone)]
pub struct ModemOptions {
    /// Application name reported by [`TapiModem::initialize_default`].
    /// Default: `"TapiModem"`.
    pub app_name: String,
    /// Capacity of the mpsc channel delivering notifications. Default: 1000.
    pub event_queue_size: usize,
    /// Longest silence between two received bytes before a port read
    /// completes. Default: 250 ms.
    pub read_interval_timeout: Duration,
    /// First buffer size tried for variable-length subsystem records.
    /// Default: 1088 bytes.
    pub initial_record_capacity: usize,
}

impl Default for ModemOptions {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_FRIENDLY_NAME.to_string(),
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
            read_interval_timeout: Duration::from_millis(READ_INTERVAL_TIMEOUT_MS),
            initial_record_capacity: INITIAL_RECORD_CAPACITY,
        }
    }
}

/// Values used by `connect_configured` and `initialize_default`
#[derive(Debug, Clone)]
struct DialSettings {
    app_name: String,
    device_id: u32,
    destination: String,
}

/// Open subsystem session and the token stopping its dispatcher
struct Session {
    handle: SessionHandle,
    stop: CancellationToken,
}

/// Data channel of the connected call
struct CommLink<P> {
    port: Arc<P>,
    stop: CancellationToken,
    writes: WriteTracker,
}

/// State shared between the handles, the dispatcher and the data path.
///
/// Each handle slot has its own lock and no code path holds two of them.
struct Inner<B: Telephony> {
    api: B,
    options: ModemOptions,
    settings: parking_lot::Mutex<DialSettings>,
    session: Mutex<Option<Session>>,
    line: Mutex<Option<LineHandle>>,
    call: Mutex<Option<CallHandle>>,
    comm: Mutex<Option<CommLink<B::Port>>>,
    /// Set while a line, call or comm handle is held; teardown claims it.
    link_active: AtomicBool,
    /// Bumped by every teardown so a concurrent comm setup can notice it.
    link_epoch: AtomicU64,
    /// Held for a whole teardown, and by `end_connection` across its reset.
    hangup: Mutex<()>,
    inbound: InboundBuffer,
    status_tx: watch::Sender<ModemStatus>,
    event_tx: mpsc::Sender<ModemEvent>,
    /// Set when notifications have been dropped due to a full queue
    event_overflow: AtomicBool,
    /// Total count of dropped notifications
    dropped_event_count: AtomicU64,
}

fn no_device_or(code: LineErrorCode, fallback: ErrorKind) -> ErrorKind {
    if code.is_no_device() {
        ErrorKind::NoDeviceFoundError
    } else {
        fallback
    }
}

impl<B: Telephony> Inner<B> {
    fn status(&self) -> ModemStatus {
        self.status_tx
            .borrow()
            .clone()
    }

    /// Try to deliver a notification via try_send.
    ///
    /// If the channel is full, drop it, set the overflow flag, and increment
    /// the dropped counter. Before each dispatch, check the overflow flag and
    /// attempt to deliver a QueueOverflow notification first.
    fn dispatch_event(&self, event: ModemEvent) {
        if self
            .event_overflow
            .load(Ordering::Relaxed)
        {
            match self
                .event_tx
                .try_send(ModemEvent::QueueOverflow)
            {
                Ok(()) => {
                    self.event_overflow
                        .store(false, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {}
            }
        }

        match self
            .event_tx
            .try_send(event)
        {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Event stream dropped, discarding {}", event);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.event_overflow
                    .store(true, Ordering::Relaxed);
                self.dropped_event_count
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Event queue full, dropping {}", event);
            }
        }
    }

    fn set_tapi_state(&self, state: TapiState) {
        let changed = self
            .status_tx
            .send_if_modified(|status| {
                let changed = status.tapi != state;
                status.tapi = state;
                changed
            });
        if changed {
            debug!("[STATE] tapi {}", state);
            self.dispatch_event(ModemEvent::TapiStateChanged(state));
        }
    }

    fn set_line_state(&self, state: LineState) {
        let changed = self
            .status_tx
            .send_if_modified(|status| {
                let changed = status.line != state;
                status.line = state;
                changed
            });
        if changed {
            debug!("[STATE] line {}", state);
            self.dispatch_event(ModemEvent::LineStateChanged(state));
        }
    }

    fn set_call_state(&self, state: CallState) {
        let changed = self
            .status_tx
            .send_if_modified(|status| {
                let changed = status.call != state;
                status.call = state;
                changed
            });
        if changed {
            debug!("[STATE] call {}", state);
            self.dispatch_event(ModemEvent::CallStateChanged(state));
        }
    }

    fn set_disconnect_reason(&self, reason: DisconnectReason) {
        debug!("[STATE] disconnect reason {}", reason);
        self.status_tx
            .send_modify(|status| status.disconnect_reason = reason);
    }

    fn raise_error(&self, kind: ErrorKind, code: Option<LineErrorCode>) {
        match (kind.is_session_fatal(), code) {
            (true, Some(code)) => error!("[ERROR] {}: {}", kind, code),
            (true, None) => error!("[ERROR] {}", kind),
            (false, Some(code)) => warn!("[ERROR] {}: {}", kind, code),
            (false, None) => warn!("[ERROR] {}", kind),
        }
        self.status_tx
            .send_modify(|status| status.error = Some(kind));
        self.dispatch_event(ModemEvent::Error(kind));
    }

    /// Raise `kind` and build the matching error for the caller.
    fn fail(&self, kind: ErrorKind, code: LineErrorCode) -> ModemError {
        self.raise_error(kind, Some(code));
        ModemError::Subsystem { kind, code }
    }

    async fn apply(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            trace!("[STATE] applying {:?}", effect);
            match effect {
                Effect::SetCallState(state) => self.set_call_state(state),
                Effect::SetLineState(state) => self.set_line_state(state),
                Effect::SetDisconnectReason(reason) => self.set_disconnect_reason(reason),
                Effect::AcquireComm => {
                    self.acquire_comm()
                        .await
                }
                Effect::Teardown => {
                    self.teardown()
                        .await
                }
                Effect::Shutdown => {
                    self.shutdown()
                        .await
                }
                Effect::RaiseError(kind, code) => self.raise_error(kind, code),
                Effect::EmitReply { request_id, result } => {
                    self.dispatch_event(ModemEvent::LineReply { request_id, result })
                }
            }
        }
    }

    async fn initialize(self: &Arc<Self>, app_name: &str) -> bool {
        let mut session = self
            .session
            .lock()
            .await;
        if session.is_some() {
            debug!("[INIT] already initialized");
            return false;
        }

        info!("[INIT] initializing telephony subsystem as '{}'", app_name);
        let init = loop {
            match self
                .api
                .initialize(app_name, TAPI_SUPPORTED_API)
            {
                Ok(init) => break init,
                Err(code) if code == LineErrorCode::REINIT => {
                    debug!("[INIT] subsystem reinitializing, retrying");
                    tokio::task::yield_now().await;
                }
                Err(code) => {
                    drop(session);
                    self.raise_error(ErrorKind::InitError, Some(code));
                    return false;
                }
            }
        };

        let stop = CancellationToken::new();
        tokio::spawn(signaling_loop(
            Arc::downgrade(self),
            init.notifier,
            stop.clone(),
        ));
        *session = Some(Session {
            handle: init.session,
            stop,
        });
        drop(session);

        info!(
            "[INIT] session ready, {} line devices available",
            init.device_count
        );
        self.set_tapi_state(TapiState::Initialized);
        true
    }

    async fn connect(&self, device_id: u32, number: &str) -> ModemResult<()> {
        let session = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.handle);
        let Some(session) = session else {
            debug!("[CONNECT] not initialized");
            return Err(ModemError::NotInitialized);
        };

        info!("[CONNECT] device {} dialing '{}'", device_id, number);
        let version = self
            .api
            .negotiate_api_version(session, device_id, TAPI_LOWEST_API, TAPI_SUPPORTED_API)
            .map_err(|code| self.fail(no_device_or(code, ErrorKind::NegotiationError), code))?;
        debug!("[CONNECT] negotiated API version {:#x}", version);

        let line = {
            let mut slot = self
                .line
                .lock()
                .await;
            let existing = *slot;
            match existing {
                Some(line) => line,
                None => {
                    let line = self
                        .api
                        .open_line(session, device_id, version, LINEMEDIAMODE_DATAMODEM)
                        .map_err(|code| {
                            self.fail(no_device_or(code, ErrorKind::LineOpenError), code)
                        })?;
                    *slot = Some(line);
                    self.link_active
                        .store(true, Ordering::Release);
                    debug!("[CONNECT] line {:?} opened", line);
                    self.set_line_state(LineState::Opened);

                    self.api
                        .set_status_messages(line, LINE_STATUS_MESSAGES)
                        .map_err(|code| {
                            self.fail(no_device_or(code, ErrorKind::OperationError), code)
                        })?;
                    line
                }
            }
        };

        let mut slot = self
            .call
            .lock()
            .await;
        if slot.is_some() {
            debug!("[CONNECT] call already in progress");
            return Ok(());
        }
        let (call, request) = self
            .api
            .make_call(line, number, &CallParams::default())
            .map_err(|code| self.fail(ErrorKind::CallMakeError, code))?;
        *slot = Some(call);
        self.link_active
            .store(true, Ordering::Release);
        info!("[CONNECT] call {:?} placed, request {:?}", call, request);
        Ok(())
    }

    /// Obtain and start the data channel of the connected call.
    async fn acquire_comm(self: &Arc<Self>) {
        let call = *self
            .call
            .lock()
            .await;
        let Some(call) = call else {
            debug!("[COMM] connected without a call, ignoring");
            return;
        };
        let epoch = self
            .link_epoch
            .load(Ordering::Acquire);

        let port = match negotiate_sized(self.options.initial_record_capacity, |capacity| {
            self.api
                .comm_handle(call, capacity)
        }) {
            Ok(port) => Arc::new(port),
            Err(code) => {
                self.raise_error(ErrorKind::CommAquireError, Some(code));
                self.teardown()
                    .await;
                return;
            }
        };

        let settings = CommSettings {
            read_interval_timeout: self.options.read_interval_timeout,
            ..CommSettings::default()
        };
        if let Err(e) = configure_port(&*port, &settings) {
            warn!("[COMM] port setup failed: {}", e);
            port.close();
            self.raise_error(ErrorKind::CommAquireError, None);
            self.teardown()
                .await;
            return;
        }

        let stop = CancellationToken::new();
        let mut entered_connected = false;
        {
            let mut comm = self
                .comm
                .lock()
                .await;
            if self
                .link_epoch
                .load(Ordering::Acquire)
                != epoch
            {
                drop(comm);
                debug!("[COMM] call torn down during setup, closing port");
                port.close();
                return;
            }
            *comm = Some(CommLink {
                port: port.clone(),
                stop: stop.clone(),
                writes: WriteTracker::new(),
            });
            self.status_tx
                .send_modify(|status| {
                    entered_connected = status.call != CallState::Connected;
                    status.comm_open = true;
                    status.call = CallState::Connected;
                    status.connected_gen += 1;
                });
        }

        tokio::spawn(comm_loop(Arc::downgrade(self), port, stop));
        info!("[CONNECT] data connection established");
        if entered_connected {
            self.dispatch_event(ModemEvent::CallStateChanged(CallState::Connected));
        }
        self.dispatch_event(ModemEvent::Connected);
    }

    /// Release call, line and comm handle. Only the first of several
    /// concurrent callers does the work.
    async fn teardown(&self) {
        let _hangup = self
            .hangup
            .lock()
            .await;
        self.teardown_locked()
            .await;
    }

    async fn teardown_locked(&self) {
        if self
            .status_tx
            .borrow()
            .tapi
            == TapiState::Uninitialized
        {
            trace!("[HANGUP] not initialized, nothing to release");
            return;
        }
        if !self
            .link_active
            .swap(false, Ordering::AcqRel)
        {
            trace!("[HANGUP] nothing to release");
            return;
        }
        self.link_epoch
            .fetch_add(1, Ordering::AcqRel);
        info!("[HANGUP] starting call hangup");

        self.release_comm()
            .await;

        let mut failure = None;
        let call = self
            .call
            .lock()
            .await
            .take();
        if let Some(call) = call {
            if let Err(e) = self
                .release_call(call)
                .await
            {
                failure = Some(e);
            }
        }

        let line = self
            .line
            .lock()
            .await
            .take();
        if let Some(line) = line {
            if failure.is_none() && machine::line_needs_close(&self.status()) {
                match self
                    .api
                    .close_line(line)
                {
                    Ok(()) => debug!("[HANGUP] line {:?} closed", line),
                    Err(code) => failure = Some((ErrorKind::LineDeallocationError, code)),
                }
            }
        }

        let status = self.status();
        if let Some(state) = machine::call_state_after_teardown(&status) {
            self.set_call_state(state);
        }
        if let Some(state) = machine::line_state_after_teardown(&status) {
            self.set_line_state(state);
        }

        if let Some((kind, code)) = failure {
            self.raise_error(kind, Some(code));
            self.release_session()
                .await;
        }

        self.status_tx
            .send_modify(|status| status.disconnected_gen += 1);
        info!("[HANGUP] hangup completed");
        self.dispatch_event(ModemEvent::Disconnected);
    }

    /// Stop the data path and close the comm handle, dropping pending writes.
    async fn release_comm(&self) {
        let mut left_connected = false;
        let link = {
            let mut comm = self
                .comm
                .lock()
                .await;
            let link = comm.take();
            self.status_tx
                .send_modify(|status| {
                    status.comm_open = false;
                    if status.call == CallState::Connected {
                        status.call = CallState::Default;
                        left_connected = true;
                    }
                });
            link
        };
        if left_connected {
            self.dispatch_event(ModemEvent::CallStateChanged(CallState::Default));
        }

        let Some(mut link) = link else {
            return;
        };
        link.stop
            .cancel();
        if let Err(e) = link
            .port
            .flush()
        {
            debug!("[HANGUP] flush failed: {}", e);
        }
        link.port
            .cancel_io();
        if !link
            .writes
            .is_empty()
        {
            debug!(
                "[HANGUP] dropping {} pending writes ({} bytes)",
                link.writes
                    .len(),
                link.writes
                    .pending_bytes()
            );
        }
        link.writes
            .abandon(&*link.port);
        link.port
            .close();
        debug!("[HANGUP] comm port deinitialized");
        if !self
            .inbound
            .is_empty()
        {
            debug!(
                "[HANGUP] {} received bytes left unread",
                self.inbound
                    .len()
            );
        }
    }

    async fn release_call(&self, call: CallHandle) -> Result<(), (ErrorKind, LineErrorCode)> {
        debug!("[HANGUP] acquiring state of call {:?}", call);
        let status = negotiate_sized(self.options.initial_record_capacity, |capacity| {
            self.api
                .call_status(call, capacity)
        })
        .map_err(|code| (ErrorKind::CallStatusAquireError, code))?;

        if !status.is_idle() {
            match self
                .api
                .drop_call(call)
            {
                Ok(request) => debug!("[HANGUP] drop requested as {:?}", request),
                Err(code) => debug!("[HANGUP] drop failed: {}", code),
            }
        }

        loop {
            match self
                .api
                .deallocate_call(call)
            {
                Ok(()) => break,
                Err(code) if code == LineErrorCode::INVALCALLSTATE => {
                    trace!("[HANGUP] call not idle yet, retrying deallocation");
                    tokio::task::yield_now().await;
                }
                Err(code) => return Err((ErrorKind::CallDeallocationError, code)),
            }
        }
        debug!("[HANGUP] call {:?} deallocated", call);
        Ok(())
    }

    /// End the subsystem session. Handles must already be released.
    async fn release_session(&self) {
        let session = self
            .session
            .lock()
            .await
            .take();
        let Some(session) = session else {
            return;
        };
        session
            .stop
            .cancel();
        self.link_active
            .store(false, Ordering::Release);
        if let Err(code) = self
            .api
            .shutdown(session.handle)
        {
            warn!("[INIT] subsystem shutdown failed: {}", code);
        }
        info!("[INIT] telephony subsystem shut down");
        self.set_tapi_state(TapiState::Uninitialized);
    }

    async fn shutdown(&self) {
        self.teardown()
            .await;
        self.release_session()
            .await;
    }

    async fn end_connection(self: &Arc<Self>) {
        let _hangup = self
            .hangup
            .lock()
            .await;
        if self
            .link_active
            .load(Ordering::Acquire)
        {
            info!("[HANGUP] connection ended by application");
            self.teardown_locked()
                .await;
        } else {
            debug!("[HANGUP] no connection to end, resetting call state");
        }
        self.apply(machine::on_end_connection())
            .await;
    }

    /// Pull and handle every queued subsystem message.
    async fn drain_signaling(self: &Arc<Self>, stop: &CancellationToken) {
        loop {
            if stop.is_cancelled() {
                return;
            }
            let session = self
                .session
                .lock()
                .await
                .as_ref()
                .map(|session| session.handle);
            let Some(session) = session else {
                return;
            };
            match poll_signaling_event(&self.api, session) {
                PollOutcome::NoMessage => return,
                PollOutcome::Fatal(code) => {
                    self.apply(machine::on_fatal_poll(code))
                        .await;
                    return;
                }
                PollOutcome::Message(message) => {
                    self.handle_message(&message)
                        .await
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, message: &LineMessage) {
        let Some(event) = SignalingEvent::decode(message) else {
            trace!("[SIGNAL] ignoring message {}", message.message_id);
            return;
        };
        let call = *self
            .call
            .lock()
            .await;
        let line = *self
            .line
            .lock()
            .await;
        if !event.is_addressed_to(call, line) {
            trace!("[SIGNAL] {:?} is not for the current call", event);
            return;
        }
        debug!("[SIGNAL] {:?}", event);
        let status = self.status();
        self.apply(machine::on_signaling_event(&status, &event))
            .await;
    }
}

#[async_trait]
impl<B: Telephony> DataPathEvents for Inner<B> {
    fn bytes_received(&self, bytes: &[u8]) {
        self.inbound
            .append(bytes);
        trace!("[COMM] {} bytes buffered", bytes.len());
        self.status_tx
            .send_modify(|status| status.ready_read_gen += 1);
        self.dispatch_event(ModemEvent::ReadyRead);
    }

    async fn transmit_drained(&self) {
        let reconciled = {
            let mut comm = self
                .comm
                .lock()
                .await;
            let Some(link) = comm.as_mut() else {
                return;
            };
            link.writes
                .reconcile(&*link.port)
        };
        match reconciled {
            Ok(0) => {}
            Ok(total) => self.dispatch_event(ModemEvent::BytesWritten(total)),
            Err(e) => {
                warn!("[WRITE] pending write failed: {}", e);
                self.raise_error(ErrorKind::CommWriteError, None);
                self.teardown()
                    .await;
            }
        }
    }

    async fn read_failed(&self, error: io::Error) {
        warn!("[COMM] data path failed: {}", error);
        self.raise_error(ErrorKind::CommReadError, None);
        self.teardown()
            .await;
    }
}

impl<B: Telephony> Drop for Inner<B> {
    fn drop(&mut self) {
        if let Some(mut link) = self
            .comm
            .get_mut()
            .take()
        {
            link.stop
                .cancel();
            link.port
                .cancel_io();
            link.writes
                .abandon(&*link.port);
            link.port
                .close();
        }
        if let Some(call) = self
            .call
            .get_mut()
            .take()
        {
            let _ = self
                .api
                .drop_call(call);
            let _ = self
                .api
                .deallocate_call(call);
        }
        if let Some(line) = self
            .line
            .get_mut()
            .take()
        {
            let _ = self
                .api
                .close_line(line);
        }
        if let Some(session) = self
            .session
            .get_mut()
            .take()
        {
            session
                .stop
                .cancel();
            let _ = self
                .api
                .shutdown(session.handle);
            debug!("[INIT] session released on drop");
        }
    }
}

/// Background signaling dispatcher
async fn signaling_loop<B: Telephony>(
    inner: Weak<Inner<B>>,
    notifier: Arc<Notify>,
    stop: CancellationToken,
) {
    let result = AssertUnwindSafe(signaling_loop_inner(inner, notifier, stop));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        error!("[SIGNAL] dispatcher task panicked");
    }
}

async fn signaling_loop_inner<B: Telephony>(
    inner: Weak<Inner<B>>,
    notifier: Arc<Notify>,
    stop: CancellationToken,
) {
    debug!("[SIGNAL] dispatcher started");
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("[SIGNAL] dispatcher stopped");
                return;
            }
            _ = notifier.notified() => {}
        }
        let Some(inner) = inner.upgrade() else {
            debug!("[SIGNAL] modem dropped, dispatcher exiting");
            return;
        };
        inner
            .drain_signaling(&stop)
            .await;
    }
}

/// Modem handle (Clone + Send)
///
/// Every clone drives the same call. Operations may run concurrently from
/// any task; state changes are reported through the [`ModemEventStream`]
/// returned alongside the handle. Dropping the last clone releases every
/// handle still held.
pub struct TapiModem<B: Telephony> {
    inner: Arc<Inner<B>>,
    status_rx: watch::Receiver<ModemStatus>,
}

impl<B: Telephony> Clone for TapiModem<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self
                .inner
                .clone(),
            status_rx: self
                .status_rx
                .clone(),
        }
    }
}

impl<B: Telephony> std::fmt::Debug for TapiModem<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("TapiModem")
            .field("tapi", &status.tapi)
            .field("line", &status.line)
            .field("call", &status.call)
            .field("connected", &status.is_connected())
            .finish()
    }
}

/// Notification receiver (!Clone)
///
/// An [`ModemEvent::QueueOverflow`] indicates that notifications were dropped
/// because the application fell behind. Use
/// [`TapiModem::dropped_event_count`] for the exact count.
pub struct ModemEventStream {
    rx: mpsc::Receiver<ModemEvent>,
    status_rx: watch::Receiver<ModemStatus>,
}

impl std::fmt::Debug for ModemEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemEventStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl<B: Telephony> TapiModem<B> {
    /// Create a modem over `api` with default options.
    pub fn new(api: B) -> (Self, ModemEventStream) {
        Self::with_options(api, ModemOptions::default())
    }

    /// Create a modem over `api` with custom options.
    pub fn with_options(api: B, options: ModemOptions) -> (Self, ModemEventStream) {
        let queue_size = options
            .event_queue_size
            .max(1);

        let (status_tx, status_rx) = watch::channel(ModemStatus::default());
        let status_rx2 = status_tx.subscribe();
        let (event_tx, event_rx) = mpsc::channel(queue_size);

        let inner = Arc::new(Inner {
            api,
            settings: parking_lot::Mutex::new(DialSettings {
                app_name: options
                    .app_name
                    .clone(),
                device_id: 0,
                destination: String::new(),
            }),
            options,
            session: Mutex::new(None),
            line: Mutex::new(None),
            call: Mutex::new(None),
            comm: Mutex::new(None),
            link_active: AtomicBool::new(false),
            link_epoch: AtomicU64::new(0),
            hangup: Mutex::new(()),
            inbound: InboundBuffer::new(),
            status_tx,
            event_tx,
            event_overflow: AtomicBool::new(false),
            dropped_event_count: AtomicU64::new(0),
        });

        let modem = TapiModem { inner, status_rx };
        let stream = ModemEventStream {
            rx: event_rx,
            status_rx: status_rx2,
        };
        (modem, stream)
    }

    /// Start a subsystem session and its signaling dispatcher.
    ///
    /// Returns `false` when already initialized, or when the subsystem
    /// refuses (an [`ErrorKind::InitError`] is raised). Must be called from
    /// within a tokio runtime.
    pub async fn initialize(&self, app_name: &str) -> bool {
        self.inner
            .initialize(app_name)
            .await
    }

    /// [`initialize`](Self::initialize) with the configured application name.
    pub async fn initialize_default(&self) -> bool {
        let app_name = self
            .friendly_name();
        self.initialize(&app_name)
            .await
    }

    /// Open the line on `device_id` and dial `number`.
    ///
    /// Returns once the call is placed; progress arrives as notifications
    /// and [`ModemEvent::Connected`] signals a usable data channel. Failures
    /// are also raised as [`ModemEvent::Error`], except
    /// [`ModemError::NotInitialized`].
    ///
    /// ```rust
    /// use tapi_modem_tokio::{sim::SimTelephony, CallState, TapiModem};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), tapi_modem_tokio::ModemError> {
    /// let (modem, _events) = TapiModem::new(SimTelephony::with_modems(1));
    /// modem.initialize("Example").await;
    /// modem.connect(0, "5550100").await?;
    /// assert_eq!(modem.call_state(), CallState::Default);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(&self, device_id: u32, number: &str) -> ModemResult<()> {
        {
            let mut settings = self
                .inner
                .settings
                .lock();
            settings.device_id = device_id;
            settings.destination = number.to_string();
        }
        self.inner
            .connect(device_id, number)
            .await
    }

    /// [`connect`](Self::connect) with the values set by
    /// [`set_device_id`](Self::set_device_id) and
    /// [`set_destination_number`](Self::set_destination_number).
    pub async fn connect_configured(&self) -> ModemResult<()> {
        let (device_id, destination) = {
            let settings = self
                .inner
                .settings
                .lock();
            (settings.device_id, settings.destination.clone())
        };
        self.inner
            .connect(device_id, &destination)
            .await
    }

    /// Hang up and release call, line and data channel.
    ///
    /// Afterwards the call is `Default`, the line `Closed` and the
    /// disconnect reason `ByFunction`, also after the remote end already
    /// hung up. Only changed states are notified. Unread inbound bytes stay
    /// readable.
    pub async fn end_connection(&self) {
        self.inner
            .end_connection()
            .await
    }

    /// Same as [`end_connection`](Self::end_connection).
    pub async fn close(&self) {
        self.end_connection()
            .await
    }

    /// Hang up, then end the subsystem session.
    pub async fn shutdown(&self) {
        info!("[INIT] shutdown requested");
        self.inner
            .shutdown()
            .await
    }

    /// Take up to `max_len` received bytes without waiting.
    pub fn read(&self, max_len: usize) -> Bytes {
        self.inner
            .inbound
            .read(max_len)
    }

    /// Take every received byte without waiting.
    pub fn read_all(&self) -> Bytes {
        self.inner
            .inbound
            .read_all()
    }

    /// Received bytes ready to be read.
    pub fn bytes_available(&self) -> usize {
        self.inner
            .inbound
            .len()
    }

    /// Submit `data` to the data channel without waiting for completion.
    ///
    /// Returns the number of bytes accepted. Completion of asynchronous
    /// writes is reported by [`ModemEvent::BytesWritten`]. A rejected write
    /// raises [`ErrorKind::CommWriteError`] and hangs up.
    pub async fn write(&self, data: &[u8]) -> ModemResult<usize> {
        let submitted = {
            let mut comm = self
                .inner
                .comm
                .lock()
                .await;
            let Some(link) = comm.as_mut() else {
                return Err(ModemError::NotConnected);
            };
            if data.is_empty() {
                return Ok(0);
            }
            link.writes
                .submit(&*link.port, data)
        };

        match submitted {
            Ok(WriteStart::Completed(n)) => Ok(n),
            Ok(WriteStart::Pending(_)) => Ok(data.len()),
            Err(e) => {
                warn!("[WRITE] write of {} bytes rejected: {}", data.len(), e);
                self.inner
                    .raise_error(ErrorKind::CommWriteError, None);
                self.inner
                    .teardown()
                    .await;
                Err(ModemError::Comm {
                    kind: ErrorKind::CommWriteError,
                    source: e,
                })
            }
        }
    }

    /// Wait until new bytes arrive.
    ///
    /// Returns `false` at once when there is no data connection, and on
    /// timeout.
    pub async fn wait_for_ready_read(&self, duration: Duration) -> bool {
        let mut rx = self
            .status_rx
            .clone();
        let start = {
            let status = rx.borrow_and_update();
            if !status.is_connected() {
                return false;
            }
            status.ready_read_gen
        };
        let arrived = match timeout(
            duration,
            rx.wait_for(|status| status.ready_read_gen != start || !status.is_connected()),
        )
        .await
        {
            Ok(Ok(status)) => status.ready_read_gen != start,
            _ => false,
        };
        arrived
    }

    /// Wait until the call connects or fails.
    ///
    /// Returns `true` when a data connection is up at the end, `true` at
    /// once when already connected, `false` when not initialized or on
    /// timeout.
    pub async fn wait_for_connected(&self, duration: Duration) -> bool {
        let mut rx = self
            .status_rx
            .clone();
        let (connected, disconnected) = {
            let status = rx.borrow_and_update();
            if status.tapi == TapiState::Uninitialized {
                return false;
            }
            if status.is_connected() {
                return true;
            }
            (status.connected_gen, status.disconnected_gen)
        };
        let is_connected = match timeout(
            duration,
            rx.wait_for(|status| {
                status.connected_gen != connected
                    || status.disconnected_gen != disconnected
                    || status.tapi == TapiState::Uninitialized
            }),
        )
        .await
        {
            Ok(Ok(status)) => status.call == CallState::Connected && status.comm_open,
            _ => false,
        };
        is_connected
    }

    /// Wait until the data connection is released.
    ///
    /// Returns `true` at once when there is no data connection, `false` on
    /// timeout.
    pub async fn wait_for_disconnected(&self, duration: Duration) -> bool {
        let mut rx = self
            .status_rx
            .clone();
        let start = {
            let status = rx.borrow_and_update();
            if !status.is_connected() {
                return true;
            }
            status.disconnected_gen
        };
        let disconnected = matches!(
            timeout(
                duration,
                rx.wait_for(|status| status.disconnected_gen != start),
            )
            .await,
            Ok(Ok(_))
        );
        disconnected
    }

    /// Last error raised, until [`clear_error`](Self::clear_error).
    pub fn error(&self) -> Option<ErrorKind> {
        self.status_rx
            .borrow()
            .error
    }

    pub fn clear_error(&self) {
        self.inner
            .status_tx
            .send_modify(|status| status.error = None);
    }

    pub fn tapi_state(&self) -> TapiState {
        self.status_rx
            .borrow()
            .tapi
    }

    pub fn line_state(&self) -> LineState {
        self.status_rx
            .borrow()
            .line
    }

    pub fn call_state(&self) -> CallState {
        self.status_rx
            .borrow()
            .call
    }

    pub fn disconnect_reason(&self) -> DisconnectReason {
        self.status_rx
            .borrow()
            .disconnect_reason
    }

    /// Current status snapshot.
    pub fn status(&self) -> ModemStatus {
        self.status_rx
            .borrow()
            .clone()
    }

    /// Whether a data connection is up.
    pub fn is_connected(&self) -> bool {
        self.status_rx
            .borrow()
            .is_connected()
    }

    /// Number of notifications dropped due to a full queue.
    pub fn dropped_event_count(&self) -> u64 {
        self.inner
            .dropped_event_count
            .load(Ordering::Relaxed)
    }

    pub fn options(&self) -> &ModemOptions {
        &self
            .inner
            .options
    }

    pub fn device_id(&self) -> u32 {
        self.inner
            .settings
            .lock()
            .device_id
    }

    /// Device used by [`connect_configured`](Self::connect_configured).
    pub fn set_device_id(&self, device_id: u32) {
        self.inner
            .settings
            .lock()
            .device_id = device_id;
    }

    pub fn destination_number(&self) -> String {
        self.inner
            .settings
            .lock()
            .destination
            .clone()
    }

    /// Number dialed by [`connect_configured`](Self::connect_configured).
    pub fn set_destination_number(&self, number: impl Into<String>) {
        self.inner
            .settings
            .lock()
            .destination = number.into();
    }

    pub fn friendly_name(&self) -> String {
        self.inner
            .settings
            .lock()
            .app_name
            .clone()
    }

    /// Application name used by [`initialize_default`](Self::initialize_default).
    pub fn set_friendly_name(&self, name: impl Into<String>) {
        self.inner
            .settings
            .lock()
            .app_name = name.into();
    }
}

impl ModemEventStream {
    /// Receive the next notification, or None once every modem handle is gone.
    pub async fn recv(&mut self) -> Option<ModemEvent> {
        self.rx
            .recv()
            .await
    }

    /// Take the next notification if one is queued.
    pub fn try_recv(&mut self) -> Option<ModemEvent> {
        self.rx
            .try_recv()
            .ok()
    }

    /// Whether a data connection is up.
    pub fn is_connected(&self) -> bool {
        self.status_rx
            .borrow()
            .is_connected()
    }

    /// Current status snapshot.
    pub fn status(&self) -> ModemStatus {
        self.status_rx
            .borrow()
            .clone()
    }
}

impl futures_util::Stream for ModemEventStream {
    type Item = ModemEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
