//! End-to-end scenarios against the in-process telephony subsystem.

use std::time::Duration;

use futures_util::StreamExt;
use tapi_modem_tokio::constants::*;
use tapi_modem_tokio::sim::{SimCommPort, SimDevice, SimOp, SimTelephony, SimWriteMode};
use tapi_modem_tokio::{
    CallHandle, CallState, DisconnectReason, ErrorKind, LineErrorCode, LineState, ModemError,
    ModemEvent, ModemEventStream, RequestId, TapiModem, TapiState,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn configure_tracing() {
    use std::sync::OnceLock;
    static TRACING_INIT: OnceLock<()> = OnceLock::new();
    TRACING_INIT.get_or_init(|| {
        let _ = tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                        .from_env_lossy(),
                )
                .with_test_writer()
                .finish(),
        );
    });
}

async fn next_event(events: &mut ModemEventStream) -> ModemEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("event stream closed")
}

async fn expect_events(events: &mut ModemEventStream, expected: &[ModemEvent]) {
    for want in expected {
        assert_eq!(next_event(events).await, *want);
    }
}

/// Push a marker reply through the dispatcher and check nothing else was
/// queued before it.
async fn assert_quiet(sim: &SimTelephony, events: &mut ModemEventStream) {
    let marker = RequestId(0xFFFF);
    sim.signal_reply(marker, 0);
    assert_eq!(
        next_event(events).await,
        ModemEvent::LineReply {
            request_id: marker,
            result: 0
        }
    );
}

struct Connected {
    sim: SimTelephony,
    modem: TapiModem<SimTelephony>,
    events: ModemEventStream,
    port: SimCommPort,
}

async fn initialized(sim: &SimTelephony) -> (TapiModem<SimTelephony>, ModemEventStream) {
    configure_tracing();
    let (modem, mut events) = TapiModem::new(sim.clone());
    assert!(modem
        .initialize("Test Terminal")
        .await);
    expect_events(
        &mut events,
        &[ModemEvent::TapiStateChanged(TapiState::Initialized)],
    )
    .await;
    (modem, events)
}

async fn connected(sim: SimTelephony) -> Connected {
    let (modem, mut events) = initialized(&sim).await;
    modem
        .connect(3, "+1-555-0100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_DIALING, 0);
    sim.signal_call_state(LINECALLSTATE_CONNECTED, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::CallStateChanged(CallState::Dialing),
            ModemEvent::CallStateChanged(CallState::Connected),
            ModemEvent::Connected,
        ],
    )
    .await;
    let port = sim
        .last_port()
        .expect("comm port handed out");
    Connected {
        sim,
        modem,
        events,
        port,
    }
}

const TEARDOWN_EVENTS: [ModemEvent; 3] = [
    ModemEvent::CallStateChanged(CallState::Default),
    ModemEvent::LineStateChanged(LineState::Closed),
    ModemEvent::Disconnected,
];

#[tokio::test]
async fn dial_and_connect() {
    let Connected {
        sim,
        modem,
        mut events,
        port,
    } = connected(SimTelephony::with_modems(4)).await;

    assert_eq!(sim.dialed_number(), Some("+1-555-0100".to_string()));
    assert_eq!(modem.device_id(), 3);
    assert_eq!(modem.destination_number(), "+1-555-0100");
    assert!(modem.is_connected());
    assert!(events.is_connected());
    assert_eq!(modem.line_state(), LineState::Opened);
    assert_eq!(modem.call_state(), CallState::Connected);
    assert!(modem
        .status()
        .comm_open);

    let settings = port
        .settings()
        .expect("port configured");
    assert_eq!(settings.read_interval_timeout, Duration::from_millis(250));

    // A repeated CONNECTED does not acquire a second data channel.
    sim.signal_call_state(LINECALLSTATE_CONNECTED, 0);
    assert_quiet(&sim, &mut events).await;
    assert_eq!(sim.count(SimOp::CommHandle), 1);
    assert_eq!(
        sim.count(SimOp::SetStatusMessages),
        1,
        "line status messages are requested once"
    );
}

#[tokio::test]
async fn received_bytes_are_buffered() {
    let Connected {
        modem,
        mut events,
        port,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    port.feed(b"0123456789");
    expect_events(&mut events, &[ModemEvent::ReadyRead]).await;
    assert_eq!(modem.bytes_available(), 10);
    assert_eq!(&modem.read(4)[..], b"0123");
    assert_eq!(modem.bytes_available(), 6);
    assert_eq!(&modem.read_all()[..], b"456789");
    assert!(modem
        .read(8)
        .is_empty());
}

#[tokio::test]
async fn line_close_drops_pending_writes() {
    let Connected {
        sim,
        modem,
        mut events,
        port,
    } = connected(SimTelephony::with_modems(4)).await;

    port.set_write_mode(SimWriteMode::Pending);
    assert_eq!(
        modem
            .write(b"hello")
            .await
            .unwrap(),
        5
    );
    assert_eq!(port.pending_writes(), 1);

    sim.signal_line_closed();
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::CallStateChanged(CallState::Default),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_quiet(&sim, &mut events).await;

    assert!(port.is_closed());
    assert!(port.io_cancelled());
    assert_eq!(port.cancelled_writes(), 1);
    assert_eq!(port.pending_writes(), 0);
    assert!(!modem.is_connected());
    assert!(!modem
        .status()
        .comm_open);
    assert_eq!(sim.count(SimOp::CloseLine), 0);
    assert_eq!(sim.active_calls(), 0);
}

#[tokio::test]
async fn end_connection_is_idempotent() {
    let Connected {
        sim,
        modem,
        mut events,
        port,
    } = connected(SimTelephony::with_modems(4)).await;

    let other = modem.clone();
    tokio::join!(modem.end_connection(), other.end_connection());
    modem
        .end_connection()
        .await;

    expect_events(&mut events, &TEARDOWN_EVENTS).await;
    assert_quiet(&sim, &mut events).await;

    assert_eq!(modem.call_state(), CallState::Default);
    assert_eq!(modem.line_state(), LineState::Closed);
    assert_eq!(modem.disconnect_reason(), DisconnectReason::ByFunction);
    assert_eq!(sim.count(SimOp::CloseLine), 1);
    assert_eq!(sim.count(SimOp::DropCall), 1);
    assert_eq!(sim.open_lines(), 0);
    assert_eq!(sim.active_calls(), 0);
    assert!(port.is_closed());
    assert!(port.was_flushed());
    assert!(sim.is_initialized());
}

#[tokio::test]
async fn end_connection_without_connection_is_silent() {
    configure_tracing();
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = TapiModem::new(sim.clone());
    modem
        .close()
        .await;
    assert_eq!(events.try_recv(), None);

    assert!(modem
        .initialize("Test Terminal")
        .await);
    expect_events(
        &mut events,
        &[ModemEvent::TapiStateChanged(TapiState::Initialized)],
    )
    .await;
    modem
        .end_connection()
        .await;
    assert_quiet(&sim, &mut events).await;
    assert_eq!(modem.call_state(), CallState::Default);
    assert_eq!(modem.line_state(), LineState::Closed);
    assert_eq!(modem.disconnect_reason(), DisconnectReason::ByFunction);
    assert_eq!(sim.count(SimOp::DropCall), 0);
}

#[tokio::test]
async fn connected_state_follows_comm_handle() {
    let Connected {
        modem, mut events, ..
    } = connected(SimTelephony::with_modems(4)).await;

    let status = modem.status();
    assert_eq!(status.call, CallState::Connected);
    assert!(status.comm_open);

    modem
        .end_connection()
        .await;
    expect_events(&mut events, &TEARDOWN_EVENTS).await;
    let status = modem.status();
    assert_ne!(status.call, CallState::Connected);
    assert!(!status.comm_open);
}

#[tokio::test]
async fn busy_tears_down() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_BUSY, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::CallStateChanged(CallState::Busy),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(modem.call_state(), CallState::Busy);
    assert_eq!(sim.count(SimOp::DropCall), 1);
    assert_eq!(sim.count(SimOp::CommHandle), 0);
    assert_eq!(sim.open_lines(), 0);
}

#[tokio::test]
async fn end_connection_after_busy_resets_call() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_BUSY, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::CallStateChanged(CallState::Busy),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;

    modem
        .end_connection()
        .await;
    expect_events(
        &mut events,
        &[ModemEvent::CallStateChanged(CallState::Default)],
    )
    .await;
    assert_quiet(&sim, &mut events).await;

    assert_eq!(modem.call_state(), CallState::Default);
    assert_eq!(modem.line_state(), LineState::Closed);
    assert_eq!(modem.disconnect_reason(), DisconnectReason::ByFunction);
    assert_eq!(sim.count(SimOp::DropCall), 1);
    assert_eq!(sim.count(SimOp::CloseLine), 1);
}

#[tokio::test]
async fn idle_call_is_not_dropped() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_IDLE, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::CallStateChanged(CallState::Idle),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(sim.count(SimOp::DropCall), 0);
    assert_eq!(sim.count(SimOp::DeallocateCall), 1);
}

#[tokio::test]
async fn special_info_means_cannot_dial() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_SPECIALINFO, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::CallStateChanged(CallState::CannotDial),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
}

#[tokio::test]
async fn remote_disconnect_records_reason() {
    let Connected {
        modem,
        mut events,
        sim,
        port,
    } = connected(SimTelephony::with_modems(4)).await;

    sim.signal_call_state(LINECALLSTATE_DISCONNECTED, LINEDISCONNECTMODE_NOANSWER);
    expect_events(
        &mut events,
        &[
            ModemEvent::CallStateChanged(CallState::Disconnected),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(modem.disconnect_reason(), DisconnectReason::NoAnswer);
    assert_eq!(modem.call_state(), CallState::Disconnected);
    assert!(port.is_closed());
}

#[tokio::test]
async fn line_device_failure_tears_down() {
    let Connected {
        modem,
        mut events,
        sim,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    sim.signal_line_device_state(LINEDEVSTATE_OUTOFSERVICE, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::OutOfService),
            ModemEvent::CallStateChanged(CallState::Default),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(modem.line_state(), LineState::OutOfService);
    assert_eq!(sim.count(SimOp::CloseLine), 1);
    assert!(sim.is_initialized());
}

#[tokio::test]
async fn reinit_shuts_down_session() {
    let Connected {
        modem,
        mut events,
        sim,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    // A reinit with a reason is informational.
    sim.signal_line_device_state(LINEDEVSTATE_REINIT, 4);
    assert_quiet(&sim, &mut events).await;

    sim.signal_line_device_state(LINEDEVSTATE_REINIT, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Reinitialization),
            ModemEvent::CallStateChanged(CallState::Default),
            ModemEvent::Disconnected,
            ModemEvent::TapiStateChanged(TapiState::Uninitialized),
        ],
    )
    .await;
    assert!(!sim.is_initialized());
    assert_eq!(modem.tapi_state(), TapiState::Uninitialized);
    assert_eq!(sim.count(SimOp::Shutdown), 1);

    // The session can be started again.
    assert!(modem
        .initialize_default()
        .await);
}

#[tokio::test]
async fn fatal_poll_shuts_down() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;

    sim.fail_next(SimOp::PollMessage, LineErrorCode::NOMEM);
    sim.signal_reply(RequestId(1), 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::TapiStateChanged(TapiState::Uninitialized),
            ModemEvent::Error(ErrorKind::OperationError),
        ],
    )
    .await;
    assert_eq!(modem.error(), Some(ErrorKind::OperationError));
    assert!(!sim.is_initialized());

    modem.clear_error();
    assert_eq!(modem.error(), None);
}

#[tokio::test]
async fn replies_are_forwarded_or_fail_the_call() {
    let Connected {
        modem,
        mut events,
        sim,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    sim.signal_reply(RequestId(7), 0);
    expect_events(
        &mut events,
        &[ModemEvent::LineReply {
            request_id: RequestId(7),
            result: 0,
        }],
    )
    .await;

    sim.signal_reply(RequestId(8), LineErrorCode::OPERATIONFAILED.0);
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::LineReplyError)]).await;
    expect_events(&mut events, &TEARDOWN_EVENTS).await;
    assert_eq!(modem.error(), Some(ErrorKind::LineReplyError));
}

#[tokio::test]
async fn writes_report_completion() {
    let Connected {
        modem,
        mut events,
        sim,
        port,
    } = connected(SimTelephony::with_modems(4)).await;

    // Synchronous completion: no notification.
    assert_eq!(
        modem
            .write(b"ATZ\r")
            .await
            .unwrap(),
        4
    );
    assert_eq!(port.transmitted(), b"ATZ\r");
    assert_eq!(
        modem
            .write(b"")
            .await
            .unwrap(),
        0
    );
    assert_quiet(&sim, &mut events).await;

    port.set_write_mode(SimWriteMode::Pending);
    modem
        .write(b"hello")
        .await
        .unwrap();
    modem
        .write(b"abc")
        .await
        .unwrap();
    port.complete_writes();
    expect_events(&mut events, &[ModemEvent::BytesWritten(8)]).await;
    assert!(modem.is_connected());
}

#[tokio::test]
async fn rejected_write_hangs_up() {
    let Connected {
        modem,
        mut events,
        port,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    port.set_write_mode(SimWriteMode::Reject);
    let err = modem
        .write(b"x")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModemError::Comm {
            kind: ErrorKind::CommWriteError,
            ..
        }
    ));
    assert_eq!(err.kind(), Some(ErrorKind::CommWriteError));
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::CommWriteError)]).await;
    expect_events(&mut events, &TEARDOWN_EVENTS).await;

    assert!(matches!(
        modem
            .write(b"x")
            .await,
        Err(ModemError::NotConnected)
    ));
}

#[tokio::test]
async fn failed_pending_write_hangs_up() {
    let Connected {
        modem,
        mut events,
        port,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    port.set_write_mode(SimWriteMode::Pending);
    modem
        .write(b"hello")
        .await
        .unwrap();
    port.fail_pending_writes();
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::CommWriteError)]).await;
    expect_events(&mut events, &TEARDOWN_EVENTS).await;
    assert!(port.is_closed());
}

#[tokio::test]
async fn read_failure_hangs_up() {
    let Connected {
        modem,
        mut events,
        port,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    port.fail_reads(true);
    port.feed(b"x");
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::CommReadError)]).await;
    expect_events(&mut events, &TEARDOWN_EVENTS).await;
    assert_eq!(modem.error(), Some(ErrorKind::CommReadError));
    assert!(!modem.is_connected());
}

#[tokio::test]
async fn initialize_retries_while_reinitializing() {
    configure_tracing();
    let sim = SimTelephony::with_modems(1);
    sim.reinit_in_progress(2);
    let (modem, _events) = TapiModem::new(sim.clone());
    assert!(modem
        .initialize("Test Terminal")
        .await);
    assert!(!modem
        .initialize("Test Terminal")
        .await);
    assert_eq!(sim.count(SimOp::Initialize), 3);
    assert_eq!(modem.tapi_state(), TapiState::Initialized);
}

#[tokio::test]
async fn initialize_failure_is_reported() {
    configure_tracing();
    let sim = SimTelephony::with_modems(1);
    sim.fail_next(SimOp::Initialize, LineErrorCode::NOMEM);
    let (modem, mut events) = TapiModem::new(sim);
    assert!(!modem
        .initialize("Test Terminal")
        .await);
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::InitError)]).await;
    assert_eq!(modem.tapi_state(), TapiState::Uninitialized);
}

#[tokio::test]
async fn connect_reports_missing_device() {
    let sim = SimTelephony::with_modems(2);
    let (modem, mut events) = initialized(&sim).await;

    let err = modem
        .connect(9, "5550100")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModemError::Subsystem {
            kind: ErrorKind::NoDeviceFoundError,
            code: LineErrorCode::BADDEVICEID,
        }
    ));
    expect_events(
        &mut events,
        &[ModemEvent::Error(ErrorKind::NoDeviceFoundError)],
    )
    .await;
    assert_eq!(sim.count(SimOp::OpenLine), 0);
}

#[tokio::test]
async fn connect_reports_negotiation_failure() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;
    sim.fail_next(SimOp::NegotiateApiVersion, LineErrorCode::INCOMPATIBLEAPIVERSION);

    let err = modem
        .connect(0, "5550100")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NegotiationError));
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::NegotiationError)]).await;
}

#[tokio::test]
async fn connect_reports_line_open_failure() {
    let sim = SimTelephony::new(vec![SimDevice {
        open_error: Some(LineErrorCode::ALLOCATED),
        ..SimDevice::modem("Busy Modem")
    }]);
    let (modem, mut events) = initialized(&sim).await;

    let err = modem
        .connect(0, "5550100")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::LineOpenError));
    expect_events(&mut events, &[ModemEvent::Error(ErrorKind::LineOpenError)]).await;
    assert_eq!(modem.line_state(), LineState::Closed);

    // Nothing is held and the states are already reset, so hanging up is silent.
    modem
        .end_connection()
        .await;
    assert_quiet(&sim, &mut events).await;
}

#[tokio::test]
async fn connect_reports_call_failure_and_keeps_line() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;

    let err = modem
        .connect(0, "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModemError::Subsystem {
            kind: ErrorKind::CallMakeError,
            code: LineErrorCode::INVALADDRESS,
        }
    ));
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::Error(ErrorKind::CallMakeError),
        ],
    )
    .await;
    assert_eq!(sim.open_lines(), 1);

    modem
        .end_connection()
        .await;
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(sim.open_lines(), 0);
}

#[tokio::test]
async fn connect_configured_uses_stored_settings() {
    let sim = SimTelephony::with_modems(2);
    let (modem, _events) = initialized(&sim).await;
    modem.set_device_id(1);
    modem.set_destination_number("5550199");
    modem
        .connect_configured()
        .await
        .unwrap();
    assert_eq!(sim.dialed_number(), Some("5550199".to_string()));

    // A call in progress is reused.
    modem
        .connect_configured()
        .await
        .unwrap();
    assert_eq!(sim.count(SimOp::MakeCall), 1);
    assert_eq!(sim.count(SimOp::OpenLine), 1);
}

#[tokio::test]
async fn large_comm_record_is_renegotiated() {
    let sim = SimTelephony::with_modems(4);
    sim.set_record_size(INITIAL_RECORD_CAPACITY * 4);
    let Connected { sim, modem, .. } = connected(sim).await;
    assert_eq!(sim.count(SimOp::CommHandle), 2);
    assert!(modem.is_connected());
}

#[tokio::test]
async fn non_character_comm_handle_is_rejected() {
    let sim = SimTelephony::with_modems(1);
    sim.set_char_device(false);
    let (modem, mut events) = initialized(&sim).await;
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_CONNECTED, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::Error(ErrorKind::CommAquireError),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert!(sim
        .last_port()
        .expect("comm handle was obtained")
        .is_closed());
    assert!(!modem.is_connected());
    assert_ne!(modem.call_state(), CallState::Connected);
}

#[tokio::test]
async fn comm_handle_failure_is_reported() {
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = initialized(&sim).await;
    sim.fail_next(SimOp::CommHandle, LineErrorCode::OPERATIONUNAVAIL);
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    sim.signal_call_state(LINECALLSTATE_CONNECTED, 0);
    expect_events(
        &mut events,
        &[
            ModemEvent::LineStateChanged(LineState::Opened),
            ModemEvent::Error(ErrorKind::CommAquireError),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(modem.error(), Some(ErrorKind::CommAquireError));
}

#[tokio::test]
async fn events_for_other_calls_are_ignored() {
    let Connected {
        sim,
        modem,
        mut events,
        ..
    } = connected(SimTelephony::with_modems(4)).await;
    let call = sim
        .last_call()
        .expect("call placed");

    sim.signal_call_state_on(CallHandle(0xDEAD), LINECALLSTATE_BUSY, 0);
    assert_quiet(&sim, &mut events).await;
    assert_eq!(modem.call_state(), CallState::Connected);

    modem
        .end_connection()
        .await;
    expect_events(&mut events, &TEARDOWN_EVENTS).await;

    // Late progress for the released call.
    sim.signal_call_state_on(call, LINECALLSTATE_CONNECTED, 0);
    assert_quiet(&sim, &mut events).await;
    assert_eq!(sim.count(SimOp::CommHandle), 1);
    assert!(!modem.is_connected());
}

#[tokio::test]
async fn call_state_teardown_failure_ends_session() {
    let Connected {
        sim,
        modem,
        mut events,
        ..
    } = connected(SimTelephony::with_modems(4)).await;

    sim.fail_next(SimOp::CallStatus, LineErrorCode::NOMEM);
    modem
        .end_connection()
        .await;
    expect_events(
        &mut events,
        &[
            ModemEvent::CallStateChanged(CallState::Default),
            ModemEvent::LineStateChanged(LineState::Closed),
            ModemEvent::Error(ErrorKind::CallStatusAquireError),
            ModemEvent::TapiStateChanged(TapiState::Uninitialized),
            ModemEvent::Disconnected,
        ],
    )
    .await;
    assert_eq!(sim.count(SimOp::CloseLine), 0);
    assert!(!sim.is_initialized());
}

#[tokio::test]
async fn wait_helpers() {
    configure_tracing();
    let sim = SimTelephony::with_modems(1);
    let (modem, mut events) = TapiModem::new(sim.clone());
    assert!(
        !modem
            .wait_for_connected(Duration::from_millis(20))
            .await
    );

    assert!(modem
        .initialize("Test Terminal")
        .await);
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    assert!(
        !modem
            .wait_for_connected(Duration::from_millis(20))
            .await,
        "no answer yet"
    );

    let answer = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        answer.signal_call_state(LINECALLSTATE_CONNECTED, 0);
    });
    assert!(modem
        .wait_for_connected(EVENT_TIMEOUT)
        .await);
    assert!(modem
        .wait_for_connected(Duration::from_millis(1))
        .await);

    let port = sim
        .last_port()
        .expect("comm port handed out");
    let feeder = port.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.feed(b"RING");
    });
    assert!(modem
        .wait_for_ready_read(EVENT_TIMEOUT)
        .await);
    assert_eq!(&modem.read_all()[..], b"RING");

    assert!(
        !modem
            .wait_for_disconnected(Duration::from_millis(20))
            .await
    );
    let hangup = modem.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        hangup
            .end_connection()
            .await;
    });
    assert!(modem
        .wait_for_disconnected(EVENT_TIMEOUT)
        .await);
    assert!(modem
        .wait_for_disconnected(Duration::from_millis(1))
        .await);
    assert!(
        !modem
            .wait_for_ready_read(Duration::from_millis(1))
            .await
    );

    // The stream interface sees the same notifications.
    let first = tokio::time::timeout(EVENT_TIMEOUT, events.next())
        .await
        .unwrap();
    assert_eq!(
        first,
        Some(ModemEvent::TapiStateChanged(TapiState::Initialized))
    );
}

#[tokio::test]
async fn failed_dial_ends_wait_for_connected() {
    let sim = SimTelephony::with_modems(1);
    let (modem, _events) = initialized(&sim).await;
    modem
        .connect(0, "5550100")
        .await
        .unwrap();
    let busy = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        busy.signal_call_state(LINECALLSTATE_BUSY, 0);
    });
    let started = tokio::time::Instant::now();
    assert!(!modem
        .wait_for_connected(EVENT_TIMEOUT)
        .await);
    assert!(started.elapsed() < EVENT_TIMEOUT);
}

#[tokio::test]
async fn dropping_the_modem_releases_everything() {
    let Connected {
        sim, modem, port, ..
    } = connected(SimTelephony::with_modems(4)).await;

    drop(modem);
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while sim.is_initialized() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("session released on drop");
    assert_eq!(sim.open_lines(), 0);
    assert_eq!(sim.active_calls(), 0);
    assert!(port.is_closed());
}
