//! Async TAPI dial-up modem client for Rust
//!
//! This crate drives a data-modem call through the Windows Telephony API
//! (TAPI 2.x) and exposes the connected call as a byte stream: initialize a
//! session, dial a number, then read and write raw bytes over the modem's
//! comm port until either side hangs up.
//!
//! # Architecture
//!
//! The library uses a handle/notification split:
//! - [`TapiModem`] (Clone + Send) drives the call from any task
//! - [`ModemEventStream`] receives state changes, errors and data-ready
//!   notifications produced by two background tasks: the signaling
//!   dispatcher, woken by the subsystem's event handle, and the data path of
//!   the connected call
//!
//! The subsystem itself sits behind the [`Telephony`] and [`CommPort`]
//! traits. A native backend wraps the `line*` and comm-port calls;
//! [`sim::SimTelephony`] is an in-process implementation for tests and
//! demos.
//!
//! # Examples
//!
//! ## Dialing
//!
//! ```rust
//! use std::time::Duration;
//! use tapi_modem_tokio::sim::SimTelephony;
//! use tapi_modem_tokio::{constants::*, ModemError, ModemEvent, TapiModem};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), ModemError> {
//!     let sim = SimTelephony::with_modems(1);
//!     let (modem, mut events) = TapiModem::new(sim.clone());
//!
//!     modem.initialize("Terminal").await;
//!     modem.connect(0, "5550100").await?;
//!
//!     // The simulated remote end answers.
//!     sim.signal_call_state(LINECALLSTATE_CONNECTED, 0);
//!     assert!(modem.wait_for_connected(Duration::from_secs(5)).await);
//!
//!     modem.write(b"ATI\r").await?;
//!     sim.last_port().unwrap().feed(b"OK\r\n");
//!
//!     while let Some(event) = events.recv().await {
//!         if event == ModemEvent::ReadyRead {
//!             assert_eq!(&modem.read_all()[..], b"OK\r\n");
//!             break;
//!         }
//!     }
//!
//!     modem.end_connection().await;
//!     modem.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Listing Modems
//!
//! ```rust
//! use tapi_modem_tokio::{sim::SimTelephony, ModemInfo};
//!
//! let sim = SimTelephony::with_modems(2);
//! for modem in ModemInfo::available_modems(&sim) {
//!     println!("{}: {}", modem.device_id, modem.name);
//! }
//! ```
//!
//! ## Dialable Numbers
//!
//! ```rust
//! use tapi_modem_tokio::DialableNumberBuilder;
//!
//! let number = DialableNumberBuilder::new()
//!     .country_code(44)
//!     .area_code(20)
//!     .number("79460000")
//!     .build();
//! assert_eq!(number, "+ 44 [20] 79460000");
//! ```

#[macro_use]
mod macros;

pub mod backend;
pub mod constants;
pub mod device;
pub mod dialable;
pub mod error;
pub mod event;
pub mod modem;
pub mod negotiate;
pub mod signaling;
pub mod sim;
pub mod state;

pub(crate) mod buffer;
pub(crate) mod datapath;
pub(crate) mod machine;
pub(crate) mod writer;

pub use backend::{
    CallHandle, CallParams, CallStatus, CommEvents, CommPort, CommSettings, DeviceCaps,
    LineErrorCode, LineHandle, LineMessage, RequestId, SessionHandle, SessionInit, Telephony,
    WriteStart, WriteStatus, WriteToken,
};
pub use device::ModemInfo;
pub use dialable::DialableNumberBuilder;
pub use error::{ErrorKind, ModemError, ModemResult};
pub use event::ModemEvent;
pub use modem::{ModemEventStream, ModemOptions, TapiModem};
pub use negotiate::{negotiate_sized, Negotiated};
pub use signaling::{
    poll_signaling_event, CallProgress, LineDeviceChange, PollOutcome, SignalingEvent,
};
pub use state::{CallState, DisconnectReason, LineState, ModemStatus, TapiState};
