//! Dial a simulated modem, exchange a few lines and hang up.
//!
//! Run with: cargo run --example sim_terminal
//! Set RUST_LOG=tapi_modem_tokio=debug to follow the call setup.

use std::time::Duration;

use futures_util::StreamExt;
use tapi_modem_tokio::constants::*;
use tapi_modem_tokio::sim::SimTelephony;
use tapi_modem_tokio::{DialableNumberBuilder, ModemEvent, ModemInfo, TapiModem};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let sim = SimTelephony::with_modems(2);
    for modem in ModemInfo::available_modems(&sim) {
        info!("modem {}: {}", modem.device_id, modem.name);
    }

    let (modem, mut events) = TapiModem::new(sim.clone());
    modem.set_friendly_name("Sim Terminal");
    if !modem
        .initialize_default()
        .await
    {
        return Err("telephony subsystem unavailable".into());
    }

    let number = DialableNumberBuilder::new()
        .country_code(1)
        .area_code(555)
        .number("0100")
        .build();
    modem
        .connect(1, &number)
        .await?;

    // Play the remote end: ring, answer, greet.
    let remote = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        remote.signal_call_state(LINECALLSTATE_DIALING, 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        remote.signal_call_state(LINECALLSTATE_CONNECTED, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(port) = remote.last_port() {
            port.feed(b"CONNECT 33600\r\nWelcome to the sim BBS\r\n");
            tokio::time::sleep(Duration::from_millis(200)).await;
            port.feed(b"Goodbye\r\n");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        remote.signal_call_state(LINECALLSTATE_DISCONNECTED, LINEDISCONNECTMODE_NORMAL);
    });

    if !modem
        .wait_for_connected(Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS))
        .await
    {
        warn!("no connection: {}", modem.call_state());
        modem
            .shutdown()
            .await;
        return Ok(());
    }
    info!("connected to {}", modem.destination_number());
    modem
        .write(b"ATI\r")
        .await?;

    while let Some(event) = events
        .next()
        .await
    {
        match event {
            ModemEvent::ReadyRead => {
                let data = modem.read_all();
                print!("{}", String::from_utf8_lossy(&data));
            }
            ModemEvent::Error(kind) => {
                warn!("modem error: {}", kind);
                modem
                    .end_connection()
                    .await;
            }
            ModemEvent::Disconnected => {
                info!("call ended: {}", modem.disconnect_reason());
                break;
            }
            other => info!("{}", other),
        }
    }

    modem
        .shutdown()
        .await;
    Ok(())
}
