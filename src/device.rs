//! Modem enumeration

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::backend::{LineErrorCode, SessionHandle, Telephony};
use crate::constants::*;
use crate::negotiate::negotiate_sized;

/// A line device usable as a data modem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModemInfo {
    /// Device id to pass to [`TapiModem::connect`](crate::TapiModem::connect).
    pub device_id: u32,
    /// Name reported by the driver, or `NONAME MODEM <id>`.
    pub name: String,
}

impl ModemInfo {
    /// List the data modems the subsystem exposes.
    ///
    /// Opens a short-lived session of its own, independent of any
    /// [`TapiModem`](crate::TapiModem). Devices that cannot negotiate a
    /// version, report no data-modem media mode, fail to return their
    /// capabilities, or refuse to open are skipped. An unavailable subsystem
    /// yields an empty list.
    pub fn available_modems<T: Telephony + ?Sized>(api: &T) -> Vec<ModemInfo> {
        let init = loop {
            match api.initialize(DEFAULT_FRIENDLY_NAME, TAPI_SUPPORTED_API) {
                Ok(init) => break init,
                Err(code) if code == LineErrorCode::REINIT => {
                    trace!("[ENUM] subsystem reinitializing, retrying");
                }
                Err(code) => {
                    warn!("[ENUM] subsystem unavailable: {}", code);
                    return Vec::new();
                }
            }
        };

        let modems = (0..init.device_count)
            .filter_map(|device_id| probe_device(api, init.session, device_id))
            .collect::<Vec<_>>();
        debug!("[ENUM] found {} modems", modems.len());

        if let Err(code) = api.shutdown(init.session) {
            warn!("[ENUM] shutdown failed: {}", code);
        }
        modems
    }
}

fn probe_device<T: Telephony + ?Sized>(
    api: &T,
    session: SessionHandle,
    device_id: u32,
) -> Option<ModemInfo> {
    let version = api
        .negotiate_api_version(session, device_id, TAPI_LOWEST_API, TAPI_SUPPORTED_API)
        .ok()?;
    let caps = match negotiate_sized(DEVICE_CAPS_CAPACITY, |capacity| {
        api.device_caps(session, device_id, version, capacity)
    }) {
        Ok(caps) => caps,
        Err(code) => {
            trace!("[ENUM] device {}: no capabilities ({})", device_id, code);
            return None;
        }
    };
    if caps.media_modes & LINEMEDIAMODE_DATAMODEM == 0 {
        trace!("[ENUM] device {}: not a data modem", device_id);
        return None;
    }

    // Some devices claim the data-modem media mode but cannot be opened for it.
    match api.open_line(session, device_id, version, LINEMEDIAMODE_DATAMODEM) {
        Ok(line) => {
            let _ = api.close_line(line);
        }
        Err(code) => {
            trace!("[ENUM] device {}: open failed ({})", device_id, code);
            return None;
        }
    }

    let name = caps
        .line_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("NONAME MODEM {}", device_id));
    Some(ModemInfo { device_id, name })
}
