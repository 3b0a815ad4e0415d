//! Data path of a connected call: comm-port setup and the standing event loop

use async_trait::async_trait;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::backend::{CommEvents, CommPort, CommSettings};

/// Receiver of data-path activity.
///
/// The loop holds only a weak reference; once the owner is gone the loop
/// exits on its next event.
#[async_trait]
pub(crate) trait DataPathEvents: Send + Sync + 'static {
    /// Bytes read from the port, in arrival order.
    fn bytes_received(&self, bytes: &[u8]);

    /// The transmit buffer drained; pending writes can be reconciled.
    async fn transmit_drained(&self);

    /// Waiting on or reading from the port failed.
    async fn read_failed(&self, error: io::Error);
}

/// Prepare a freshly obtained comm handle for the event loop.
pub(crate) fn configure_port<P: CommPort + ?Sized>(
    port: &P,
    settings: &CommSettings,
) -> io::Result<()> {
    if !port.is_char_device() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "comm handle is not a character device",
        ));
    }
    port.configure(settings)?;
    port.set_event_mask(CommEvents::RX_CHAR | CommEvents::TX_EMPTY)?;
    debug!(
        "[COMM] port configured, read interval {:?}",
        settings.read_interval_timeout
    );
    Ok(())
}

/// Read everything currently queued on the port in one call.
async fn drain_port<P: CommPort + ?Sized>(port: &P) -> io::Result<Vec<u8>> {
    let queued = port.queued_bytes()?;
    if queued == 0 {
        return Ok(Vec::new());
    }
    trace!("[COMM] {} bytes queued", queued);
    port.read(queued)
        .await
}

/// Standing wait-for-event loop, run as its own task per connected call
pub(crate) async fn comm_loop<P: CommPort, H: DataPathEvents>(
    handler: Weak<H>,
    port: Arc<P>,
    cancel: CancellationToken,
) {
    let result = AssertUnwindSafe(comm_loop_inner(handler, port, cancel));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        error!("[COMM] data path task panicked");
    }
}

async fn comm_loop_inner<P: CommPort, H: DataPathEvents>(
    handler: Weak<H>,
    port: Arc<P>,
    cancel: CancellationToken,
) {
    debug!("[COMM] data path started");
    loop {
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[COMM] data path stopped");
                return;
            }
            waited = port.wait_event() => waited,
        };
        if cancel.is_cancelled() {
            debug!("[COMM] data path stopped");
            return;
        }
        let Some(handler) = handler.upgrade() else {
            debug!("[COMM] modem dropped, data path exiting");
            return;
        };

        let events = match waited {
            Ok(events) => events,
            Err(e) => {
                warn!("[COMM] waiting for port events failed: {}", e);
                handler
                    .read_failed(e)
                    .await;
                return;
            }
        };

        if events.contains(CommEvents::RX_CHAR) {
            let drained = drain_port(&*port).await;
            if cancel.is_cancelled() {
                debug!("[COMM] data path stopped, discarding read");
                return;
            }
            match drained {
                Ok(bytes) if !bytes.is_empty() => handler.bytes_received(&bytes),
                Ok(_) => {}
                Err(e) => {
                    warn!("[COMM] read failed: {}", e);
                    handler
                        .read_failed(e)
                        .await;
                    return;
                }
            }
        }
        if events.contains(CommEvents::TX_EMPTY) {
            handler
                .transmit_drained()
                .await;
        }
    }
}
