//! Bookkeeping for asynchronous comm-port writes

use std::collections::HashMap;
use std::io;
use tracing::{debug, trace, warn};

use crate::backend::{CommPort, WriteStart, WriteStatus, WriteToken};

/// In-flight writes, keyed by the token the port handed out.
///
/// Completion order is not tracked: on `TX_EMPTY` every entry is polled and
/// the finished ones are summed into a single byte count.
#[derive(Debug, Default)]
pub struct WriteTracker {
    pending: HashMap<WriteToken, usize>,
}

impl WriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `data` to the port.
    ///
    /// A synchronous completion is returned as-is and nothing is tracked. A
    /// pending write is remembered until [`reconcile`](Self::reconcile) sees
    /// it finish or [`abandon`](Self::abandon) cancels it.
    pub fn submit<P: CommPort + ?Sized>(
        &mut self,
        port: &P,
        data: &[u8],
    ) -> io::Result<WriteStart> {
        let start = port.start_write(data)?;
        match start {
            WriteStart::Completed(n) => {
                trace!("[WRITE] {} bytes written synchronously", n);
            }
            WriteStart::Pending(token) => {
                trace!("[WRITE] {} bytes pending as {:?}", data.len(), token);
                self.pending
                    .insert(token, data.len());
            }
        }
        Ok(start)
    }

    /// Collect finished writes and return the bytes they transferred.
    ///
    /// Incomplete writes stay tracked. The first failure is returned
    /// immediately; the failed write is released, the others are left for
    /// [`abandon`](Self::abandon).
    pub fn reconcile<P: CommPort + ?Sized>(&mut self, port: &P) -> io::Result<u64> {
        let mut total = 0u64;
        let tokens: Vec<WriteToken> = self
            .pending
            .keys()
            .copied()
            .collect();
        for token in tokens {
            match port.write_status(token) {
                WriteStatus::Complete(n) => {
                    self.pending
                        .remove(&token);
                    total += n as u64;
                }
                WriteStatus::Incomplete => {}
                WriteStatus::Failed(e) => {
                    warn!("[WRITE] write {:?} failed: {}", token, e);
                    self.pending
                        .remove(&token);
                    port.cancel_write(token);
                    return Err(e);
                }
            }
        }
        if total > 0 {
            debug!("[WRITE] {} bytes confirmed", total);
        }
        Ok(total)
    }

    /// Cancel every tracked write. Returns how many were dropped.
    pub fn abandon<P: CommPort + ?Sized>(&mut self, port: &P) -> usize {
        let count = self
            .pending
            .len();
        for (token, _) in self
            .pending
            .drain()
        {
            port.cancel_write(token);
        }
        if count > 0 {
            debug!("[WRITE] abandoned {} pending writes", count);
        }
        count
    }

    /// Bytes submitted and not yet confirmed.
    pub fn pending_bytes(&self) -> usize {
        self.pending
            .values()
            .sum()
    }

    pub fn len(&self) -> usize {
        self.pending
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending
            .is_empty()
    }
}
