//! Inbound byte buffer shared between the comm-port task and readers

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Ordered inbound bytes plus an available-count semaphore.
///
/// Producers append and then release permits; consumers reserve permits
/// before taking bytes. Between the two steps of an append the permit
/// count can lag behind the stored length, never the other way round, so a
/// reader only ever takes bytes whose append has fully completed.
#[derive(Debug)]
pub struct InboundBuffer {
    data: Mutex<BytesMut>,
    available: Semaphore,
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BytesMut::new()),
            available: Semaphore::new(0),
        }
    }

    /// Append received bytes and make them available to readers.
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data
            .lock()
            .extend_from_slice(bytes);
        self.available
            .add_permits(bytes.len());
    }

    /// Take up to `max_len` bytes without waiting.
    ///
    /// Returns an empty buffer when nothing is available or when the
    /// reservation races with an append still in progress; nothing is
    /// removed in that case.
    pub fn read(&self, max_len: usize) -> Bytes {
        let mut data = self
            .data
            .lock();
        let n = max_len.min(data.len());
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        if n == 0 {
            return Bytes::new();
        }
        match self
            .available
            .try_acquire_many(n)
        {
            Ok(permit) => {
                permit.forget();
                data.split_to(n as usize)
                    .freeze()
            }
            Err(_) => Bytes::new(),
        }
    }

    /// Take everything currently available.
    pub fn read_all(&self) -> Bytes {
        self.read(usize::MAX)
    }

    /// Bytes readers can take right now.
    pub fn len(&self) -> usize {
        self.available
            .available_permits()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
