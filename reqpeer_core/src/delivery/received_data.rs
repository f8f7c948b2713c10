use std::fmt;
use std::thread::{self, ThreadId};

use bytes::Bytes;
use tokio::sync::mpsc;

/// One slice of received response body plus the number of bytes it cost on
/// the wire (which differs from `len()` for compressed transfers).
///
/// `payload`, `len` and `encoded_len` may be called from any thread. The chunk
/// itself belongs to the context that created it: if it is dropped on another
/// thread, its payload is handed back to the owning session's reclaim queue
/// instead of being released in place. Chunks built with
/// [`DataChunk::thread_safe`] have no owner and can be dropped anywhere.
pub struct DataChunk {
    payload: Bytes,
    encoded_len: u64,
    owner: Option<ReleaseHandle>,
}

impl DataChunk {
    pub(crate) fn owned(payload: Bytes, encoded_len: u64, owner: ReleaseHandle) -> Self {
        Self {
            payload,
            encoded_len,
            owner: Some(owner),
        }
    }

    pub fn thread_safe(payload: impl Into<Bytes>, encoded_len: u64) -> Self {
        Self {
            payload: payload.into(),
            encoded_len,
            owner: None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn encoded_len(&self) -> u64 {
        self.encoded_len
    }

    pub fn is_thread_safe(&self) -> bool {
        self.owner.is_none()
    }
}

impl fmt::Debug for DataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChunk")
            .field("len", &self.payload.len())
            .field("encoded_len", &self.encoded_len)
            .field("thread_safe", &self.owner.is_none())
            .finish()
    }
}

impl Drop for DataChunk {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            if thread::current().id() != owner.thread {
                let payload = std::mem::take(&mut self.payload);
                // Owner already gone: nobody left to release on, drop here.
                let _ = owner.tx.send(payload);
            }
        }
    }
}

/// Route back to the context that created a chunk.
#[derive(Clone)]
pub(crate) struct ReleaseHandle {
    thread: ThreadId,
    tx: mpsc::UnboundedSender<Bytes>,
}

/// Payloads released on foreign threads, waiting to be dropped by their owner
/// in the order they arrived.
pub(crate) struct ReclaimQueue {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ReclaimQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Handle bound to the calling thread.
    pub(crate) fn handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            thread: thread::current().id(),
            tx: self.tx.clone(),
        }
    }

    /// Drops every queued payload, oldest first. Returns how many were released.
    pub(crate) fn drain(&mut self) -> usize {
        let mut released = 0;
        while let Ok(payload) = self.rx.try_recv() {
            drop(payload);
            released += 1;
        }
        released
    }
}
