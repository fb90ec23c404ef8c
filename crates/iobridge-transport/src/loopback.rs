use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Buf, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

struct Shared {
    a_to_b: Mutex<BytesMut>,
    b_to_a: Mutex<BytesMut>,
    closed: AtomicBool,
}

/// One end of an in-memory byte link.
///
/// Bytes sent on one end become receivable on the other. Closing either end
/// closes the pair.
pub struct Loopback {
    shared: Arc<Shared>,
    is_a: bool,
}

impl Loopback {
    /// Create a connected pair.
    pub fn pair() -> (Self, Self) {
        let shared = Arc::new(Shared {
            a_to_b: Mutex::new(BytesMut::new()),
            b_to_a: Mutex::new(BytesMut::new()),
            closed: AtomicBool::new(false),
        });
        (
            Self {
                shared: Arc::clone(&shared),
                is_a: true,
            },
            Self {
                shared,
                is_a: false,
            },
        )
    }

    /// Bytes sent by this end that the peer has not consumed yet.
    pub fn in_flight(&self) -> usize {
        self.outbound().len()
    }

    fn outbound(&self) -> MutexGuard<'_, BytesMut> {
        let queue = if self.is_a {
            &self.shared.a_to_b
        } else {
            &self.shared.b_to_a
        };
        queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn inbound(&self) -> MutexGuard<'_, BytesMut> {
        let queue = if self.is_a {
            &self.shared.b_to_a
        } else {
            &self.shared.a_to_b
        };
        queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for Loopback {
    fn open(&mut self) -> Result<()> {
        self.shared.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inbound = self.inbound();
        if inbound.is_empty() && self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let n = inbound.len().min(buf.len());
        buf[..n].copy_from_slice(&inbound[..n]);
        inbound.advance(n);
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

impl std::fmt::Debug for Loopback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("end", &if self.is_a { "a" } else { "b" })
            .finish()
    }
}
