//! Bounded pool of reusable fixed-size byte buffers.
//!
//! Three tiers match the protocol's buffer shapes: small status/header
//! scratch, the maximum protocol packet, and the maximum file-transfer
//! chunk. Borrowing hands out an RAII guard; dropping the guard returns
//! the buffer. When a tier is exhausted the borrower suspends until a
//! return — backpressure, never unbounded allocation.

use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Scratch size for status tokens and sync record headers.
pub const SMALL_BUFFER_LENGTH: usize = 1024;

/// Largest protocol packet read in one piece.
pub const MAX_PACKET_LENGTH: usize = 16384;

/// Largest file-sync `DATA` frame payload.
pub const MAX_FILE_PACKET_LENGTH: usize = 64 * 1024;

// ── Tier ─────────────────────────────────────────────────────────

struct Tier {
    buffer_len: usize,
    permits: Semaphore,
    free: Mutex<Vec<Vec<u8>>>,
}

impl Tier {
    fn new(buffer_len: usize, capacity: usize) -> Self {
        Self {
            buffer_len,
            permits: Semaphore::new(capacity),
            free: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    async fn borrow(&self) -> PooledBuffer<'_> {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("buffer pool semaphore closed");
        permit.forget();
        let recycled = self.free.lock().expect("buffer pool poisoned").pop();
        let buf = recycled.unwrap_or_else(|| vec![0u8; self.buffer_len]);
        PooledBuffer {
            tier: self,
            buf: Some(buf),
        }
    }

    fn restore(&self, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.buffer_len);
        self.free.lock().expect("buffer pool poisoned").push(buf);
        self.permits.add_permits(1);
    }
}

// ── BufferPool ───────────────────────────────────────────────────

/// Client-owned pool; passed by `Arc` to whoever stages I/O.
///
/// There are no process-wide pools: every [`crate::Client`] owns one,
/// so tests get isolated pools for free.
pub struct BufferPool {
    small: Tier,
    packet: Tier,
    file: Tier,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Self::with_capacities(64, 16, 8)
    }

    pub fn with_capacities(small: usize, packet: usize, file: usize) -> Arc<Self> {
        Arc::new(Self {
            small: Tier::new(SMALL_BUFFER_LENGTH, small),
            packet: Tier::new(MAX_PACKET_LENGTH, packet),
            file: Tier::new(MAX_FILE_PACKET_LENGTH, file),
        })
    }

    /// Borrow a 1 KiB scratch buffer.
    pub async fn small(&self) -> PooledBuffer<'_> {
        self.small.borrow().await
    }

    /// Borrow a max-protocol-packet buffer.
    pub async fn packet(&self) -> PooledBuffer<'_> {
        self.packet.borrow().await
    }

    /// Borrow a max-file-chunk buffer.
    pub async fn file(&self) -> PooledBuffer<'_> {
        self.file.borrow().await
    }
}

// ── PooledBuffer ─────────────────────────────────────────────────

/// RAII borrow of one pool buffer. Returned on drop, also on panics
/// and error paths, so a failing transfer cannot leak its buffer.
pub struct PooledBuffer<'a> {
    tier: &'a Tier,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().expect("pooled buffer already returned")
    }
}

impl std::ops::DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf
            .as_deref_mut()
            .expect("pooled buffer already returned")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.tier.restore(buf);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn buffers_have_tier_sizes() {
        let pool = BufferPool::new();
        assert_eq!(pool.small().await.len(), SMALL_BUFFER_LENGTH);
        assert_eq!(pool.packet().await.len(), MAX_PACKET_LENGTH);
        assert_eq!(pool.file().await.len(), MAX_FILE_PACKET_LENGTH);
    }

    #[tokio::test]
    async fn no_two_live_borrows_share_storage() {
        let pool = BufferPool::with_capacities(2, 1, 1);
        let mut a = pool.small().await;
        let mut b = pool.small().await;
        a[0] = 0xAA;
        b[0] = 0xBB;
        assert_eq!(a[0], 0xAA);
        assert_eq!(b[0], 0xBB);
    }

    #[tokio::test]
    async fn exhaustion_blocks_until_return() {
        let pool = BufferPool::with_capacities(1, 1, 1);
        let held = pool.small().await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _buf = pool.small().await;
            })
        };

        // The waiter cannot proceed while the only buffer is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("borrow did not unblock")
            .unwrap();
    }

    #[tokio::test]
    async fn buffer_returns_even_when_holder_errors() {
        let pool = BufferPool::with_capacities(1, 1, 1);

        let failing: Result<(), ()> = async {
            let _buf = pool.small().await;
            Err(())
        }
        .await;
        assert!(failing.is_err());

        // Buffer is available again despite the error path.
        let _again = tokio::time::timeout(Duration::from_millis(100), pool.small())
            .await
            .expect("buffer leaked on error path");
    }
}
