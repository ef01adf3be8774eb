// ABOUTME: Per-connection bandwidth ceiling for proxied console traffic
// ABOUTME: Token-bucket limiter charged per byte before each write

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Fixed per-connection ceiling applied to every proxied console.
pub const PER_CONNECTION_BYTES_PER_SEC: u32 = 1024;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct ByteThrottle {
    limiter: DirectLimiter,
    capacity: u32,
}

impl ByteThrottle {
    pub fn new(bytes_per_sec: u32) -> Self {
        let rate = NonZeroU32::new(bytes_per_sec).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            capacity: rate.get(),
        }
    }

    /// Waits until `len` bytes may pass. Requests larger than one second's
    /// budget are charged in budget-sized pieces.
    pub async fn acquire(&self, len: usize) {
        let mut remaining = len;
        while remaining > 0 {
            let piece = remaining.min(self.capacity as usize) as u32;
            if let Some(n) = NonZeroU32::new(piece) {
                // piece never exceeds the burst capacity, so the limiter
                // always accepts the request.
                let _ = self.limiter.until_n_ready(n).await;
            }
            remaining -= piece as usize;
        }
    }
}

impl Default for ByteThrottle {
    fn default() -> Self {
        Self::new(PER_CONNECTION_BYTES_PER_SEC)
    }
}
