//! Per-client bandwidth limiting
//!
//! One limiter is shared by every link of a client. Permits are bytes, so a
//! frame larger than one second of budget is acquired in burst-sized slices.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as Governor,
};
use std::fmt;
use std::num::NonZeroU32;
use tracing::debug;

/// Token bucket limiting a client's relayed bytes per second
pub struct RateLimiter {
    limiter: Governor<NotKeyed, InMemoryState, DefaultClock>,
    burst: NonZeroU32,
}

impl RateLimiter {
    /// Create a limiter allowing `kb_per_sec` kilobytes per second.
    /// Returns `None` for 0, which means unlimited.
    pub fn new(kb_per_sec: u32) -> Option<Self> {
        let burst = NonZeroU32::new(kb_per_sec.saturating_mul(1024))?;
        Some(Self {
            limiter: Governor::direct(Quota::per_second(burst)),
            burst,
        })
    }

    /// Bytes per second this limiter allows
    pub fn bytes_per_sec(&self) -> u32 {
        self.burst.get()
    }

    /// Wait until `bytes` may be sent
    pub async fn acquire(&self, bytes: usize) {
        let mut remaining = bytes;
        while remaining > 0 {
            let slice = remaining.min(self.burst.get() as usize);
            // slice is in 1..=burst, so it is always representable and satisfiable
            let Some(n) = NonZeroU32::new(slice as u32) else {
                break;
            };
            if let Err(e) = self.limiter.until_n_ready(n).await {
                debug!("Rate limiter rejected {} bytes: {}", slice, e);
                break;
            }
            remaining -= slice;
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("bytes_per_sec", &self.burst.get())
            .finish()
    }
}
