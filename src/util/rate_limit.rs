//! Inbound message rate limiting

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;

pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Max client messages per second on one socket
pub const CONNECTION_RATE_LIMIT: u32 = 30;

fn create_limiter(per_second: u32) -> Limiter {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Per-connection limiter, owned by the socket reader
pub struct ConnectionRateLimiter {
    limiter: Limiter,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self::with_rate(CONNECTION_RATE_LIMIT)
    }

    pub fn with_rate(per_second: u32) -> Self {
        Self {
            limiter: create_limiter(per_second),
        }
    }

    /// True if the message may be processed
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
