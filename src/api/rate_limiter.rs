use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use tokio::time::Instant;

use super::client::RateLimitConfig;

/// Client-side token bucket in front of the model endpoint, so a burst of
/// chats from one session does not trip the provider's own limits.
pub struct RateLimiter {
    bucket: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(per_second);

        Self {
            bucket: GovernorRateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)),
        }
    }

    /// Take a slot, waiting no later than `deadline`. Returns false when
    /// the bucket stayed empty until then.
    pub async fn acquire_before(&self, deadline: Instant) -> bool {
        match tokio::time::timeout_at(deadline, self.bucket.until_ready()).await {
            Ok(()) => true,
            Err(_) => {
                log::warn!("No outbound model slot before the request deadline");
                false
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.bucket.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(requests_per_second: u32, burst_size: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_second,
            burst_size,
        })
    }

    #[test]
    fn test_burst_then_empty() {
        let limiter = limiter(2, 3);
        assert!((0..3).all(|_| limiter.try_acquire()));
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_zero_config_means_one_per_second() {
        let limiter = limiter(0, 0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_before_waits_for_refill() {
        let limiter = limiter(10, 1);
        assert!(limiter.try_acquire());

        let start = std::time::Instant::now();
        assert!(limiter.acquire_before(Instant::now() + Duration::from_secs(1)).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_acquire_before_gives_up_at_deadline() {
        let limiter = limiter(1, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.acquire_before(Instant::now() + Duration::from_millis(20)).await);
    }
}
