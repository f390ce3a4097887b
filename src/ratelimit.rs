use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 按目标限速，`take` 挂起直到允许发送
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn take(&self, target: &str);
}

/// 不限速
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn take(&self, _target: &str) {}
}

/// 每个目标每秒最多 `rps` 个请求，按固定间隔放行
#[derive(Debug)]
pub struct TokenRateLimiter {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl TokenRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        Self {
            interval: Duration::from_secs(1) / rps,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl RateLimiter for TokenRateLimiter {
    async fn take(&self, target: &str) {
        // 只在锁内预约时间片，等待在锁外进行
        let wait_until = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.entry(target.to_string()).or_insert(now);
            let granted = (*slot).max(now);
            *slot = granted + self.interval;
            granted
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let limiter = Unlimited;
        let start = Instant::now();
        for _ in 0..100 {
            limiter.take("http://a").await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_token_limiter_spaces_requests() {
        let limiter = TokenRateLimiter::new(20);
        assert_eq!(limiter.interval(), Duration::from_millis(50));

        let start = Instant::now();
        for _ in 0..3 {
            limiter.take("http://a").await;
        }
        // 第一个立即放行，其余每 50ms 一个
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_token_limiter_keys_are_independent() {
        let limiter = TokenRateLimiter::new(1);
        let start = Instant::now();
        limiter.take("http://a").await;
        limiter.take("http://b").await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
