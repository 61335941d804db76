use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket shared by every call made through one API client.
///
/// Capacity equals the configured requests per second and tokens refill
/// continuously with elapsed time. A fresh bucket holds a single token so the
/// first burst is one request, not a full second's worth.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let rate = if requests_per_second > 0.0 {
            requests_per_second
        } else {
            1.0
        };
        Self {
            rate,
            capacity: rate.max(1.0),
            bucket: Mutex::new(Bucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
