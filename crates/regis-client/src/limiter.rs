//! Process-wide token bucket shared by every upstream caller.
//!
//! Callers reserve a slot under a short lock and sleep outside it, so
//! waiters never block each other and each one gets a distinct send time.
//! Over any window of length `t` at most `burst + rate * t` calls start.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct Bucket {
  rate:   f64,
  burst:  f64,
  /// Goes negative when callers have reserved future slots.
  tokens: f64,
  last:   Instant,
}

impl Bucket {
  fn refill(&mut self, now: Instant) {
    let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
    self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
    self.last = now;
  }

  fn reserve(&mut self, now: Instant) -> Duration {
    self.refill(now);
    self.tokens -= 1.0;
    if self.tokens >= 0.0 {
      Duration::ZERO
    } else {
      Duration::from_secs_f64(-self.tokens / self.rate)
    }
  }
}

pub struct RateLimiter {
  bucket:  Mutex<Bucket>,
  /// Upper bound for [`RateLimiter::set_rate`].
  ceiling: f64,
}

const MIN_RATE: f64 = 0.001;

impl RateLimiter {
  /// A bucket that starts full. `rate_per_sec` is also the ceiling for later
  /// adjustments.
  pub fn new(rate_per_sec: f64, burst: u32) -> Self {
    let rate = rate_per_sec.max(MIN_RATE);
    let burst = f64::from(burst.max(1));
    Self {
      bucket:  Mutex::new(Bucket { rate, burst, tokens: burst, last: Instant::now() }),
      ceiling: rate,
    }
  }

  /// Wait until this caller may send one request.
  pub async fn acquire(&self) {
    let wait = self.bucket.lock().reserve(Instant::now());
    if !wait.is_zero() {
      tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited");
      tokio::time::sleep(wait).await;
    }
  }

  /// Change the refill rate, capped at the configured ceiling. Returns the
  /// rate now in effect.
  pub fn set_rate(&self, rate_per_sec: f64) -> f64 {
    let rate = rate_per_sec.clamp(MIN_RATE, self.ceiling);
    let mut bucket = self.bucket.lock();
    bucket.refill(Instant::now());
    bucket.rate = rate;
    rate
  }

  pub fn rate(&self) -> f64 { self.bucket.lock().rate }

  pub fn ceiling(&self) -> f64 { self.ceiling }
}
