use std::time::Duration;

/// Exponential backoff between delivery attempts.
///
/// Attempt 0 runs immediately; attempt `k >= 1` waits `base * 2^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn from_millis(base_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms))
    }

    /// Delay to wait before `attempt`. Saturates instead of overflowing.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(1000)
    }
}
