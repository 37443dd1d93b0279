/// Retry and back-off tunables for callers that implement a retry loop.
///
/// This type only carries the numbers. Values are not validated: zero and
/// negative inputs are kept as given.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RetryParams {
    max_retries: i32,
    min_back_off_delay_ms: i32,
    max_back_off_delay_ms: i32,
    delta_back_off_ms: i32,
}

impl RetryParams {
    /// Process-wide default policy: 10 retries, 20ms..8000ms, 20ms delta.
    pub const DEFAULT: RetryParams = RetryParams::new(10, 20, 8000, 20);

    pub const fn new(
        max_retries: i32,
        min_back_off_delay_ms: i32,
        max_back_off_delay_ms: i32,
        delta_back_off_ms: i32,
    ) -> Self {
        Self {
            max_retries,
            min_back_off_delay_ms,
            max_back_off_delay_ms,
            delta_back_off_ms,
        }
    }

    /// Upper bound on retry attempts.
    pub const fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub const fn min_back_off_delay_ms(&self) -> i32 {
        self.min_back_off_delay_ms
    }

    pub const fn max_back_off_delay_ms(&self) -> i32 {
        self.max_back_off_delay_ms
    }

    pub const fn delta_back_off_ms(&self) -> i32 {
        self.delta_back_off_ms
    }
}

impl Default for RetryParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}
