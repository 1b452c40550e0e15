use crate::net::config::HEALTH_CHECK_INTERVAL_MS;

/// Fixed-interval due tracker for the connected-state link probe. Driven by
/// caller-supplied milliseconds so the cadence logic stays off the wall clock.
pub(crate) struct HealthCheckTimer {
    interval_ms: u64,
    last_check_ms: u64,
}

impl HealthCheckTimer {
    pub(crate) fn new(now_ms: u64) -> Self {
        Self::with_interval(now_ms, HEALTH_CHECK_INTERVAL_MS)
    }

    pub(crate) fn with_interval(now_ms: u64, interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_check_ms: now_ms,
        }
    }

    /// True once per elapsed interval. Marking due resets the cadence from
    /// `now_ms`, so a late poll does not produce a burst of catch-up checks.
    pub(crate) fn due(&mut self, now_ms: u64) -> bool {
        if now_ms.wrapping_sub(self.last_check_ms) >= self.interval_ms {
            self.last_check_ms = now_ms;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset(&mut self, now_ms: u64) {
        self.last_check_ms = now_ms;
    }
}
