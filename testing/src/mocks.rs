//! Deterministic environment mocks.

use chrono::{DateTime, Utc};
use rxflow_core::environment::Clock;

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock pinned to `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_never_advances() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
