//! Rate limiting for unimplemented-register diagnostics.
//!
//! Drivers poll status registers in tight loops; logging every access would drown everything
//! else. The throttle suppresses repeats of the same `(offset, value)` pair for one second of
//! device time and reports how many were dropped once logging resumes.

const THROTTLE_WINDOW_NS: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Log normally.
    Log,
    /// Log, noting that `suppressed` identical events were dropped before this one.
    Resume { suppressed: u64 },
    Suppress,
}

#[derive(Debug, Default)]
pub struct LogThrottle {
    last: Option<(u64, u64)>,
    last_logged_ns: u64,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, now_ns: u64, offset: u64, value: u64) -> ThrottleDecision {
        let key = (offset, value);
        let within_window = now_ns.saturating_sub(self.last_logged_ns) < THROTTLE_WINDOW_NS;
        if self.last == Some(key) && within_window {
            self.suppressed += 1;
            return ThrottleDecision::Suppress;
        }

        self.last = Some(key);
        self.last_logged_ns = now_ns;
        match std::mem::take(&mut self.suppressed) {
            0 => ThrottleDecision::Log,
            suppressed => ThrottleDecision::Resume { suppressed },
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_within_a_second_are_suppressed() {
        let mut t = LogThrottle::new();
        assert_eq!(t.check(0, 0x40_0100, 0), ThrottleDecision::Log);
        assert_eq!(t.check(10, 0x40_0100, 0), ThrottleDecision::Suppress);
        assert_eq!(t.check(999_999_999, 0x40_0100, 0), ThrottleDecision::Suppress);
        assert_eq!(
            t.check(1_000_000_000, 0x40_0100, 0),
            ThrottleDecision::Resume { suppressed: 2 }
        );
    }

    #[test]
    fn different_value_logs_immediately() {
        let mut t = LogThrottle::new();
        assert_eq!(t.check(0, 0x9000, 1), ThrottleDecision::Log);
        assert_eq!(t.check(1, 0x9000, 1), ThrottleDecision::Suppress);
        assert_eq!(
            t.check(2, 0x9000, 2),
            ThrottleDecision::Resume { suppressed: 1 }
        );
        assert_eq!(t.check(3, 0x9004, 2), ThrottleDecision::Log);
    }
}
