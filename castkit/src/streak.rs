//! Streak Accelerator
//!
//! Tracks how long a repeated action has been firing without interruption and
//! maps the streak length to a multiplier. Callers tick it once per repeat;
//! a gap longer than the allowed interval resets the streak to factor 1.

use std::time::{Duration, Instant};

/// One escalation tier: once the streak has lasted `after`, the factor
/// becomes `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Factor {
    pub after: Duration,
    pub value: i64,
}

/// Escalating repeat-rate tracker.
#[derive(Debug)]
pub struct Streak {
    /// Maximum gap between ticks before the streak resets.
    interval: Duration,
    /// Tiers sorted by `after`, longest first, so the first match wins.
    factors: Vec<Factor>,
    start: Option<Instant>,
    previous: Option<Instant>,
}

impl Streak {
    pub fn new(interval: Duration, mut factors: Vec<Factor>) -> Self {
        factors.sort_by(|a, b| b.after.cmp(&a.after));
        Streak {
            interval,
            factors,
            start: None,
            previous: None,
        }
    }

    /// Records a tick now and returns the current factor.
    pub fn updated_factor(&mut self) -> i64 {
        self.updated_factor_at(Instant::now())
    }

    /// Records a tick at `now` and returns the current factor. Exposed
    /// separately so tests can drive the clock.
    pub fn updated_factor_at(&mut self, now: Instant) -> i64 {
        let broke = match self.previous {
            Some(previous) => now.saturating_duration_since(previous) > self.interval,
            None => true,
        };
        if broke {
            self.start = Some(now);
        }
        self.previous = Some(now);

        let elapsed = match self.start {
            Some(start) => now.saturating_duration_since(start),
            None => Duration::ZERO,
        };
        self.factors
            .iter()
            .find(|factor| factor.after <= elapsed)
            .map(|factor| factor.value)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> Vec<Factor> {
        vec![
            Factor {
                after: Duration::from_secs(1),
                value: 2,
            },
            Factor {
                after: Duration::from_secs(3),
                value: 6,
            },
            Factor {
                after: Duration::from_secs(2),
                value: 4,
            },
        ]
    }

    #[test]
    fn first_tick_is_unit_factor() {
        let mut streak = Streak::new(Duration::from_millis(100), tiers());
        assert_eq!(streak.updated_factor_at(Instant::now()), 1);
    }

    #[test]
    fn sustained_ticks_escalate_through_tiers() {
        let mut streak = Streak::new(Duration::from_millis(100), tiers());
        let start = Instant::now();
        let mut factor = 0;
        // Tick every 50ms for 2.5s of streak time.
        for step in 0..=50 {
            factor = streak.updated_factor_at(start + Duration::from_millis(step * 50));
        }
        assert_eq!(factor, 4);
    }

    #[test]
    fn gap_longer_than_interval_resets_the_streak() {
        let mut streak = Streak::new(Duration::from_millis(100), tiers());
        let start = Instant::now();
        for step in 0..30 {
            streak.updated_factor_at(start + Duration::from_millis(step * 50));
        }
        // 200ms of silence breaks the streak.
        let resumed = start + Duration::from_millis(30 * 50 + 200);
        assert_eq!(streak.updated_factor_at(resumed), 1);
        // And escalation starts over from the resume point.
        assert_eq!(
            streak.updated_factor_at(resumed + Duration::from_millis(50)),
            1
        );
        assert_eq!(
            streak.updated_factor_at(resumed + Duration::from_millis(1050)),
            2
        );
    }

    #[test]
    fn gap_exactly_at_interval_keeps_the_streak() {
        let mut streak = Streak::new(Duration::from_millis(100), tiers());
        let start = Instant::now();
        let mut factor = 0;
        // Ticks spaced exactly one interval apart never break the streak.
        for step in 0..=11 {
            factor = streak.updated_factor_at(start + Duration::from_millis(step * 100));
        }
        assert_eq!(factor, 2);
    }

    #[test]
    fn tiers_match_longest_first_regardless_of_input_order() {
        let mut streak = Streak::new(Duration::from_secs(10), tiers());
        let start = Instant::now();
        streak.updated_factor_at(start);
        assert_eq!(streak.updated_factor_at(start + Duration::from_secs(3)), 6);
    }
}
