// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Anchor-based schedule arithmetic shared by the wall-clock timers.
//!
//! Repeating tasks never derive the next target from the previous one. Every target is
//! computed from a fixed anchor as `anchor + period * index`, so rounding errors and late
//! firings do not accumulate over the lifetime of the task.

use std::time::{Duration, Instant};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Returns `period * index`, or `None` if the result does not fit into a [`Duration`].
pub(crate) fn scaled(period: Duration, index: u64) -> Option<Duration> {
    let nanos = period.as_nanos().checked_mul(u128::from(index))?;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).ok()?;

    Some(Duration::new(secs, subsec))
}

/// Returns the instant of firing `index` of a schedule anchored at `anchor`.
///
/// `None` means the target lies beyond the range of [`Instant`] and is never reached.
pub(crate) fn target(anchor: Instant, period: Duration, index: u64) -> Option<Instant> {
    anchor.checked_add(scaled(period, index)?)
}

/// Signed adjustment applied to the next wait of a repeating task.
///
/// After a firing, the correction is the difference between the theoretical elapsed time
/// (`period * index`) and the time that actually elapsed since the anchor. A late firing
/// yields a negative correction that shortens the next wait; an early one lengthens it.
/// Long-running tasks therefore drift by at most the jitter of a single wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Correction(i128);

impl Correction {
    pub fn measure(period: Duration, index: u64, elapsed: Duration) -> Self {
        let theoretical = scaled(period, index).map_or(i128::MAX, to_nanos);

        Self(theoretical.saturating_sub(to_nanos(elapsed)))
    }

    /// Returns `period` adjusted by the correction, clamped at zero.
    pub fn apply(self, period: Duration) -> Duration {
        let nanos = to_nanos(period).saturating_add(self.0).max(0);

        u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
    }

    #[cfg(test)]
    const fn as_nanos(self) -> i128 {
        self.0
    }
}

fn to_nanos(duration: Duration) -> i128 {
    i128::try_from(duration.as_nanos()).unwrap_or(i128::MAX)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn scaled_ok() {
        assert_eq!(scaled(MS * 50, 0), Some(Duration::ZERO));
        assert_eq!(scaled(MS * 50, 3), Some(MS * 150));
        assert_eq!(scaled(Duration::from_nanos(1_500_000_001), 2), Some(Duration::new(3, 2)));
    }

    #[test]
    fn scaled_overflow() {
        assert_eq!(scaled(Duration::MAX, 2), None);
    }

    #[test]
    fn target_matches_exact_accumulation() {
        let anchor = Instant::now();
        let period = Duration::from_nanos(333_333_333);

        let mut accumulated = anchor;
        for _ in 0..3_000 {
            accumulated += period;
        }

        assert_eq!(target(anchor, period, 3_000), Some(accumulated));
        assert_eq!(target(anchor, Duration::MAX, 2), None);
    }

    #[test]
    fn late_firing_shortens_next_wait() {
        let correction = Correction::measure(MS * 10, 3, MS * 34);

        assert_eq!(correction.as_nanos(), -4_000_000);
        assert_eq!(correction.apply(MS * 10), MS * 6);
    }

    #[test]
    fn early_firing_lengthens_next_wait() {
        let correction = Correction::measure(MS * 10, 2, MS * 18);

        assert_eq!(correction.apply(MS * 10), MS * 12);
    }

    #[test]
    fn very_late_firing_clamps_to_zero() {
        let correction = Correction::measure(MS * 10, 1, MS * 100);

        assert_eq!(correction.apply(MS * 10), Duration::ZERO);
    }

    #[test]
    fn default_is_neutral() {
        assert_eq!(Correction::default().apply(MS * 7), MS * 7);
    }
}
