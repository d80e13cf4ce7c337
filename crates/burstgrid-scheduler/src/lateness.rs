//! Lateness bookkeeping for completion signals.

use burst_core::CompletionSignal;
use serde::Serialize;
use tracing::{debug, warn};

/// Aggregated lateness counters, exposed through status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatenessStats {
    pub signals: u64,
    pub late: u64,
    /// Late signals in a row, reset by the first on-time one.
    pub consecutive_late: u32,
    /// Worst lateness seen, in milliseconds.
    pub worst_ms: i64,
    pub last_ms: Option<i64>,
}

/// Tracks consecutive late completions.
///
/// Lateness is diagnostic only: nothing in the scheduler changes course
/// because of it.
#[derive(Debug, Default)]
pub struct LatenessTracker {
    stats: LatenessStats,
    /// Consecutive late signals before a warning is logged.
    warn_threshold: u32,
}

impl LatenessTracker {
    pub fn new() -> Self {
        Self::with_threshold(3)
    }

    pub fn with_threshold(warn_threshold: u32) -> Self {
        Self {
            stats: LatenessStats::default(),
            warn_threshold: warn_threshold.max(1),
        }
    }

    /// Record a signal. Returns whether it was late.
    pub fn record(&mut self, signal: &CompletionSignal) -> bool {
        let stats = &mut self.stats;
        stats.signals += 1;
        stats.last_ms = Some(signal.lateness_ms);

        if !signal.is_late() {
            if stats.consecutive_late > 0 {
                debug!(after = stats.consecutive_late, "completions back on time");
            }
            stats.consecutive_late = 0;
            return false;
        }

        stats.late += 1;
        stats.consecutive_late += 1;
        stats.worst_ms = stats.worst_ms.max(signal.lateness_ms);

        if stats.consecutive_late == self.warn_threshold {
            warn!(
                consecutive = stats.consecutive_late,
                lateness_ms = signal.lateness_ms,
                worst_ms = stats.worst_ms,
                "jobs repeatedly landing late"
            );
        }
        true
    }

    pub fn stats(&self) -> LatenessStats {
        self.stats
    }

    pub fn consecutive_late(&self) -> u32 {
        self.stats.consecutive_late
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_core::JobKind;

    fn signal(lateness_ms: i64) -> CompletionSignal {
        CompletionSignal {
            kind: JobKind::CorrectiveB,
            batch_sequence: 1,
            lateness_ms,
        }
    }

    #[test]
    fn on_time_signals_are_not_late() {
        let mut tracker = LatenessTracker::new();
        assert!(!tracker.record(&signal(0)));
        assert!(!tracker.record(&signal(-40)));
        let stats = tracker.stats();
        assert_eq!(stats.signals, 2);
        assert_eq!(stats.late, 0);
        assert_eq!(stats.last_ms, Some(-40));
    }

    #[test]
    fn consecutive_lates_reset_on_time() {
        let mut tracker = LatenessTracker::with_threshold(2);
        tracker.record(&signal(10));
        tracker.record(&signal(30));
        assert_eq!(tracker.consecutive_late(), 2);
        tracker.record(&signal(0));
        assert_eq!(tracker.consecutive_late(), 0);
        tracker.record(&signal(5));

        let stats = tracker.stats();
        assert_eq!(stats.late, 3);
        assert_eq!(stats.worst_ms, 30);
        assert_eq!(stats.consecutive_late, 1);
    }
}
