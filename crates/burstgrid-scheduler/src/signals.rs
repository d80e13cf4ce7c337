//! Completion watcher.
//!
//! The completion channel has no blocking read, so waiting is a bounded
//! poll: drain everything pending in FIFO order, then sleep for
//! `poll_interval` (or until the deadline, whichever is sooner) and repeat.
//! Every drained signal feeds the lateness tracker; only the awaited
//! `(kind, batch_sequence)` pair ends the wait.

use std::sync::Arc;
use std::time::Duration;

use burst_core::{CompletionSignal, JobKind, SignalChannel};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lateness::LatenessTracker;
use crate::shutdown::ShutdownSignal;

/// How a wait for a completion signal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Observed(CompletionSignal),
    TimedOut,
    Cancelled,
}

pub struct CompletionWatcher {
    channel: Arc<dyn SignalChannel>,
    poll_interval: Duration,
}

impl CompletionWatcher {
    pub fn new(channel: Arc<dyn SignalChannel>, poll_interval: Duration) -> Self {
        Self {
            channel,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Discard stale signals left over from earlier cycles.
    pub fn clear(&self) {
        self.channel.clear();
    }

    /// Consume every pending signal, recording lateness.
    pub fn drain(&self, tracker: &mut LatenessTracker) -> usize {
        let mut drained = 0;
        while let Some(signal) = self.channel.read_signal() {
            observe(&signal, tracker);
            drained += 1;
        }
        drained
    }

    /// Wait for the completion signal of `kind` in batch `batch_sequence`.
    pub async fn wait_for(
        &self,
        kind: JobKind,
        batch_sequence: u64,
        deadline: Instant,
        tracker: &mut LatenessTracker,
        shutdown: &mut ShutdownSignal,
    ) -> WaitOutcome {
        loop {
            while let Some(signal) = self.channel.read_signal() {
                observe(&signal, tracker);
                if signal.kind == kind && signal.batch_sequence == batch_sequence {
                    return WaitOutcome::Observed(signal);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(%kind, batch_sequence, "completion signal timed out");
                return WaitOutcome::TimedOut;
            }
            let next_poll = (now + self.poll_interval).min(deadline);
            if !shutdown.sleep_until(next_poll).await {
                debug!(%kind, batch_sequence, "completion wait cancelled");
                return WaitOutcome::Cancelled;
            }
        }
    }
}

impl std::fmt::Debug for CompletionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionWatcher")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn observe(signal: &CompletionSignal, tracker: &mut LatenessTracker) {
    if tracker.record(signal) {
        debug!(
            kind = %signal.kind,
            batch_sequence = signal.batch_sequence,
            lateness_ms = signal.lateness_ms,
            "late completion"
        );
    }
}
