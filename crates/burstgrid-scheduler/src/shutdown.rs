//! Cooperative cancellation.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Upper bound for a single sleep whose deadline would overflow.
pub const MAX_SLEEP: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Observes an external shutdown flag at every suspension point.
///
/// Wraps a `watch::Receiver<bool>`; `true` means stop. A dropped sender is
/// treated as "never shut down".
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep until `deadline`. Returns `false` if shutdown was requested
    /// first.
    pub async fn sleep_until(&mut self, deadline: Instant) -> bool {
        if self.is_triggered() {
            return false;
        }
        loop {
            let alive = match self.rx.as_mut() {
                None => {
                    tokio::time::sleep_until(deadline).await;
                    return true;
                }
                Some(rx) => tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => return true,
                    changed = rx.changed() => changed.is_ok(),
                },
            };
            if !alive {
                self.rx = None;
            } else if self.is_triggered() {
                return false;
            }
        }
    }

    /// Sleep for `duration`. Returns `false` if shutdown was requested first.
    ///
    /// Durations past the clock's range are cut to [`MAX_SLEEP`].
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let now = Instant::now();
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + MAX_SLEEP);
        self.sleep_until(deadline).await
    }
}
