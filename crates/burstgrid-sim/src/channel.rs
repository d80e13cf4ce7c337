//! In-memory completion channel.
//!
//! [`SignalQueue`] is a bounded FIFO of completion signals. When it is
//! full the oldest undelivered signal is dropped to make room, so a reader
//! that falls behind loses history rather than blocking writers.
//! [`MemoryChannel`] wraps it in a mutex to implement
//! [`SignalChannel`](burst_core::SignalChannel).

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use burst_core::{CompletionSignal, SignalChannel};

/// Default maximum number of signals that can be queued.
const DEFAULT_CAPACITY: usize = 1024;

/// Bounded FIFO of completion signals.
#[derive(Debug)]
pub struct SignalQueue {
    queue: VecDeque<CompletionSignal>,
    capacity: usize,
    dropped: u64,
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueue a signal, dropping the oldest if the queue is full.
    pub fn push(&mut self, signal: CompletionSignal) {
        if self.queue.len() >= self.capacity {
            let dropped = self.queue.pop_front();
            self.dropped += 1;
            tracing::warn!(
                dropped = ?dropped,
                queue_capacity = self.capacity,
                "signal queue full, dropped oldest signal"
            );
        }
        self.queue.push_back(signal);
    }

    /// Dequeue the oldest pending signal.
    pub fn pop(&mut self) -> Option<CompletionSignal> {
        self.queue.pop_front()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Signals lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Thread-safe [`SignalQueue`].
#[derive(Debug, Default)]
pub struct MemoryChannel {
    inner: Mutex<SignalQueue>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignalChannel for MemoryChannel {
    fn write_signal(&self, signal: CompletionSignal) {
        self.lock().push(signal);
    }

    fn read_signal(&self) -> Option<CompletionSignal> {
        self.lock().pop()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_core::JobKind;

    fn signal(seq: u64) -> CompletionSignal {
        CompletionSignal {
            kind: JobKind::CorrectiveB,
            batch_sequence: seq,
            lateness_ms: 0,
        }
    }

    #[test]
    fn fifo_order() {
        let mut q = SignalQueue::new();
        q.push(signal(1));
        q.push(signal(2));
        assert_eq!(q.pop().unwrap().batch_sequence, 1);
        assert_eq!(q.pop().unwrap().batch_sequence, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut q = SignalQueue::with_capacity(2);
        q.push(signal(1));
        q.push(signal(2));
        q.push(signal(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop().unwrap().batch_sequence, 2);
    }

    #[test]
    fn memory_channel_clear() {
        let ch = MemoryChannel::new();
        ch.write_signal(signal(1));
        assert_eq!(ch.len(), 1);
        ch.clear();
        assert!(ch.read_signal().is_none());
        assert!(ch.is_empty());
    }
}
