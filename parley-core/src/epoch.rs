//! Generation tokens for invalidating superseded subscriptions.
//!
//! A subscriber captures the [`Epoch`] it was started under and checks it
//! before every write. Advancing the counter retires every earlier token, so
//! an event that was already in flight when the switch happened is dropped
//! instead of applied.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct EpochCounter {
    current: AtomicU64,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire the current epoch and return the new one.
    pub fn advance(&self) -> Epoch {
        Epoch(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> Epoch {
        Epoch(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_retires_previous_epoch() {
        let counter = EpochCounter::new();
        let first = counter.advance();
        assert!(counter.is_current(first));

        let second = counter.advance();
        assert!(second > first);
        assert!(!counter.is_current(first));
        assert!(counter.is_current(second));
    }
}
