//! Network reachability as an observable boolean.
//!
//! The platform side holds a [`ReachabilitySignal`] and pushes changes into it;
//! the engine holds the matching [`Reachability`] and only ever reads.

use tokio::sync::watch;
use tracing::info;

use crate::state::NetworkStatus;

/// Writer half, owned by whatever monitors connectivity.
#[derive(Debug)]
pub struct ReachabilitySignal {
    tx: watch::Sender<bool>,
}

/// Reader half, handed to the engine.
#[derive(Debug, Clone)]
pub struct Reachability {
    rx: watch::Receiver<bool>,
}

/// Create a linked signal/reader pair starting at `initial`.
pub fn reachability(initial: bool) -> (ReachabilitySignal, Reachability) {
    let (tx, rx) = watch::channel(initial);
    (ReachabilitySignal { tx }, Reachability { rx })
}

impl ReachabilitySignal {
    /// Publish a new reachability value. Repeats of the current value are not
    /// re-notified.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                return false;
            }
            *current = reachable;
            true
        });
        if changed {
            info!(reachable, "network reachability changed");
        }
    }

    pub fn reader(&self) -> Reachability {
        Reachability {
            rx: self.tx.subscribe(),
        }
    }
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn network_status(&self) -> NetworkStatus {
        NetworkStatus::from(self.is_reachable())
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_tracks_signal() {
        let (signal, reach) = reachability(false);
        assert_eq!(reach.network_status(), NetworkStatus::NotReachable);
        signal.set_reachable(true);
        assert!(reach.is_reachable());
        assert_eq!(signal.reader().network_status(), NetworkStatus::Reachable);
    }

    #[test]
    fn repeated_value_does_not_notify() {
        let (signal, reach) = reachability(true);
        let mut rx = reach.subscribe();
        signal.set_reachable(true);
        assert!(!rx.has_changed().expect("signal alive"));
        signal.set_reachable(false);
        assert!(rx.has_changed().expect("signal alive"));
        assert!(!*rx.borrow_and_update());
    }
}
