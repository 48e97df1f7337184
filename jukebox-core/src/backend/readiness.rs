//! Backend script readiness
//!
//! Third-party player scripts must be initialized exactly once per process,
//! and every adapter interested in a source must learn when it is ready.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::sync::Source;

/// Init-once latch with fan-out of the ready state
#[derive(Debug)]
pub struct ReadinessBroker {
    started: AtomicBool,
    ready_tx: watch::Sender<bool>,
}

impl ReadinessBroker {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            started: AtomicBool::new(false),
            ready_tx,
        }
    }

    /// Claim initialization. Returns true for exactly one caller, which is
    /// then responsible for calling [`mark_ready`](Self::mark_ready).
    pub fn begin_init(&self) -> bool {
        let first = !self.started.swap(true, Ordering::AcqRel);
        if first {
            debug!("Readiness: initialization claimed");
        }
        first
    }

    /// Announce readiness to every current and future subscriber
    pub fn mark_ready(&self) {
        self.started.store(true, Ordering::Release);
        if !self.ready_tx.send_replace(true) {
            info!("Readiness: backend script ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Resolve once ready (immediately if already ready)
    pub async fn wait_ready(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as the broker, so this cannot fail while we borrow it
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadinessBroker {
    fn default() -> Self {
        Self::new()
    }
}

static BROKERS: OnceLock<[ReadinessBroker; 3]> = OnceLock::new();

/// Process-wide broker for a source
pub fn broker(source: Source) -> &'static ReadinessBroker {
    let brokers = BROKERS.get_or_init(|| {
        [
            ReadinessBroker::new(),
            ReadinessBroker::new(),
            ReadinessBroker::new(),
        ]
    });
    match source {
        Source::Spotify => &brokers[0],
        Source::Youtube => &brokers[1],
        Source::Soundcloud => &brokers[2],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_init_claimed_once() {
        let broker = ReadinessBroker::new();
        assert!(broker.begin_init());
        assert!(!broker.begin_init());
        assert!(!broker.is_ready());

        broker.mark_ready();
        assert!(broker.is_ready());
        assert!(!broker.begin_init());
    }

    #[tokio::test]
    async fn test_fan_out_to_subscribers() {
        let broker = Arc::new(ReadinessBroker::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move { broker.wait_ready().await })
            })
            .collect();

        tokio::task::yield_now().await;
        broker.mark_ready();

        for waiter in waiters {
            waiter.await.unwrap();
        }

        // Late subscribers resolve immediately
        broker.wait_ready().await;
        assert!(*broker.subscribe().borrow());
    }

    #[test]
    fn test_global_brokers_are_distinct() {
        assert!(!std::ptr::eq(broker(Source::Youtube), broker(Source::Soundcloud)));
        assert!(std::ptr::eq(broker(Source::Youtube), broker(Source::Youtube)));
    }
}
