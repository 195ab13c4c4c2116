//! Connectivity monitoring.
//!
//! Wraps a reachability probe behind a watch channel and turns the raw
//! offline→online edge into a debounced, single-shot trigger for the sync
//! engine. Rapid flapping produces one trigger, not a storm.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use crate::api::RemoteApi;

/// Source of truth for "can we reach the service right now".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe that asks the remote API's health endpoint.
pub struct ApiProbe {
    remote: Arc<dyn RemoteApi>,
}

impl ApiProbe {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ConnectivityProbe for ApiProbe {
    async fn is_online(&self) -> bool {
        self.remote.ping().await.is_ok()
    }
}

pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    state: watch::Sender<bool>,
    online_trigger: Arc<Notify>,
    poll_interval: Duration,
    debounce: Duration,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        poll_interval: Duration,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            probe,
            state,
            online_trigger: Arc::new(Notify::new()),
            poll_interval,
            debounce,
        }
    }

    /// Latest observed connectivity.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Fired exactly once per debounced offline→online transition.
    pub fn online_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.online_trigger)
    }

    /// Probe immediately and record the result.
    pub async fn check_now(&self) -> bool {
        let online = self.probe.is_online().await;
        self.state.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        online
    }

    /// Poll the probe forever, firing the online trigger on stable
    /// offline→online transitions.
    pub async fn run(&self) {
        loop {
            let was_online = self.is_online();
            let online = self.probe.is_online().await;

            if online && !was_online {
                // Require the link to stay up for the debounce window
                // before announcing it; a flap during the window resets.
                tokio::time::sleep(self.debounce).await;
                if self.probe.is_online().await {
                    self.state.send_replace(true);
                    tracing::info!("connectivity regained; triggering sync");
                    self.online_trigger.notify_one();
                }
            } else {
                self.state.send_replace(online);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlipProbe {
        online: AtomicBool,
    }

    #[async_trait]
    impl ConnectivityProbe for FlipProbe {
        async fn is_online(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_now_tracks_probe_state() {
        let probe = Arc::new(FlipProbe {
            online: AtomicBool::new(false),
        });
        let monitor = ConnectivityMonitor::new(
            Arc::clone(&probe) as Arc<dyn ConnectivityProbe>,
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        assert!(!monitor.check_now().await);
        probe.online.store(true, Ordering::SeqCst);
        assert!(monitor.check_now().await);
        assert!(monitor.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stable_transition_fires_trigger_once() {
        let probe = Arc::new(FlipProbe {
            online: AtomicBool::new(false),
        });
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&probe) as Arc<dyn ConnectivityProbe>,
            Duration::from_millis(2),
            Duration::from_millis(2),
        ));
        let trigger = monitor.online_trigger();

        let runner = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { runner.run().await });

        probe.online.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), trigger.notified())
            .await
            .expect("trigger should fire after debounce");
        assert!(monitor.is_online());

        // Staying online must not fire again
        let again = tokio::time::timeout(Duration::from_millis(50), trigger.notified()).await;
        assert!(again.is_err());

        handle.abort();
    }
}
