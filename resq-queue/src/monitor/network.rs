use std::time::Duration;

use async_trait::async_trait;
use resq_core::NetworkState;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::MonitorError;

/// Source of connectivity information.
#[async_trait]
pub trait NetworkMonitor: Send + Sync + 'static {
    /// One-shot query of the current state.
    async fn fetch_state(&self) -> Result<NetworkState, MonitorError>;

    /// Receiver that observes every published state change.
    fn subscribe(&self) -> watch::Receiver<NetworkState>;
}

/// Connectivity set explicitly by the embedding application.
#[derive(Debug)]
pub struct ManualNetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl ManualNetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(NetworkState::online())
    }

    pub fn offline() -> Self {
        Self::new(NetworkState::offline())
    }

    pub fn set(&self, state: NetworkState) {
        self.tx.send_replace(state);
    }

    pub fn go_online(&self) {
        self.set(NetworkState::online());
    }

    pub fn go_offline(&self) {
        self.set(NetworkState::offline());
    }

    pub fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }
}

#[async_trait]
impl NetworkMonitor for ManualNetworkMonitor {
    async fn fetch_state(&self) -> Result<NetworkState, MonitorError> {
        Ok(self.current())
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

/// Derives connectivity from TCP connects to a well-known endpoint.
///
/// A successful connect within `timeout` means online. Anything else is
/// reported as offline.
#[derive(Debug)]
pub struct ProbeNetworkMonitor {
    target: String,
    interval: Duration,
    timeout: Duration,
    tx: watch::Sender<NetworkState>,
    cancel: CancellationToken,
}

impl ProbeNetworkMonitor {
    pub fn new(target: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        // Unknown until the first probe completes.
        let (tx, _) = watch::channel(NetworkState {
            is_connected: false,
            is_internet_reachable: None,
        });

        Self {
            target: target.into(),
            interval,
            timeout,
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the probing loop. It runs until [`stop`](Self::stop) is called.
    pub fn start(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        let target = self.target.clone();
        let interval = self.interval;
        let timeout = self.timeout;
        let tx = self.tx.clone();

        info!(%target, interval_secs = interval.as_secs(), "Network probe started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Network probe shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let state = probe(&target, timeout).await;
                        publish(&tx, state);
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl NetworkMonitor for ProbeNetworkMonitor {
    async fn fetch_state(&self) -> Result<NetworkState, MonitorError> {
        if self.target.is_empty() {
            return Err(MonitorError::Unavailable("no probe target configured".into()));
        }

        let state = probe(&self.target, self.timeout).await;
        publish(&self.tx, state);
        Ok(state)
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

#[instrument(level = "debug", skip(timeout))]
async fn probe(target: &str, timeout: Duration) -> NetworkState {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => NetworkState::online(),
        Ok(Err(e)) => {
            debug!(error = %e, "Probe connect failed");
            NetworkState::offline()
        }
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "Probe timed out");
            NetworkState::offline()
        }
    }
}

fn publish(tx: &watch::Sender<NetworkState>, state: NetworkState) {
    let changed = tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });

    if changed {
        if state.is_online() {
            info!("Probe reports network reachable");
        } else {
            warn!("Probe reports network unreachable");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn probe_reports_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let monitor = ProbeNetworkMonitor::new(
            addr.to_string(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        let mut rx = monitor.subscribe();

        let state = monitor.fetch_state().await.unwrap();
        assert!(state.is_online());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_online());
    }

    #[tokio::test]
    async fn probe_reports_closed_port_as_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = ProbeNetworkMonitor::new(
            addr.to_string(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        let state = monitor.fetch_state().await.unwrap();
        assert!(!state.is_online());
    }

    #[tokio::test]
    async fn stop_ends_probe_loop() {
        let monitor = ProbeNetworkMonitor::new(
            "127.0.0.1:9",
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        let handle = monitor.start();

        monitor.stop();
        assert!(monitor.is_stopped());
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("probe loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn manual_monitor_publishes_changes() {
        let monitor = ManualNetworkMonitor::offline();
        let mut rx = monitor.subscribe();

        monitor.go_online();

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_online());
        assert!(monitor.fetch_state().await.unwrap().is_online());
    }
}
