//! Coordinator liveness monitor
//!
//! Runs the reconnect sequence until it succeeds, then pings the coordinator
//! on a fixed interval. A failed ping drops back into reconnecting. All calls
//! into the participant run on the blocking pool; the task itself holds no
//! lock while it sleeps.

use crate::manager::ResourceManager;
use crate::types::Record;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running monitor task
pub struct Monitor {
    shutdown: watch::Sender<bool>,
    connected: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl Monitor {
    /// Start the monitor task for `manager`
    pub fn start<R: Record>(manager: Arc<ResourceManager<R>>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (connected_tx, connected) = watch::channel(false);

        let handle = tokio::spawn(run(manager, shutdown_rx, connected_tx));

        Self {
            shutdown,
            connected,
            handle,
        }
    }

    /// Whether the last reconnect succeeded and no ping has failed since
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the participant has reconnected, or the monitor has stopped
    pub async fn wait_until_connected(&self) -> bool {
        let mut connected = self.connected.clone();
        connected.wait_for(|connected| *connected).await.is_ok()
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("Monitor task failed: {}", e);
        }
    }
}

async fn run<R: Record>(
    manager: Arc<ResourceManager<R>>,
    mut shutdown: watch::Receiver<bool>,
    connected: watch::Sender<bool>,
) {
    let name = manager.config().name.clone();
    let backoff = manager.config().reconnect_backoff;
    let interval = manager.config().monitor_interval;

    loop {
        // Reconnect until every pending transaction is re-enlisted
        loop {
            let attempt = manager.clone();
            match tokio::task::spawn_blocking(move || attempt.reconnect()).await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => tracing::warn!("[{}] Reconnect failed: {}", name, e),
                Err(e) => tracing::error!("[{}] Reconnect task failed: {}", name, e),
            }

            if !manager.is_alive() || sleep_or_shutdown(&mut shutdown, backoff).await {
                return;
            }
        }
        let _ = connected.send(true);

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }
            if !manager.is_alive() {
                return;
            }

            let ping = manager.clone();
            let alive = tokio::task::spawn_blocking(move || ping.ping_coordinator()).await;
            match alive {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tracing::warn!("[{}] Coordinator reports itself unhealthy", name);
                    break;
                }
                Ok(Err(e)) => {
                    tracing::warn!("[{}] Lost coordinator: {}", name, e);
                    break;
                }
                Err(e) => {
                    tracing::error!("[{}] Ping task failed: {}", name, e);
                    break;
                }
            }
        }
        let _ = connected.send(false);
    }
}

/// Sleep for `duration`; true if shutdown was requested meanwhile
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
