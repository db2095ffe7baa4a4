//! Online/offline signal shared by the sync engine and whatever observes the network.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::remote::RemoteBackend;

#[derive(Clone, Debug)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish a new state; subscribers only wake on an actual transition.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Ping the backend once and publish the result.
pub async fn probe_once(remote: &dyn RemoteBackend, connectivity: &Connectivity) -> bool {
    let online = match remote.ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!(kind = err.kind(), error = %err, "backend unreachable");
            false
        }
    };
    if connectivity.set_online(online) {
        info!(online, "connectivity changed");
    }
    online
}

/// Probe reachability every `interval` until `shutdown` flips to true or its sender drops.
pub async fn run_probe(
    remote: Arc<dyn RemoteBackend>,
    connectivity: Connectivity,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                probe_once(remote.as_ref(), &connectivity).await;
            }
        }
    }
}
