//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Transport availability tracking."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::sync::Arc;

use r_nuo_transport::{StatusNotification, TransportStatusCode};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Latest status reported by the mesh driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportStatus {
    /// Status code.
    pub code: TransportStatusCode,
    /// Driver supplied description.
    pub description: String,
    /// Whether the driver reports itself usable.
    pub available: bool,
}

impl TransportStatus {
    /// Whether new update work may start under this status.
    pub fn accepts_operations(&self) -> bool {
        self.available && !self.code.is_blocking()
    }
}

impl From<StatusNotification> for TransportStatus {
    fn from(value: StatusNotification) -> Self {
        Self {
            code: value.code,
            description: value.description,
            available: value.available,
        }
    }
}

/// Single-writer cell holding the transport availability snapshot.
///
/// The notification pump is the only writer; every other component reads
/// snapshots or awaits changes.
#[derive(Debug, Clone)]
pub struct TransportStatusTracker {
    tx: Arc<watch::Sender<Option<TransportStatus>>>,
}

impl Default for TransportStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportStatusTracker {
    /// Tracker that has not seen any notification yet.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record a notification.
    pub fn apply(&self, notification: StatusNotification) {
        let status = TransportStatus::from(notification);
        if status.code == TransportStatusCode::Offline {
            warn!(description = %status.description, "mesh transport went offline");
        } else {
            debug!(code = %status.code, available = status.available, description = %status.description, "mesh transport status changed");
        }
        self.tx.send_replace(Some(status));
    }

    /// Current status, `None` before the first notification.
    pub fn snapshot(&self) -> Option<TransportStatus> {
        self.tx.borrow().clone()
    }

    /// `Ok` when update work may start, otherwise the reason it may not.
    pub fn readiness(&self) -> Result<(), String> {
        match &*self.tx.borrow() {
            None => Err("mesh connection not established".to_owned()),
            Some(status) if !status.accepts_operations() => Err(status.description.clone()),
            Some(_) => Ok(()),
        }
    }

    /// Whether update work may start.
    pub fn is_available(&self) -> bool {
        self.readiness().is_ok()
    }

    /// Receiver observing every status change.
    pub fn subscribe(&self) -> watch::Receiver<Option<TransportStatus>> {
        self.tx.subscribe()
    }

    /// Resolve once the transport reports `Offline`.
    pub async fn wait_offline(&self) {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|status| {
                matches!(status, Some(status) if status.code == TransportStatusCode::Offline)
            })
            .await;
    }

    /// Forward driver notifications into the tracker until the feed closes.
    pub fn spawn_pump(&self, mut feed: broadcast::Receiver<StatusNotification>) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(notification) => tracker.apply(notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "status notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("status notification feed closed");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn not_ready_before_first_notification() {
        let tracker = TransportStatusTracker::new();
        assert_eq!(tracker.snapshot(), None);
        assert_eq!(
            tracker.readiness(),
            Err("mesh connection not established".to_owned())
        );
    }

    #[test]
    fn blocking_codes_and_unavailable_driver_are_not_ready() {
        let tracker = TransportStatusTracker::new();
        tracker.apply(StatusNotification::online());
        assert!(tracker.is_available());

        for code in 2u8..=4 {
            tracker.apply(StatusNotification::new(TransportStatusCode::from_code(code), true));
            assert!(!tracker.is_available(), "code {code}");
        }

        tracker.apply(StatusNotification::new(TransportStatusCode::NetDiscoveryInProgress, true));
        assert!(tracker.is_available());

        tracker.apply(StatusNotification::new(TransportStatusCode::Online, false));
        assert_eq!(tracker.readiness(), Err("Online".to_owned()));
    }

    #[test]
    fn unrecognised_codes_do_not_block() {
        let tracker = TransportStatusTracker::new();
        tracker.apply(StatusNotification::new(TransportStatusCode::from_code(42), true));
        assert!(tracker.is_available());
        assert_eq!(
            tracker.snapshot().unwrap().code,
            TransportStatusCode::Unrecognised(42)
        );
    }

    #[tokio::test]
    async fn pump_forwards_notifications_and_signals_offline() {
        let tracker = TransportStatusTracker::new();
        let (tx, rx) = broadcast::channel(8);
        let pump = tracker.spawn_pump(rx);

        tx.send(StatusNotification::online()).unwrap();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_offline().await })
        };
        tx.send(StatusNotification::offline()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!tracker.is_available());

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .unwrap()
            .unwrap();
    }
}
