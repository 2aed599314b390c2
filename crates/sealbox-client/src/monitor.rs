//! Background pollers for the audit trail and statistics.
//!
//! Each poller runs until its receiver is dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sealbox_core::{AccessLogEntry, StatsSnapshot};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::service::ShareService;

pub enum MonitorUpdate {
    /// Entries not seen in any earlier poll, newest first
    Logs(Vec<AccessLogEntry>),
    Stats(StatsSnapshot),
    /// One poll failed; polling continues
    Failed(String),
}

pub async fn poll_logs<S>(
    service: Arc<S>,
    owner: Option<String>,
    every: Duration,
    tx: mpsc::Sender<MonitorUpdate>,
) where
    S: ShareService + ?Sized,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }

        let update = match service.access_logs(owner.as_deref()).await {
            Ok(entries) => {
                let fresh: Vec<AccessLogEntry> = entries
                    .into_iter()
                    .filter(|e| seen.insert(e.id.clone()))
                    .collect();
                debug!(fresh = fresh.len(), total = seen.len(), "polled access logs");
                if fresh.is_empty() {
                    continue;
                }
                MonitorUpdate::Logs(fresh)
            }
            Err(e) => {
                warn!("access log poll failed: {e}");
                MonitorUpdate::Failed(format!("logs: {e}"))
            }
        };

        if tx.send(update).await.is_err() {
            return; // receiver dropped
        }
    }
}

pub async fn poll_stats<S>(
    service: Arc<S>,
    owner: Option<String>,
    every: Duration,
    tx: mpsc::Sender<MonitorUpdate>,
) where
    S: ShareService + ?Sized,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let update = match service.stats(owner.as_deref()).await {
            Ok(snapshot) => MonitorUpdate::Stats(snapshot),
            Err(e) => {
                warn!("stats poll failed: {e}");
                MonitorUpdate::Failed(format!("stats: {e}"))
            }
        };

        if tx.send(update).await.is_err() {
            return;
        }
    }
}
