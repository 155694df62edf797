//! Periodic background work: chain sweeps, search sync and audit retention.
//!
//! Each job runs on its own `tokio` interval and stops when the shutdown
//! channel flips to `true`. Runs of one job never overlap; different jobs
//! are not coordinated beyond the store's conditional writes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::service::{HttpSearchIndexer, SearchIndexer, SearchSyncWorker};

/// Audit retention runs once a day.
const AUDIT_PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Starts every enabled job.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the search indexer client cannot
/// be built.
pub fn spawn_all(
    config: &GatewayConfig,
    state: &AppState,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, GatewayError> {
    let mut handles = Vec::new();
    let sweeps = &config.sweeps;

    if sweeps.watcher_enabled {
        let reconciler = Arc::clone(&state.reconciler);
        let batch = sweeps.watcher_batch_size;
        handles.push(spawn_periodic(
            "tx_watcher",
            Duration::from_secs(sweeps.watcher_interval_secs),
            shutdown.clone(),
            move || {
                let reconciler = Arc::clone(&reconciler);
                async move {
                    match reconciler.run_tx_watcher(batch, false).await {
                        Ok(summary) => debug!(
                            scanned = summary.scanned,
                            synced_commitments = summary.synced_commitments,
                            synced_registrations = summary.synced_registrations,
                            failed = summary.failed,
                            "Tx watcher pass"
                        ),
                        Err(e) => error!(error = %e, "Tx watcher pass failed"),
                    }
                }
            },
        ));
    }

    if sweeps.reconciler_enabled {
        let reconciler = Arc::clone(&state.reconciler);
        let batch = sweeps.reconciler_batch_size;
        let stale_minutes = sweeps.reconciler_stale_minutes;
        handles.push(spawn_periodic(
            "stale_reconciler",
            Duration::from_secs(sweeps.reconciler_interval_secs),
            shutdown.clone(),
            move || {
                let reconciler = Arc::clone(&reconciler);
                async move {
                    match reconciler
                        .run_stale_reconciler(batch, stale_minutes, false)
                        .await
                    {
                        Ok(summary) => debug!(
                            scanned = summary.scanned,
                            expired = summary.expired,
                            failed = summary.failed,
                            "Stale reconciler pass"
                        ),
                        Err(e) => error!(error = %e, "Stale reconciler pass failed"),
                    }
                }
            },
        ));
    }

    if let Some(url) = config.search_sync.index_url.as_deref() {
        let indexer: Arc<dyn SearchIndexer> = Arc::new(HttpSearchIndexer::new(
            url,
            Duration::from_secs(config.chain.rpc_timeout_secs),
        )?);
        let worker = Arc::new(SearchSyncWorker::new(
            Arc::clone(&state.search_queue),
            indexer,
            config.search_sync.batch_size,
        ));
        handles.push(spawn_periodic(
            "search_sync",
            Duration::from_secs(config.search_sync.interval_secs),
            shutdown.clone(),
            move || {
                let worker = Arc::clone(&worker);
                async move {
                    match worker.run_once().await {
                        Ok(report) if report.claimed > 0 => debug!(
                            claimed = report.claimed,
                            succeeded = report.succeeded,
                            dead_lettered = report.dead_lettered,
                            unsettled = report.unsettled,
                            "Search sync pass"
                        ),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Search sync pass failed"),
                    }
                }
            },
        ));
    } else {
        info!("SEARCH_INDEX_URL not set; search sync worker disabled");
    }

    if config.audit_retention_days > 0 {
        let ops = Arc::clone(&state.ops);
        let days = config.audit_retention_days;
        handles.push(spawn_periodic(
            "audit_retention",
            AUDIT_PURGE_INTERVAL,
            shutdown.clone(),
            move || {
                let ops = Arc::clone(&ops);
                async move {
                    if let Err(e) = ops.purge_audit(days).await {
                        error!(error = %e, "Audit retention sweep failed");
                    }
                }
            },
        ));
    }

    Ok(handles)
}

/// Runs `job` every `every` until shutdown. The first run is immediate.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        info!(job = name, interval_secs = every.as_secs(), "Background job started");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(job = name, "Background job stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn periodic_job_runs_until_shutdown() {
        let runs = Arc::new(AtomicU32::new(0));
        let (tx, rx) = watch::channel(false);
        let counter = Arc::clone(&runs);
        let handle = spawn_periodic("test", Duration::from_secs(10), rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(tx.send(true).is_ok());
        assert!(handle.await.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
