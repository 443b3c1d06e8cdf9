use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use fanout_core::types::DbId;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanout_monitor::{ExecutionBoard, HttpSnapshotFetcher, MonitorConfig, MonitorEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout_monitor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = MonitorConfig::from_env()?;
    tracing::info!(api_url = %config.api_url, "Loaded monitor configuration");

    let execution_ids = std::env::args()
        .skip(1)
        .map(|arg| {
            arg.parse::<DbId>()
                .with_context(|| format!("Invalid execution id: {arg}"))
        })
        .collect::<anyhow::Result<BTreeSet<DbId>>>()?;
    if execution_ids.is_empty() {
        bail!("usage: fanout-monitor <execution-id>...");
    }

    // A single execution gets the detail-view cadence, several get the board's.
    let polling = if execution_ids.len() == 1 {
        config.execution
    } else {
        config.board
    };
    let fetcher = HttpSnapshotFetcher::new(&config.api_url, polling.fetch_timeout)
        .context("Failed to build HTTP client")?;
    let board = ExecutionBoard::with_config(Arc::new(fetcher), polling);

    let mut events = board.subscribe();
    for id in &execution_ids {
        board.track(*id);
    }

    let mut remaining = execution_ids;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(MonitorEvent::Progress(update)) => {
                    tracing::info!(
                        execution_id = update.execution_id,
                        status = %update.status,
                        progress = update.progress_percent,
                        completed = update.branches.completed,
                        failed = update.branches.failed,
                        total = update.branches.total,
                        "Progress",
                    );
                }
                Ok(MonitorEvent::Completed(update)) => {
                    tracing::info!(
                        execution_id = update.execution_id,
                        status = %update.status,
                        "Execution finished",
                    );
                    remaining.remove(&update.execution_id);
                    if remaining.is_empty() {
                        break;
                    }
                }
                Ok(MonitorEvent::FetchFailed { execution_id, error, consecutive_failures }) => {
                    tracing::warn!(execution_id, consecutive_failures, error = %error, "Fetch failed");
                    for stale in board.stale(Utc::now()) {
                        tracing::warn!(execution_id = stale, "No successful update recently; data is stale");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    board.cancel_all();
    tracing::info!("Monitor stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
