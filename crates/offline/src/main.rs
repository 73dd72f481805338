//! `firespec-sync`: one-shot headless reconcile.
//!
//! Replays any writes left in the offline queue, then refreshes the local
//! cache from the server. Configuration comes from `FIRESPEC_*` variables.

use anyhow::Context;
use firespec_offline::{AppState, OfflineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    firespec_observability::init();

    let config = OfflineConfig::from_env().context("failed to load configuration")?;
    let state = AppState::open(&config).await?;

    let pending = state.pending_count().await;
    tracing::info!(pending, connectivity = ?state.connectivity(), "starting sync");

    let report = state
        .sync_now()
        .await
        .context("server unreachable; queued writes kept for the next run")?;

    for failed in &report.drain.failed {
        tracing::warn!(
            sequence_id = failed.item.sequence_id,
            resource_path = %failed.item.request.resource_path,
            "queued write rejected: {}",
            failed.error
        );
    }

    tracing::info!(
        replayed = report.drain.succeeded.len(),
        failed = report.drain.failed.len(),
        blocked = report.drain.blocked.len(),
        projects = report.resync.projects_cached,
        synced_projects = report.resync.synced_projects.len(),
        failed_projects = report.resync.failed_projects.len(),
        "sync finished"
    );

    if let Some(error) = &report.drain_error {
        anyhow::bail!("offline queue unavailable: {error}");
    }
    Ok(())
}
