//! Sync orchestrator: queue drain plus full cache resynchronization.
//!
//! `full_resync` walks the server serially: project list, then for every
//! active project its inspection list and each inspection detail. A failure
//! on one project never stops the others; the run never errors, it reports.

use std::sync::Arc;

use firespec_core::{InspectionId, ProjectId};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::RemoteApi;
use crate::cache::{LocalCache, record_id};
use crate::connectivity::ConnectivityMonitor;
use crate::types::{DrainReport, ProjectFailure, ReconcileReport, ResyncReport};
use crate::write_queue::{QueueError, WriteQueue};

/// Status of projects whose inspections are kept offline.
pub const DEFAULT_ACTIVE_STATUS: &str = "in_progress";

pub struct SyncManager {
    api: Arc<dyn RemoteApi>,
    cache: LocalCache,
    queue: WriteQueue,
    monitor: Arc<ConnectivityMonitor>,
    active_status: String,
    resync_lock: Mutex<()>,
}

impl SyncManager {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        cache: LocalCache,
        queue: WriteQueue,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            api,
            cache,
            queue,
            monitor,
            active_status: DEFAULT_ACTIVE_STATUS.to_string(),
            resync_lock: Mutex::new(()),
        }
    }

    pub fn with_active_status(self, status: impl Into<String>) -> Self {
        Self {
            active_status: status.into(),
            ..self
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.pending_count().await
    }

    /// Replay the offline queue.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        self.queue.drain(self.api.as_ref()).await
    }

    /// Drain, then resync, regardless of how the drain went.
    pub async fn reconcile(&self) -> ReconcileReport {
        let (drain, drain_error) = match self.drain().await {
            Ok(report) => (report, None),
            Err(err) => {
                tracing::error!("queue drain failed: {err}");
                (DrainReport::default(), Some(err.to_string()))
            }
        };

        let resync = self.full_resync().await;
        ReconcileReport {
            drain,
            drain_error,
            resync,
        }
    }

    /// Refresh the cache from the server.
    pub async fn full_resync(&self) -> ResyncReport {
        let _guard = self.resync_lock.lock().await;
        let mut report = ResyncReport::default();

        if !self.monitor.is_online() {
            tracing::info!("skipping resync while offline");
            report.interrupted = true;
            return report;
        }

        let projects = match self.api.list_projects().await {
            Ok(projects) => projects,
            Err(err) => {
                tracing::warn!("resync could not fetch projects: {err}");
                report.project_list_error = Some(err.to_string());
                return report;
            }
        };
        self.cache.save_project_list(&projects).await;
        report.projects_cached = projects.len();

        let active: Vec<ProjectId> = projects
            .iter()
            .filter(|project| is_active(project, &self.active_status))
            .filter_map(record_id)
            .map(ProjectId::new)
            .collect();
        tracing::info!(
            projects = projects.len(),
            active = active.len(),
            "resync started"
        );

        'projects: for project_id in active {
            if !self.monitor.is_online() {
                report.interrupted = true;
                break;
            }

            let inspections = match self.api.list_inspections(project_id).await {
                Ok(inspections) => inspections,
                Err(err) => {
                    tracing::warn!(%project_id, "resync of project failed: {err}");
                    report.failed_projects.push(ProjectFailure {
                        project_id,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            self.cache
                .replace_inspection_list(project_id, &inspections)
                .await;
            report.synced_projects.push(project_id);

            for inspection_id in inspections.iter().filter_map(record_id) {
                if !self.monitor.is_online() {
                    report.interrupted = true;
                    break 'projects;
                }

                match self
                    .api
                    .get_inspection(project_id, InspectionId::new(inspection_id))
                    .await
                {
                    Ok(detail) => {
                        self.cache.save_inspection_detail(&detail).await;
                        report.details_cached += 1;
                    }
                    Err(err) => {
                        tracing::warn!(%project_id, inspection_id, "inspection detail fetch failed: {err}");
                        report.detail_failures += 1;
                    }
                }
            }
        }

        if report.interrupted {
            tracing::info!("resync interrupted by loss of connectivity");
        }
        tracing::info!(
            synced = report.synced_projects.len(),
            failed = report.failed_projects.len(),
            details = report.details_cached,
            "resync finished"
        );
        report
    }
}

fn is_active(project: &Value, status: &str) -> bool {
    project.get("status").and_then(Value::as_str) == Some(status)
}
