//! Application facade used by the UI layer.
//!
//! `AppState` wires the draft store, cache, queue, connectivity monitor and
//! sync orchestrator around one [`RemoteApi`]. Reads are read-through: the
//! server when reachable, the cache otherwise. Writes go to the server when
//! online and to the offline queue when not.

use std::sync::Arc;

use anyhow::Context;
use firespec_core::{InspectionDraft, InspectionId, ProjectId, change_log};
use serde_json::Value;
use thiserror::Error;

use crate::api::{
    ApiError, HttpApiClient, INSPECTION_RESOURCE, PROJECT_RESOURCE, RemoteApi, inspection_path,
    inspections_path, project_path, projects_path,
};
use crate::cache::{LocalCache, record_id};
use crate::config::OfflineConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, OfflineError};
use crate::drafts::{DraftScope, DraftStore};
use crate::store::LocalStore;
use crate::sync::SyncManager;
use crate::types::{ReconcileReport, WriteOutcome, WriteRequest};
use crate::worker::ReconnectWorker;
use crate::write_queue::{QueueError, WriteQueue};

#[derive(Debug, Error)]
pub enum WriteError {
    /// The server answered and refused the write.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The write could neither reach the server nor be queued.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl WriteError {
    pub fn user_message(&self) -> String {
        match self {
            WriteError::Api(err) => err.user_message(),
            WriteError::Queue(_) => {
                "Could not save your changes on this device. Please try again.".to_string()
            }
        }
    }
}

/// Application state shared by every screen.
#[derive(Clone)]
pub struct AppState {
    api: Arc<dyn RemoteApi>,
    monitor: Arc<ConnectivityMonitor>,
    drafts: DraftStore,
    cache: LocalCache,
    queue: WriteQueue,
    sync: Arc<SyncManager>,
}

impl AppState {
    pub fn new(
        store: LocalStore,
        api: Arc<dyn RemoteApi>,
        monitor: Arc<ConnectivityMonitor>,
        active_status: impl Into<String>,
    ) -> Self {
        let drafts = DraftStore::new(store.clone());
        let cache = LocalCache::new(store.clone());
        let queue = WriteQueue::new(store);
        let sync = Arc::new(
            SyncManager::new(api.clone(), cache.clone(), queue.clone(), monitor.clone())
                .with_active_status(active_status),
        );

        Self {
            api,
            monitor,
            drafts,
            cache,
            queue,
            sync,
        }
    }

    /// Build from configuration: HTTP client, on-disk store, and a
    /// connectivity state probed once against the API.
    pub async fn open(config: &OfflineConfig) -> anyhow::Result<Self> {
        let mut client = HttpApiClient::new(&config.api_url)
            .with_context(|| format!("failed to create API client for {}", config.api_url))?;
        if let Some(token) = &config.auth_token {
            client = client.with_token(token);
        }
        let client = Arc::new(client);

        let monitor = Arc::new(ConnectivityMonitor::detect(client.clone()).await);
        let database = config.database_path();
        let store = LocalStore::at_path(database.clone());
        tracing::info!(database = ?database, api_url = %config.api_url, "offline state opened");

        Ok(Self::new(store, client, monitor, config.active_status.clone()))
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.state()
    }

    /// Spawn a reconnect worker bound to this state.
    pub fn start_worker(&self) -> (ReconnectWorker, tokio::task::JoinHandle<()>) {
        let worker = ReconnectWorker::new(self.sync.clone());
        let handle = worker.start();
        (worker, handle)
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.pending_count().await
    }

    /// Drain and resync on demand.
    pub async fn sync_now(&self) -> Result<ReconcileReport, OfflineError> {
        self.monitor.require_online()?;
        Ok(self.sync.reconcile().await)
    }

    // -- reads ----------------------------------------------------------------

    pub async fn projects(&self) -> Vec<Value> {
        if self.monitor.is_online() {
            match self.api.list_projects().await {
                Ok(projects) => {
                    self.cache.save_project_list(&projects).await;
                    return projects;
                }
                Err(err) => tracing::warn!("project list unavailable, using cache: {err}"),
            }
        }
        self.cache.get_project_list().await
    }

    pub async fn project(&self, project_id: ProjectId) -> Option<Value> {
        if self.monitor.is_online() {
            match self.api.list_projects().await {
                Ok(projects) => {
                    self.cache.save_project_list(&projects).await;
                    return projects
                        .into_iter()
                        .find(|p| record_id(p) == Some(project_id.get()));
                }
                Err(err) => tracing::warn!(%project_id, "project unavailable, using cache: {err}"),
            }
        }
        self.cache.get_project(project_id).await
    }

    pub async fn inspections(&self, project_id: ProjectId) -> Vec<Value> {
        if self.monitor.is_online() {
            match self.api.list_inspections(project_id).await {
                Ok(inspections) => {
                    self.cache
                        .replace_inspection_list(project_id, &inspections)
                        .await;
                    return inspections;
                }
                Err(err) => {
                    tracing::warn!(%project_id, "inspection list unavailable, using cache: {err}")
                }
            }
        }
        self.cache.get_inspection_list(project_id).await
    }

    pub async fn inspection(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Option<Value> {
        if self.monitor.is_online() {
            match self.api.get_inspection(project_id, inspection_id).await {
                Ok(detail) => {
                    self.cache.save_inspection_detail(&detail).await;
                    return Some(detail);
                }
                Err(err) => tracing::warn!(
                    %project_id,
                    %inspection_id,
                    "inspection unavailable, using cache: {err}"
                ),
            }
        }
        self.cache.get_inspection_detail(inspection_id).await
    }

    /// Most recent inspection of a project. Not cached.
    pub async fn latest_inspection(&self, project_id: ProjectId) -> Result<Option<Value>, ApiError> {
        self.monitor.require_online()?;
        self.api.latest_inspection(project_id).await
    }

    /// Server-side change history of an inspection. Not cached.
    pub async fn change_log(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Vec<Value>, ApiError> {
        self.monitor.require_online()?;
        self.api.change_log(project_id, inspection_id).await
    }

    // -- writes ---------------------------------------------------------------

    pub async fn create_project(&self, payload: Value) -> Result<WriteOutcome, WriteError> {
        self.submit(WriteRequest::create(PROJECT_RESOURCE, projects_path(), payload), None)
            .await
    }

    pub async fn update_project(
        &self,
        project_id: ProjectId,
        payload: Value,
    ) -> Result<WriteOutcome, WriteError> {
        self.submit(
            WriteRequest::update(PROJECT_RESOURCE, project_path(project_id), payload),
            None,
        )
        .await
    }

    pub async fn delete_project(&self, project_id: ProjectId) -> Result<WriteOutcome, WriteError> {
        self.submit(WriteRequest::delete(PROJECT_RESOURCE, project_path(project_id)), None)
            .await
    }

    /// Submit a new inspection; its creation draft is cleared once the
    /// server has it.
    pub async fn create_inspection(
        &self,
        project_id: ProjectId,
        draft: &InspectionDraft,
        inspector_name: Option<&str>,
    ) -> Result<WriteOutcome, WriteError> {
        let request = WriteRequest::create(
            INSPECTION_RESOURCE,
            inspections_path(project_id),
            draft.to_payload(inspector_name),
        );
        self.submit(request, Some(DraftScope::create(project_id))).await
    }

    /// Submit edits to an inspection, with a change log against `previous`.
    pub async fn update_inspection(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
        previous: &InspectionDraft,
        draft: &InspectionDraft,
        inspector_name: Option<&str>,
    ) -> Result<WriteOutcome, WriteError> {
        let mut payload = draft.to_payload(inspector_name);
        if let Value::Object(body) = &mut payload {
            let changes = serde_json::to_value(change_log(previous, draft))
                .unwrap_or_else(|_| Value::Array(Vec::new()));
            body.insert("log_changes".to_string(), changes);
        }

        let request = WriteRequest::update(
            INSPECTION_RESOURCE,
            inspection_path(project_id, inspection_id),
            payload,
        );
        self.submit(request, Some(DraftScope::edit(project_id, inspection_id)))
            .await
    }

    pub async fn delete_inspection(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<WriteOutcome, WriteError> {
        let request =
            WriteRequest::delete(INSPECTION_RESOURCE, inspection_path(project_id, inspection_id));
        self.submit(request, None).await
    }

    async fn submit(
        &self,
        request: WriteRequest,
        draft: Option<DraftScope>,
    ) -> Result<WriteOutcome, WriteError> {
        if !self.monitor.is_online() {
            return self.save_locally(request, draft).await;
        }

        match self.api.execute(&request).await {
            Ok(response) => {
                if let Some(scope) = draft {
                    self.drafts.clear_draft(scope).await;
                }
                Ok(WriteOutcome::SavedToServer { response })
            }
            Err(err) if err.is_connectivity() => {
                tracing::warn!(
                    resource_path = %request.resource_path,
                    "server unreachable, queueing write: {err}"
                );
                self.save_locally(request, draft).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save_locally(
        &self,
        request: WriteRequest,
        draft: Option<DraftScope>,
    ) -> Result<WriteOutcome, WriteError> {
        let sequence_id = self.queue.enqueue(request, draft).await?;
        Ok(WriteOutcome::SavedLocally { sequence_id })
    }
}
