#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use firespec_core::{InspectionId, ProjectId};
use firespec_offline::{
    ApiError, AppState, ConnectivityMonitor, ConnectivityState, LocalStore, RemoteApi, WriteRequest,
};
use serde_json::{Value, json};

/// Holds the next project list request until released.
#[derive(Clone, Default)]
pub struct ListGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// In-memory stand-in for the inspection API.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    projects: Vec<Value>,
    inspections: HashMap<i64, Vec<Value>>,
    details: HashMap<i64, Value>,
    failing_lists: HashSet<i64>,
    rejected_writes: HashMap<String, ApiError>,
    unreachable: bool,
    disconnect_after_list: Option<(i64, Arc<ConnectivityMonitor>)>,
    project_list_gate: Option<ListGate>,
    executed: Vec<WriteRequest>,
    project_list_calls: usize,
    inspection_list_calls: Vec<i64>,
    next_id: i64,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, id: i64, status: &str) -> Self {
        self.state.lock().unwrap().projects.push(json!({
            "id": id,
            "name": format!("Project {id}"),
            "status": status,
        }));
        self
    }

    /// Inspection summaries for a project; details are served for each.
    pub fn with_inspections(self, project_id: i64, ids: &[i64]) -> Self {
        self.set_inspections(project_id, ids, "v1");
        self
    }

    pub fn set_inspections(&self, project_id: i64, ids: &[i64], version: &str) {
        let mut state = self.state.lock().unwrap();
        let summaries = ids
            .iter()
            .map(|id| json!({ "id": id, "project_id": project_id, "version": version }))
            .collect();
        state.inspections.insert(project_id, summaries);
        for id in ids {
            state.details.insert(
                *id,
                json!({ "id": id, "project_id": project_id, "version": version, "project_information": {} }),
            );
        }
    }

    pub fn fail_inspection_list(&self, project_id: i64) {
        self.state.lock().unwrap().failing_lists.insert(project_id);
    }

    pub fn reject_write(&self, path: &str, err: ApiError) {
        self.state
            .lock()
            .unwrap()
            .rejected_writes
            .insert(path.to_string(), err);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Report the network lost right after listing this project's inspections.
    pub fn disconnect_after_list(&self, project_id: i64, monitor: Arc<ConnectivityMonitor>) {
        self.state.lock().unwrap().disconnect_after_list = Some((project_id, monitor));
    }

    /// Park the next `list_projects` call on the returned gate.
    pub fn gate_project_list(&self) -> ListGate {
        let gate = ListGate::default();
        self.state.lock().unwrap().project_list_gate = Some(gate.clone());
        gate
    }

    pub fn executed_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .executed
            .iter()
            .map(|r| r.resource_path.clone())
            .collect()
    }

    pub fn executed(&self) -> Vec<WriteRequest> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn project_list_calls(&self) -> usize {
        self.state.lock().unwrap().project_list_calls
    }

    pub fn inspection_list_calls(&self) -> Vec<i64> {
        self.state.lock().unwrap().inspection_list_calls.clone()
    }

    fn check_reachable(&self) -> Result<(), ApiError> {
        if self.state.lock().unwrap().unreachable {
            Err(ApiError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RemoteApi for FakeApi {
    async fn list_projects(&self) -> Result<Vec<Value>, ApiError> {
        let gate = self.state.lock().unwrap().project_list_gate.take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.project_list_calls += 1;
        Ok(state.projects.clone())
    }

    async fn list_inspections(&self, project_id: ProjectId) -> Result<Vec<Value>, ApiError> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.inspection_list_calls.push(project_id.get());

        if state.failing_lists.contains(&project_id.get()) {
            return Err(ApiError::Status {
                status: 500,
                message: Some("boom".into()),
            });
        }

        if let Some((pid, monitor)) = &state.disconnect_after_list {
            if *pid == project_id.get() {
                monitor.handle_offline();
            }
        }

        Ok(state
            .inspections
            .get(&project_id.get())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_inspection(
        &self,
        _project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Value, ApiError> {
        self.check_reachable()?;
        self.state
            .lock()
            .unwrap()
            .details
            .get(&inspection_id.get())
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: None,
            })
    }

    async fn latest_inspection(&self, project_id: ProjectId) -> Result<Option<Value>, ApiError> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .inspections
            .get(&project_id.get())
            .and_then(|list| list.last().cloned()))
    }

    async fn change_log(
        &self,
        _project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Vec<Value>, ApiError> {
        self.check_reachable()?;
        Ok(vec![json!({ "inspection_id": inspection_id.get(), "changes": [] })])
    }

    async fn execute(&self, request: &WriteRequest) -> Result<Value, ApiError> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.rejected_writes.get(&request.resource_path) {
            return Err(err.clone());
        }
        state.executed.push(request.clone());
        state.next_id += 1;
        Ok(json!({ "id": 1000 + state.next_id }))
    }
}

/// App state over an in-memory store and the given fake.
pub fn app_with(api: Arc<FakeApi>, initial: ConnectivityState) -> AppState {
    app_at(LocalStore::in_memory(), api, initial)
}

pub fn app_at(store: LocalStore, api: Arc<FakeApi>, initial: ConnectivityState) -> AppState {
    let monitor = Arc::new(ConnectivityMonitor::new(initial));
    AppState::new(store, api, monitor, "in_progress")
}
