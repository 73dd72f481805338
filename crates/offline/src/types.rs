//! Shared types for the offline components.
//!
//! Everything here is plain data: it is what the UI layer receives back from
//! the draft store, cache, queue and sync orchestrator.

use chrono::{DateTime, Utc};
use firespec_core::ProjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// The environment reports the network as reachable.
    Online,
    /// Network unreachable; writes go to the offline queue.
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// Kind of mutation a write performs against the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Create,
    Update,
    Delete,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Create => "create",
            WriteOperation::Update => "update",
            WriteOperation::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(WriteOperation::Create),
            "update" => Some(WriteOperation::Update),
            "delete" => Some(WriteOperation::Delete),
            _ => None,
        }
    }
}

/// A mutating call against the API, either sent directly or queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub operation: WriteOperation,
    /// Logical resource kind (`project`, `inspection`).
    pub resource_type: String,
    /// Path relative to the API base URL, e.g. `projects/42/inspections`.
    pub resource_path: String,
    pub payload: Value,
}

impl WriteRequest {
    pub fn new(
        operation: WriteOperation,
        resource_type: impl Into<String>,
        resource_path: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            operation,
            resource_type: resource_type.into(),
            resource_path: resource_path.into(),
            payload,
        }
    }

    pub fn create(resource_type: impl Into<String>, resource_path: impl Into<String>, payload: Value) -> Self {
        Self::new(WriteOperation::Create, resource_type, resource_path, payload)
    }

    pub fn update(resource_type: impl Into<String>, resource_path: impl Into<String>, payload: Value) -> Self {
        Self::new(WriteOperation::Update, resource_type, resource_path, payload)
    }

    pub fn delete(resource_type: impl Into<String>, resource_path: impl Into<String>) -> Self {
        Self::new(WriteOperation::Delete, resource_type, resource_path, Value::Null)
    }
}

/// A write recorded while the server could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Monotonic, assigned by storage; replay order.
    pub sequence_id: i64,
    pub request: WriteRequest,
    /// Draft to clear once the replay succeeds.
    pub draft_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// A queue item whose replay was attempted and failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item: QueueItem,
    pub error: String,
}

/// Result of one pass over the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Replayed and removed from the queue.
    pub succeeded: Vec<QueueItem>,
    /// Replayed, rejected, still queued in place.
    pub failed: Vec<FailedItem>,
    /// Not attempted because an earlier item on the same resource failed.
    pub blocked: Vec<QueueItem>,
    /// Accepted by the server but still stored locally because the row
    /// could not be deleted. Never sent again.
    #[serde(default)]
    pub unconfirmed: Vec<QueueItem>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.unconfirmed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// A project whose inspections could not be refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFailure {
    pub project_id: ProjectId,
    pub error: String,
}

/// Result of a full resynchronization of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResyncReport {
    /// Set when the project list itself could not be fetched.
    pub project_list_error: Option<String>,
    pub projects_cached: usize,
    /// Active projects whose inspection list was replaced.
    pub synced_projects: Vec<ProjectId>,
    pub failed_projects: Vec<ProjectFailure>,
    pub details_cached: usize,
    pub detail_failures: usize,
    /// Connectivity dropped mid-run and the remaining projects were skipped.
    pub interrupted: bool,
}

impl ResyncReport {
    pub fn is_complete(&self) -> bool {
        self.project_list_error.is_none()
            && self.failed_projects.is_empty()
            && self.detail_failures == 0
            && !self.interrupted
    }
}

/// Drain followed by resync, as run after reconnecting or on "sync now".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub drain: DrainReport,
    /// Set when the queue could not be read at all.
    pub drain_error: Option<String>,
    pub resync: ResyncReport,
}

/// How a mutating action was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The server accepted the write; carries its response body.
    SavedToServer { response: Value },
    /// Stored in the offline queue; will be replayed later.
    SavedLocally { sequence_id: i64 },
}

impl WriteOutcome {
    pub fn is_local(&self) -> bool {
        matches!(self, WriteOutcome::SavedLocally { .. })
    }
}

/// Notifications published by the reconnect worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    WentOffline,
    /// Queue drained at worker start-up because items were left over.
    StartupDrain { report: DrainReport },
    /// Drain and resync ran after an offline → online transition.
    Reconciled { report: ReconcileReport },
    Failed { error: String },
}
