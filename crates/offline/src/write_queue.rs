//! Ordered offline write queue persisted in SQLite.
//!
//! Writes made while the server is unreachable are stored in the
//! `offline_queue` table and replayed in ascending `sequence_id` order once
//! connectivity returns. An item leaves the queue only after the server has
//! accepted it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::api::RemoteApi;
use crate::drafts::{DraftScope, DraftStore};
use crate::store::LocalStore;
use crate::types::{DrainReport, FailedItem, QueueItem, WriteOperation, WriteRequest};

const REMOVE_ATTEMPTS: u32 = 3;
const REMOVE_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("offline queue storage is unavailable: {0}")]
    StorageUnavailable(String),
}

impl QueueError {
    fn storage(err: anyhow::Error) -> Self {
        QueueError::StorageUnavailable(format!("{err:#}"))
    }
}

/// SQLite-backed write queue.
///
/// Cheap to clone; clones share storage and the drain guard.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    store: LocalStore,
    drafts: DraftStore,
    /// Held for the length of a drain. Holds the sequence ids the server
    /// accepted but whose rows could not be deleted.
    applied: Arc<Mutex<HashSet<i64>>>,
}

impl WriteQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            drafts: DraftStore::new(store.clone()),
            store,
            applied: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Append a write; returns its sequence id.
    ///
    /// `draft` names the form the write came from, cleared once the replay
    /// succeeds. Fails only when durable storage cannot be used.
    pub async fn enqueue(
        &self,
        request: WriteRequest,
        draft: Option<DraftScope>,
    ) -> Result<i64, QueueError> {
        let sequence_id = self
            .try_insert(&request, draft.map(|scope| scope.key()))
            .await
            .map_err(|err| {
                tracing::error!("failed to enqueue offline write: {err:?}");
                QueueError::storage(err)
            })?;

        tracing::info!(
            sequence_id,
            operation = request.operation.as_str(),
            resource_path = %request.resource_path,
            "write queued for later sync"
        );
        Ok(sequence_id)
    }

    /// Queued items in replay order.
    pub async fn list_pending(&self) -> Result<Vec<QueueItem>, QueueError> {
        self.try_list().await.map_err(QueueError::storage)
    }

    /// Number of queued items; 0 when storage cannot be read.
    pub async fn pending_count(&self) -> usize {
        match self.try_count().await {
            Ok(count) => count,
            Err(err) => {
                tracing::error!("failed to count queued writes: {err:?}");
                0
            }
        }
    }

    /// Replay every queued item against `api`, oldest first.
    ///
    /// A failed item stays where it is. Later items touching the same
    /// resource are held back behind it; once the server stops answering,
    /// everything after is held back too. A second caller waits for the
    /// running drain and then works on what is left. A write the server has
    /// accepted is never sent again, even when its row could not be deleted.
    pub async fn drain(&self, api: &dyn RemoteApi) -> Result<DrainReport, QueueError> {
        let mut applied = self.applied.lock().await;
        let leftovers: Vec<i64> = applied.iter().copied().collect();
        for sequence_id in leftovers {
            if self.remove_with_retry(sequence_id).await.is_ok() {
                applied.remove(&sequence_id);
            }
        }

        let items = self.list_pending().await?;
        let mut report = DrainReport::default();
        if items.is_empty() {
            return Ok(report);
        }

        tracing::info!("replaying {} queued write(s)", items.len());
        let mut held_paths: Vec<String> = Vec::new();
        let mut unreachable = false;

        for item in items {
            if applied.contains(&item.sequence_id) {
                report.unconfirmed.push(item);
                continue;
            }

            let path = &item.request.resource_path;
            if unreachable || held_paths.iter().any(|held| same_resource(held, path)) {
                tracing::debug!(sequence_id = item.sequence_id, %path, "holding back queued write");
                report.blocked.push(item);
                continue;
            }

            match api.execute(&item.request).await {
                Ok(_) => {
                    if let Some(key) = &item.draft_key {
                        self.drafts.clear_key(key).await;
                    }
                    match self.remove_with_retry(item.sequence_id).await {
                        Ok(()) => {
                            tracing::debug!(sequence_id = item.sequence_id, "queued write replayed");
                            report.succeeded.push(item);
                        }
                        Err(err) => {
                            tracing::error!(
                                sequence_id = item.sequence_id,
                                "replayed write could not be removed from queue: {err:?}"
                            );
                            applied.insert(item.sequence_id);
                            report.unconfirmed.push(item);
                        }
                    }
                }
                Err(err) => {
                    let error = err.to_string();
                    tracing::warn!(sequence_id = item.sequence_id, %path, "queued write failed: {error}");
                    if let Err(store_err) = self.try_record_failure(item.sequence_id, &error).await {
                        tracing::error!(
                            sequence_id = item.sequence_id,
                            "failed to record replay failure: {store_err:?}"
                        );
                    }

                    unreachable = err.is_connectivity();
                    held_paths.push(path.clone());
                    let item = QueueItem {
                        attempts: item.attempts.saturating_add(1),
                        last_error: Some(error.clone()),
                        ..item
                    };
                    report.failed.push(FailedItem { item, error });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            unconfirmed = report.unconfirmed.len(),
            "queue drain finished"
        );
        Ok(report)
    }

    async fn try_insert(&self, request: &WriteRequest, draft_key: Option<String>) -> anyhow::Result<i64> {
        let pool = self.store.pool().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO offline_queue (
                operation,
                resource_type,
                resource_path,
                payload,
                draft_key,
                created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(request.operation.as_str())
        .bind(&request.resource_type)
        .bind(&request.resource_path)
        .bind(request.payload.to_string())
        .bind(draft_key)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .context("failed to insert queued write")?;

        Ok(result.last_insert_rowid())
    }

    async fn try_list(&self) -> anyhow::Result<Vec<QueueItem>> {
        let pool = self.store.pool().await?;

        let rows = sqlx::query(
            r#"
            SELECT
                sequence_id,
                operation,
                resource_type,
                resource_path,
                payload,
                draft_key,
                created_at,
                attempts,
                last_error
            FROM offline_queue
            ORDER BY sequence_id ASC
            "#,
        )
        .fetch_all(&pool)
        .await
        .context("failed to list queued writes")?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_item(&row) {
                Ok(item) => items.push(item),
                Err(err) => tracing::error!("skipping unreadable queued write: {err:?}"),
            }
        }
        Ok(items)
    }

    async fn try_count(&self) -> anyhow::Result<usize> {
        let pool = self.store.pool().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_queue")
            .fetch_one(&pool)
            .await
            .context("failed to count queued writes")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn remove_with_retry(&self, sequence_id: i64) -> anyhow::Result<()> {
        let mut attempt = 1;
        loop {
            match self.try_remove(sequence_id).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= REMOVE_ATTEMPTS => return Err(err),
                Err(err) => {
                    tracing::warn!(sequence_id, attempt, "retrying queue delete: {err:#}");
                    tokio::time::sleep(REMOVE_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_remove(&self, sequence_id: i64) -> anyhow::Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query("DELETE FROM offline_queue WHERE sequence_id = ?1")
            .bind(sequence_id)
            .execute(&pool)
            .await
            .context("failed to delete queued write")?;
        Ok(())
    }

    async fn try_record_failure(&self, sequence_id: i64, error: &str) -> anyhow::Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            UPDATE offline_queue
            SET attempts = attempts + 1,
                last_error = ?2
            WHERE sequence_id = ?1
            "#,
        )
        .bind(sequence_id)
        .bind(error)
        .execute(&pool)
        .await
        .context("failed to record replay failure")?;
        Ok(())
    }
}

/// Whether two resource paths refer to the same resource or one contains
/// the other (`projects/42` and `projects/42/inspections/7`).
pub fn same_resource(a: &str, b: &str) -> bool {
    let a = a.trim_matches('/');
    let b = b.trim_matches('/');
    a == b || is_ancestor(a, b) || is_ancestor(b, a)
}

fn is_ancestor(parent: &str, child: &str) -> bool {
    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<QueueItem> {
    let operation_str: String = row.try_get("operation")?;
    let operation = WriteOperation::parse(&operation_str)
        .with_context(|| format!("unknown operation '{operation_str}' in offline_queue"))?;

    let payload_str: String = row.try_get("payload")?;
    let payload: Value =
        serde_json::from_str(&payload_str).context("invalid JSON payload in offline_queue")?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .context("invalid created_at in offline_queue")?;

    let attempts: i64 = row.try_get("attempts")?;

    Ok(QueueItem {
        sequence_id: row.try_get("sequence_id")?,
        request: WriteRequest {
            operation,
            resource_type: row.try_get("resource_type")?,
            resource_path: row.try_get("resource_path")?,
            payload,
        },
        draft_key: row.try_get("draft_key")?,
        created_at,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use firespec_core::{InspectionDraft, InspectionId, ProjectId};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Replays succeed unless the path was scripted to fail.
    #[derive(Default)]
    struct ScriptedApi {
        failures: HashMap<String, ApiError>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn failing(path: &str, err: ApiError) -> Self {
            Self {
                failures: HashMap::from([(path.to_string(), err)]),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RemoteApi for ScriptedApi {
        async fn list_projects(&self) -> Result<Vec<Value>, ApiError> {
            Ok(Vec::new())
        }

        async fn list_inspections(&self, _: ProjectId) -> Result<Vec<Value>, ApiError> {
            Ok(Vec::new())
        }

        async fn get_inspection(&self, _: ProjectId, _: InspectionId) -> Result<Value, ApiError> {
            Ok(Value::Null)
        }

        async fn latest_inspection(&self, _: ProjectId) -> Result<Option<Value>, ApiError> {
            Ok(None)
        }

        async fn change_log(&self, _: ProjectId, _: InspectionId) -> Result<Vec<Value>, ApiError> {
            Ok(Vec::new())
        }

        async fn execute(&self, request: &WriteRequest) -> Result<Value, ApiError> {
            self.calls.lock().unwrap().push(request.resource_path.clone());
            match self.failures.get(&request.resource_path) {
                Some(err) => Err(err.clone()),
                None => Ok(json!({ "ok": true })),
            }
        }
    }

    fn rejected() -> ApiError {
        ApiError::Status {
            status: 422,
            message: Some("invalid".into()),
        }
    }

    #[test]
    fn resource_matching_respects_segments() {
        assert!(same_resource("projects/42", "projects/42"));
        assert!(same_resource("projects/42", "projects/42/inspections/7"));
        assert!(same_resource("/projects/42/inspections/", "projects/42"));
        assert!(!same_resource("projects/4", "projects/42"));
        assert!(!same_resource("projects/42/inspections/7", "projects/42/inspections/8"));
    }

    #[tokio::test]
    async fn sequence_ids_increase_and_items_persist() {
        let queue = WriteQueue::new(LocalStore::in_memory());

        let first = queue
            .enqueue(WriteRequest::create("project", "projects", json!({ "name": "A" })), None)
            .await
            .unwrap();
        let second = queue
            .enqueue(WriteRequest::delete("project", "projects/3"), None)
            .await
            .unwrap();

        assert!(second > first);
        assert_eq!(queue.pending_count().await, 2);

        let items = queue.list_pending().await.unwrap();
        assert_eq!(items[0].request.payload, json!({ "name": "A" }));
        assert_eq!(items[1].request.operation, WriteOperation::Delete);
        assert_eq!(items[1].attempts, 0);
    }

    #[tokio::test]
    async fn enqueue_fails_hard_without_storage() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let queue = WriteQueue::new(LocalStore::at_path(blocker.join("db.sqlite")));

        let result = queue
            .enqueue(WriteRequest::delete("project", "projects/3"), None)
            .await;
        assert!(matches!(result, Err(QueueError::StorageUnavailable(_))));
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn failed_item_stays_in_place_and_blocks_its_resource() {
        let queue = WriteQueue::new(LocalStore::in_memory());
        let api = ScriptedApi::failing("projects/1", rejected());

        for path in ["projects/1", "projects/2", "projects/1/inspections"] {
            queue
                .enqueue(WriteRequest::update("project", path, json!({})), None)
                .await
                .unwrap();
        }

        let report = queue.drain(&api).await.unwrap();

        assert_eq!(api.calls(), vec!["projects/1", "projects/2"]);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item.attempts, 1);
        assert_eq!(report.blocked.len(), 1);

        let left = queue.list_pending().await.unwrap();
        let paths: Vec<_> = left.iter().map(|i| i.request.resource_path.as_str()).collect();
        assert_eq!(paths, vec!["projects/1", "projects/1/inspections"]);
        assert_eq!(left[0].attempts, 1);
        assert!(left[0].last_error.is_some());
    }

    #[tokio::test]
    async fn connectivity_failure_holds_back_the_rest() {
        let queue = WriteQueue::new(LocalStore::in_memory());
        let api = ScriptedApi::failing("projects/1", ApiError::Timeout);

        for path in ["projects/1", "projects/2"] {
            queue
                .enqueue(WriteRequest::update("project", path, json!({})), None)
                .await
                .unwrap();
        }

        let report = queue.drain(&api).await.unwrap();
        assert_eq!(api.calls(), vec!["projects/1"]);
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(queue.pending_count().await, 2);
    }

    #[tokio::test]
    async fn successful_replay_clears_the_originating_draft() {
        let store = LocalStore::in_memory();
        let queue = WriteQueue::new(store.clone());
        let drafts = DraftStore::new(store);
        let scope = DraftScope::create(ProjectId::new(42));
        let draft = InspectionDraft::default()
            .with_project_field("project_name", "Tower A")
            .with_project_field("client", "Acme");

        drafts.save_draft(scope, &draft).await;
        queue
            .enqueue(
                WriteRequest::create("inspection", "projects/42/inspections", draft.to_payload(None)),
                Some(scope),
            )
            .await
            .unwrap();
        assert!(drafts.load_draft(scope).await.is_some());

        let report = queue.drain(&ScriptedApi::default()).await.unwrap();
        assert!(report.is_clean());
        assert!(drafts.load_draft(scope).await.is_none());
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_drains_replay_each_item_once() {
        let queue = WriteQueue::new(LocalStore::in_memory());
        let api = ScriptedApi::default();
        for n in 0..5 {
            queue
                .enqueue(WriteRequest::update("project", format!("projects/{n}"), json!({})), None)
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(queue.drain(&api), queue.drain(&api));
        let replayed = a.unwrap().succeeded.len() + b.unwrap().succeeded.len();

        assert_eq!(replayed, 5);
        assert_eq!(api.calls().len(), 5);
    }

    #[tokio::test]
    async fn accepted_write_is_not_resent_when_its_row_cannot_be_deleted() {
        let store = LocalStore::in_memory();
        let queue = WriteQueue::new(store.clone());
        let api = ScriptedApi::default();
        queue
            .enqueue(WriteRequest::create("inspection", "projects/42/inspections", json!({})), None)
            .await
            .unwrap();

        let pool = store.pool().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER pin_queue BEFORE DELETE ON offline_queue \
             BEGIN SELECT RAISE(ABORT, 'queue is read-only'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let first = queue.drain(&api).await.unwrap();
        assert!(first.succeeded.is_empty());
        assert_eq!(first.unconfirmed.len(), 1);
        assert!(!first.is_clean());

        let second = queue.drain(&api).await.unwrap();
        assert_eq!(second.unconfirmed.len(), 1);
        assert_eq!(api.calls().len(), 1);

        sqlx::query("DROP TRIGGER pin_queue").execute(&pool).await.unwrap();

        let third = queue.drain(&api).await.unwrap();
        assert_eq!(third, DrainReport::default());
        assert_eq!(queue.pending_count().await, 0);
        assert_eq!(api.calls().len(), 1);
    }
}
