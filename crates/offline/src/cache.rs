//! Read-through cache of server data for offline support.
//!
//! The cache is advisory, not authoritative: it is written on every
//! successful server read and consulted only when the server cannot be. A
//! storage error on write is logged and dropped; a storage error on read
//! yields an empty result.

use anyhow::Context;
use chrono::Utc;
use firespec_core::{InspectionId, ProjectId};
use serde_json::Value;
use sqlx::Row;

use crate::store::LocalStore;

/// SQLite-backed mirror of projects, inspection lists and inspection details.
#[derive(Debug, Clone)]
pub struct LocalCache {
    store: LocalStore,
}

/// Numeric `id` of a server record (numbers or numeric strings).
pub fn record_id(record: &Value) -> Option<i64> {
    match record.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Key of an inspection summary: `{projectId}-{inspectionId}`.
pub fn inspection_cache_key(project_id: ProjectId, inspection_id: i64) -> String {
    format!("{project_id}-{inspection_id}")
}

fn project_key_prefix(project_id: ProjectId) -> String {
    format!("{project_id}-")
}

impl LocalCache {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Upsert every project by id. Projects missing from `projects` stay.
    pub async fn save_project_list(&self, projects: &[Value]) {
        if let Err(err) = self.try_save_projects(projects).await {
            tracing::error!("failed to cache project list: {err:?}");
        }
    }

    /// All cached projects, ordered by id.
    pub async fn get_project_list(&self) -> Vec<Value> {
        self.read_all("SELECT data FROM projects ORDER BY id", None, "project list")
            .await
    }

    pub async fn get_project(&self, project_id: ProjectId) -> Option<Value> {
        self.read_one(
            "SELECT data FROM projects WHERE id = ?1",
            project_id.get(),
            "project",
        )
        .await
    }

    /// Replace the cached inspection summaries of one project as a set.
    ///
    /// Delete and insert run in one transaction, so readers see either the
    /// previous snapshot or the new one. An id listed twice is stored once,
    /// at its first position, with the data of its last occurrence.
    pub async fn replace_inspection_list(&self, project_id: ProjectId, inspections: &[Value]) {
        if let Err(err) = self.try_replace_inspections(project_id, inspections).await {
            tracing::error!(%project_id, "failed to replace cached inspection list: {err:?}");
        }
    }

    /// Cached inspection summaries of one project, in the order last fetched.
    pub async fn get_inspection_list(&self, project_id: ProjectId) -> Vec<Value> {
        self.read_all(
            r#"
            SELECT data
            FROM inspections
            WHERE substr(cache_key, 1, length(?1)) = ?1
            ORDER BY rowid
            "#,
            Some(project_key_prefix(project_id)),
            "inspection list",
        )
        .await
    }

    /// Upsert a full inspection by its own id.
    pub async fn save_inspection_detail(&self, detail: &Value) {
        if let Err(err) = self.try_save_detail(detail).await {
            tracing::error!("failed to cache inspection detail: {err:?}");
        }
    }

    pub async fn get_inspection_detail(&self, inspection_id: InspectionId) -> Option<Value> {
        self.read_one(
            "SELECT data FROM inspection_details WHERE id = ?1",
            inspection_id.get(),
            "inspection detail",
        )
        .await
    }

    async fn try_save_projects(&self, projects: &[Value]) -> anyhow::Result<()> {
        let pool = self.store.pool().await?;
        let now = Utc::now().to_rfc3339();
        let mut tx = pool.begin().await.context("failed to begin project upsert")?;

        for project in projects {
            let Some(id) = record_id(project) else {
                tracing::warn!("skipping project without a numeric id");
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO projects (id, data, cached_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id)
                DO UPDATE SET
                    data = excluded.data,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(id)
            .bind(project.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("failed to upsert project")?;
        }

        tx.commit().await.context("failed to commit project upsert")?;
        Ok(())
    }

    async fn try_replace_inspections(
        &self,
        project_id: ProjectId,
        inspections: &[Value],
    ) -> anyhow::Result<()> {
        let pool = self.store.pool().await?;
        let now = Utc::now().to_rfc3339();
        let mut tx = pool
            .begin()
            .await
            .context("failed to begin inspection list replace")?;

        sqlx::query("DELETE FROM inspections WHERE substr(cache_key, 1, length(?1)) = ?1")
            .bind(project_key_prefix(project_id))
            .execute(&mut *tx)
            .await
            .context("failed to delete cached inspections")?;

        for inspection in inspections {
            let Some(id) = record_id(inspection) else {
                tracing::warn!(%project_id, "skipping inspection without a numeric id");
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO inspections (cache_key, data, cached_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(cache_key)
                DO UPDATE SET
                    data = excluded.data,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(inspection_cache_key(project_id, id))
            .bind(inspection.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("failed to insert cached inspection")?;
        }

        tx.commit()
            .await
            .context("failed to commit inspection list replace")?;
        Ok(())
    }

    async fn try_save_detail(&self, detail: &Value) -> anyhow::Result<()> {
        let id = record_id(detail).context("inspection detail has no numeric id")?;
        let pool = self.store.pool().await?;

        sqlx::query(
            r#"
            INSERT INTO inspection_details (id, data, cached_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id)
            DO UPDATE SET
                data = excluded.data,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(id)
        .bind(detail.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .context("failed to upsert inspection detail")?;

        Ok(())
    }

    async fn read_all(&self, sql: &str, param: Option<String>, what: &str) -> Vec<Value> {
        match self.try_read_all(sql, param).await {
            Ok(rows) => rows.iter().filter_map(|data| decode(data, what)).collect(),
            Err(err) => {
                tracing::error!("failed to read {what} from cache: {err:?}");
                Vec::new()
            }
        }
    }

    async fn read_one(&self, sql: &str, id: i64, what: &str) -> Option<Value> {
        match self.try_read_one(sql, id).await {
            Ok(data) => data.and_then(|data| decode(&data, what)),
            Err(err) => {
                tracing::error!("failed to read {what} {id} from cache: {err:?}");
                None
            }
        }
    }

    async fn try_read_all(&self, sql: &str, param: Option<String>) -> anyhow::Result<Vec<String>> {
        let pool = self.store.pool().await?;
        let mut query = sqlx::query(sql);
        if let Some(param) = param {
            query = query.bind(param);
        }

        let rows = query
            .fetch_all(&pool)
            .await
            .context("failed to fetch cached rows")?;

        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            data.push(row.try_get("data")?);
        }
        Ok(data)
    }

    async fn try_read_one(&self, sql: &str, id: i64) -> anyhow::Result<Option<String>> {
        let pool = self.store.pool().await?;
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&pool)
            .await
            .context("failed to fetch cached row")?;

        match row {
            Some(row) => Ok(Some(row.try_get("data")?)),
            None => Ok(None),
        }
    }
}

fn decode(data: &str, what: &str) -> Option<Value> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("skipping corrupt cached {what}: {err}");
            None
        }
    }
}
