//! Local drafts of inspection forms.
//!
//! Drafts are a convenience, not a correctness requirement: every storage or
//! serialization failure is logged and swallowed. A draft that cannot be
//! read back (missing or corrupt) is simply absent.

use anyhow::Context;
use chrono::Utc;
use firespec_core::{InspectionDraft, InspectionId, ProjectId};
use sqlx::Row;

use crate::store::LocalStore;

const NEW_INSPECTION_PREFIX: &str = "new-inspection";
const EDIT_INSPECTION_PREFIX: &str = "edit-inspection";

/// Which form a draft belongs to.
///
/// Creation and edit drafts live under different keys, so drafting a new
/// inspection and editing an existing one on the same project never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftScope {
    /// A new inspection for this project.
    Create { project_id: ProjectId },
    /// Unsaved edits to an existing inspection.
    Edit {
        project_id: ProjectId,
        inspection_id: InspectionId,
    },
}

impl DraftScope {
    pub fn create(project_id: ProjectId) -> Self {
        DraftScope::Create { project_id }
    }

    pub fn edit(project_id: ProjectId, inspection_id: InspectionId) -> Self {
        DraftScope::Edit {
            project_id,
            inspection_id,
        }
    }

    /// Storage key, e.g. `new-inspection-42` or `edit-inspection-42-7`.
    pub fn key(&self) -> String {
        match self {
            DraftScope::Create { project_id } => format!("{NEW_INSPECTION_PREFIX}-{project_id}"),
            DraftScope::Edit {
                project_id,
                inspection_id,
            } => format!("{EDIT_INSPECTION_PREFIX}-{project_id}-{inspection_id}"),
        }
    }
}

/// Key-value store of in-progress inspection forms.
#[derive(Debug, Clone)]
pub struct DraftStore {
    store: LocalStore,
}

impl DraftStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Save (overwrite) the draft for `scope`. Never fails to the caller.
    pub async fn save_draft(&self, scope: DraftScope, draft: &InspectionDraft) {
        if let Err(err) = self.try_save(&scope.key(), draft).await {
            tracing::error!(draft = %scope.key(), "failed to save draft: {err:?}");
        }
    }

    /// Load the draft for `scope`; `None` when absent or unreadable.
    pub async fn load_draft(&self, scope: DraftScope) -> Option<InspectionDraft> {
        let key = scope.key();
        match self.try_load(&key).await {
            Ok(draft) => draft,
            Err(err) => {
                tracing::warn!(draft = %key, "discarding unreadable draft: {err:?}");
                None
            }
        }
    }

    /// Remove the draft for `scope`. Idempotent.
    pub async fn clear_draft(&self, scope: DraftScope) {
        self.clear_key(&scope.key()).await;
    }

    /// Whether a restorable draft exists for `scope`.
    pub async fn has_valid_draft(&self, scope: DraftScope) -> bool {
        firespec_core::is_valid_draft(self.load_draft(scope).await.as_ref())
    }

    /// Remove a draft by its raw key (as recorded on queued writes).
    pub(crate) async fn clear_key(&self, key: &str) {
        if let Err(err) = self.try_clear(key).await {
            tracing::error!(draft = %key, "failed to clear draft: {err:?}");
        }
    }

    async fn try_save(&self, key: &str, draft: &InspectionDraft) -> anyhow::Result<()> {
        let pool = self.store.pool().await?;
        let data = serde_json::to_string(draft).context("failed to serialize draft")?;

        sqlx::query(
            r#"
            INSERT INTO drafts (draft_key, data, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(draft_key)
            DO UPDATE SET
                data = excluded.data,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(key)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .context("failed to upsert draft")?;

        Ok(())
    }

    async fn try_load(&self, key: &str) -> anyhow::Result<Option<InspectionDraft>> {
        let pool = self.store.pool().await?;

        let row = sqlx::query("SELECT data FROM drafts WHERE draft_key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .context("failed to fetch draft")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: String = row.try_get("data")?;
        let draft = serde_json::from_str(&data).context("failed to deserialize draft")?;
        Ok(Some(draft))
    }

    async fn try_clear(&self, key: &str) -> anyhow::Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query("DELETE FROM drafts WHERE draft_key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .context("failed to delete draft")?;
        Ok(())
    }
}
