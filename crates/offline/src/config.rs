//! Environment-driven configuration.

use std::path::PathBuf;

use crate::store::{DB_FILE_NAME, default_data_dir};
use crate::sync::DEFAULT_ACTIVE_STATUS;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    pub data_dir: PathBuf,
    pub active_status: String,
}

impl OfflineConfig {
    /// Read `FIRESPEC_*` variables, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("FIRESPEC_API_URL").unwrap_or_else(|| {
            tracing::warn!("FIRESPEC_API_URL not set; using {DEFAULT_API_URL}");
            DEFAULT_API_URL.to_string()
        });

        let auth_token = get("FIRESPEC_AUTH_TOKEN");
        if auth_token.is_none() {
            tracing::warn!("FIRESPEC_AUTH_TOKEN not set; requests will be unauthenticated");
        }

        let data_dir = match get("FIRESPEC_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let active_status =
            get("FIRESPEC_ACTIVE_STATUS").unwrap_or_else(|| DEFAULT_ACTIVE_STATUS.to_string());

        Ok(Self {
            api_url,
            auth_token,
            data_dir,
            active_status,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}
