//! File-backed active-state store.
//!
//! One small file per field under the config directory:
//!
//! - `active.yml` — staged gateway config (copied from a template)
//! - `active.model` — one-line model id
//! - `active.mode` — one-line mode
//! - `active.mode.lease_until` — ISO-8601 UTC lease deadline
//!
//! Reads are defaulted: a missing or corrupt file behaves as absent. Writes
//! are whole-file replacements. The (config, model) pair is not atomic
//! across files but is always written config first, model second, so a
//! crash mid-pair leaves an inconsistency the engine heals on the next
//! switch. Only the switch engine writes here, and only while it holds the
//! switch lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::catalog::{self, Mode, ModelSpec};

const ACTIVE_CONFIG_FILE: &str = "active.yml";
const ACTIVE_MODEL_FILE: &str = "active.model";
const ACTIVE_MODE_FILE: &str = "active.mode";
const LEASE_FILE: &str = "active.mode.lease_until";

/// Errors from the active-state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("template not found: {0}")]
    TemplateMissing(String),

    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable record of the current GPU tenancy.
#[derive(Debug, Clone)]
pub struct ActiveStateStore {
    config_dir: PathBuf,
    template_dir: PathBuf,
}

impl ActiveStateStore {
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>, template_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            template_dir: template_dir.into(),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.config_dir.join(file)
    }

    /// Current mode; absent or unparseable file defaults to `llm`.
    pub async fn read_mode(&self) -> Mode {
        match read_optional(&self.path(ACTIVE_MODE_FILE)).await {
            Some(raw) => raw.trim().parse().unwrap_or_default(),
            None => Mode::default(),
        }
    }

    /// Currently selected model id, validated against the catalogue.
    pub async fn read_active_model(&self) -> Option<&'static ModelSpec> {
        let raw = read_optional(&self.path(ACTIVE_MODEL_FILE)).await?;
        catalog::find_model(raw.trim())
    }

    /// Lease deadline; unparseable timestamps are treated as no lease.
    pub async fn read_lease(&self) -> Option<DateTime<Utc>> {
        let raw = read_optional(&self.path(LEASE_FILE)).await?;
        match raw.trim().parse::<DateTime<Utc>>() {
            Ok(at) => Some(at),
            Err(_) => {
                debug!(value = %raw.trim(), "ignoring unparseable lease file");
                None
            }
        }
    }

    /// Raw staged gateway config, captured before a switch for rollback.
    pub async fn read_staged_config(&self) -> Option<String> {
        read_optional(&self.path(ACTIVE_CONFIG_FILE)).await
    }

    /// Raw model file content, captured before a switch for rollback.
    pub async fn read_raw_model(&self) -> Option<String> {
        read_optional(&self.path(ACTIVE_MODEL_FILE))
            .await
            .map(|raw| raw.trim().to_string())
    }

    /// Persist the mode. Any mode other than `comfy` also removes the
    /// lease file.
    pub async fn write_mode(&self, mode: Mode) -> Result<(), StateStoreError> {
        self.ensure_dir().await?;
        fs::write(self.path(ACTIVE_MODE_FILE), mode.as_str()).await?;
        if mode != Mode::Comfy {
            remove_if_present(&self.path(LEASE_FILE)).await?;
        }
        Ok(())
    }

    /// Copy the model's template into the staged config, then record the
    /// model id. Fixed order: config first, model second.
    pub async fn stage_config(&self, model: &ModelSpec) -> Result<(), StateStoreError> {
        self.ensure_dir().await?;
        let template_path = self.template_dir.join(model.template);
        let content = fs::read_to_string(&template_path)
            .await
            .map_err(|_| StateStoreError::TemplateMissing(model.template.to_string()))?;

        fs::write(self.path(ACTIVE_CONFIG_FILE), content).await?;
        fs::write(self.path(ACTIVE_MODEL_FILE), model.id).await?;
        Ok(())
    }

    /// Restore (or remove) the config/model pair, config first.
    pub async fn restore(
        &self,
        previous_config: Option<&str>,
        previous_model: Option<&str>,
    ) -> Result<(), StateStoreError> {
        self.ensure_dir().await?;

        match previous_config {
            Some(content) => fs::write(self.path(ACTIVE_CONFIG_FILE), content).await?,
            None => remove_if_present(&self.path(ACTIVE_CONFIG_FILE)).await?,
        }
        match previous_model {
            Some(model) => fs::write(self.path(ACTIVE_MODEL_FILE), model).await?,
            None => remove_if_present(&self.path(ACTIVE_MODEL_FILE)).await?,
        }
        Ok(())
    }

    /// Remove the model id file. Used when the GPU moves to comfy, where
    /// no LLM selection is meaningful.
    pub async fn clear_active_model(&self) -> Result<(), StateStoreError> {
        remove_if_present(&self.path(ACTIVE_MODEL_FILE)).await?;
        Ok(())
    }

    /// Set the lease deadline to now + `ttl` and return it.
    pub async fn set_lease(&self, ttl: Duration) -> Result<DateTime<Utc>, StateStoreError> {
        self.ensure_dir().await?;
        let until = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        fs::write(self.path(LEASE_FILE), until.to_rfc3339()).await?;
        Ok(until)
    }

    /// Remove the lease file.
    pub async fn clear_lease(&self) -> Result<(), StateStoreError> {
        remove_if_present(&self.path(LEASE_FILE)).await?;
        Ok(())
    }

    async fn ensure_dir(&self) -> Result<(), StateStoreError> {
        fs::create_dir_all(&self.config_dir).await?;
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Option<String> {
    fs::read_to_string(path).await.ok()
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn store() -> (TempDir, TempDir, ActiveStateStore) {
        let config = TempDir::new().unwrap();
        let templates = TempDir::new().unwrap();
        let store = ActiveStateStore::new(config.path(), templates.path());
        (config, templates, store)
    }

    #[tokio::test]
    async fn defaults_when_files_absent() {
        let (_c, _t, store) = store();
        assert_eq!(store.read_mode().await, Mode::Llm);
        assert!(store.read_active_model().await.is_none());
        assert!(store.read_lease().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_files_default() {
        let (config, _t, store) = store();
        std::fs::write(config.path().join(ACTIVE_MODE_FILE), "sideways").unwrap();
        std::fs::write(config.path().join(ACTIVE_MODEL_FILE), "not-a-model").unwrap();
        std::fs::write(config.path().join(LEASE_FILE), "tomorrow-ish").unwrap();

        assert_eq!(store.read_mode().await, Mode::Llm);
        assert!(store.read_active_model().await.is_none());
        assert!(store.read_lease().await.is_none());
    }

    #[tokio::test]
    async fn stage_config_writes_pair() {
        let (config, templates, store) = store();
        let model = catalog::find_model("qwen-fast").unwrap();
        std::fs::write(templates.path().join(model.template), "model_list: []\n").unwrap();

        store.stage_config(model).await.unwrap();

        let staged = std::fs::read_to_string(config.path().join(ACTIVE_CONFIG_FILE)).unwrap();
        assert_eq!(staged, "model_list: []\n");
        assert_eq!(store.read_active_model().await.unwrap().id, "qwen-fast");
    }

    #[tokio::test]
    async fn stage_config_requires_template() {
        let (_c, _t, store) = store();
        let model = catalog::find_model("deepseek").unwrap();
        let err = store.stage_config(model).await.unwrap_err();
        assert!(matches!(err, StateStoreError::TemplateMissing(_)));
    }

    #[tokio::test]
    async fn write_mode_llm_clears_lease() {
        let (_c, _t, store) = store();
        store.set_lease(Duration::from_secs(600)).await.unwrap();
        assert!(store.read_lease().await.is_some());

        store.write_mode(Mode::Llm).await.unwrap();
        assert!(store.read_lease().await.is_none());
        assert_eq!(store.read_mode().await, Mode::Llm);
    }

    #[tokio::test]
    async fn write_mode_comfy_keeps_lease() {
        let (_c, _t, store) = store();
        let until = store.set_lease(Duration::from_secs(600)).await.unwrap();
        store.write_mode(Mode::Comfy).await.unwrap();
        assert_eq!(store.read_lease().await.unwrap(), until);
        assert_eq!(store.read_mode().await, Mode::Comfy);

        assert_ok!(store.clear_lease().await);
        assert!(store.read_lease().await.is_none());
        // Clearing twice is fine, the file is simply gone.
        assert_ok!(store.clear_lease().await);
    }

    #[tokio::test]
    async fn lease_round_trips_as_utc() {
        let (_c, _t, store) = store();
        let until = store.set_lease(Duration::from_secs(15 * 60)).await.unwrap();
        let read = store.read_lease().await.unwrap();
        assert_eq!(read, until);
        let remaining = (read - Utc::now()).num_seconds();
        assert!(remaining > 14 * 60 && remaining <= 15 * 60);
    }

    #[tokio::test]
    async fn restore_removes_pair_when_no_previous() {
        let (config, templates, store) = store();
        let model = catalog::find_model("qwen-max").unwrap();
        std::fs::write(templates.path().join(model.template), "m\n").unwrap();
        store.stage_config(model).await.unwrap();

        store.restore(None, None).await.unwrap();
        assert!(!config.path().join(ACTIVE_CONFIG_FILE).exists());
        assert!(store.read_raw_model().await.is_none());
    }

    #[tokio::test]
    async fn restore_rewrites_pair() {
        let (_c, _t, store) = store();
        store
            .restore(Some("old config"), Some("qwen-quality"))
            .await
            .unwrap();
        assert_eq!(store.read_staged_config().await.unwrap(), "old config");
        assert_eq!(store.read_active_model().await.unwrap().id, "qwen-quality");
    }
}
