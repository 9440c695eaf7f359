//! `EditorService`: HTTP-facing multiplexer in front of per-workspace
//! `EditorManager`s (spec §4.2, §6.2, §9 "per-request manager lifecycle").
//!
//! One `EditorManager` is expensive to lose (its pending-changes set is
//! in-memory only), so managers are cached by workspace root with a TTL,
//! keyed the same way the teacher keys its workspace-index cache.

use super::manager::EditorManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct EditorService {
    config: Arc<EngineConfig>,
    managers: Cache<PathBuf, Arc<EditorManager>>,
}

impl EditorService {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let managers = Cache::builder()
            .time_to_live(config.workflow_cache_ttl)
            .build();
        Self { config, managers }
    }

    /// Validate that a caller-supplied `workspace_path` sits under the
    /// configured isolated-root prefix (spec §6.2, testable property #9).
    pub fn validate_workspace_path(&self, workspace_path: &str) -> EngineResult<()> {
        if !workspace_path.starts_with(&self.config.isolated_root_prefix) {
            return Err(EngineError::AccessDenied(format!(
                "workspace_path must start with {}",
                self.config.isolated_root_prefix
            )));
        }
        Ok(())
    }

    /// Resolve the `EditorManager` for a request. `workspace_path` overrides
    /// `default_root` (the shared workspace for the owning execution) when
    /// present, after prefix validation.
    pub async fn manager_for(
        &self,
        default_root: &Path,
        workspace_path: Option<&str>,
    ) -> EngineResult<Arc<EditorManager>> {
        let root = match workspace_path {
            Some(path) => {
                self.validate_workspace_path(path)?;
                PathBuf::from(path)
            }
            None => default_root.to_path_buf(),
        };

        if let Some(existing) = self.managers.get(&root).await {
            return Ok(existing);
        }

        let max_file_size_bytes = self.config.max_file_size_bytes;
        let created = self
            .managers
            .entry(root.clone())
            .or_insert_with(async move {
                Arc::new(EditorManager::new(root, max_file_size_bytes))
            })
            .await;
        Ok(created.into_value())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn clear_caches(&self) {
        self.managers.invalidate_all();
    }
}
