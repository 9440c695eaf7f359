//! `WorkspaceManager`: provisions and tears down per-execution working
//! trees. Registry shape mirrors the teacher's workspace-index manager
//! (manual map + last-access pruning) rather than a generic TTL cache,
//! because entries here need an explicit `destroy` that removes files from
//! disk, not just cache eviction.

use super::{sanitize_agent_name, Workspace, WorkspaceMode};
use crate::error::{EngineError, EngineResult};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry {
    workspace: Arc<Workspace>,
    last_access: Instant,
}

pub struct WorkspaceManager {
    base_dir: PathBuf,
    grace: Duration,
    registry: Mutex<HashMap<String, Entry>>,
    interrupt: Arc<AtomicBool>,
}

impl WorkspaceManager {
    pub fn new(base_dir: PathBuf, grace: Duration) -> Self {
        Self {
            base_dir,
            grace,
            registry: Mutex::new(HashMap::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clone `git_repo` (if set) into a fresh directory for this
    /// execution/block, laid out as one shared tree or one subdirectory per
    /// isolated agent (spec §6.5).
    pub async fn prepare(
        &self,
        execution_id: &str,
        block_id: &str,
        git_repo: Option<&str>,
        agent_names: &[String],
        isolate: bool,
    ) -> EngineResult<Arc<Workspace>> {
        let root_path = self.base_dir.join(format!("{execution_id}-{block_id}"));
        tokio::fs::create_dir_all(&root_path).await?;

        let mode = if isolate {
            WorkspaceMode::PerAgent
        } else {
            WorkspaceMode::Shared
        };

        let mut per_agent_paths = HashMap::new();
        match (git_repo, mode) {
            (Some(url), WorkspaceMode::Shared) => {
                clone_repo(url, &root_path, &self.interrupt)?;
            }
            (Some(url), WorkspaceMode::PerAgent) => {
                for name in agent_names {
                    let dir = root_path.join(sanitize_agent_name(name));
                    tokio::fs::create_dir_all(&dir).await?;
                    clone_repo(url, &dir, &self.interrupt)?;
                    per_agent_paths.insert(name.clone(), dir);
                }
            }
            (None, WorkspaceMode::PerAgent) => {
                for name in agent_names {
                    let dir = root_path.join(sanitize_agent_name(name));
                    tokio::fs::create_dir_all(&dir).await?;
                    per_agent_paths.insert(name.clone(), dir);
                }
            }
            (None, WorkspaceMode::Shared) => {}
        }

        let workspace = Arc::new(Workspace {
            execution_id: execution_id.to_string(),
            block_id: block_id.to_string(),
            root_path,
            mode,
            per_agent_paths,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        });

        let mut registry = self.registry.lock().await;
        registry.insert(
            registry_key(execution_id, block_id),
            Entry { workspace: workspace.clone(), last_access: Instant::now() },
        );
        self.prune(&mut registry);
        Ok(workspace)
    }

    pub async fn get(&self, execution_id: &str, block_id: &str) -> Option<Arc<Workspace>> {
        let mut registry = self.registry.lock().await;
        let key = registry_key(execution_id, block_id);
        if let Some(entry) = registry.get_mut(&key) {
            entry.last_access = Instant::now();
            return Some(entry.workspace.clone());
        }
        None
    }

    /// Remove a workspace's registry entry and its files. Called after the
    /// grace window, or eagerly by an operator via `/admin/clear-caches`.
    pub async fn destroy(&self, execution_id: &str, block_id: &str) -> EngineResult<()> {
        let workspace = {
            let mut registry = self.registry.lock().await;
            registry.remove(&registry_key(execution_id, block_id)).map(|e| e.workspace)
        };
        if let Some(workspace) = workspace {
            if workspace.root_path.exists() {
                tokio::fs::remove_dir_all(&workspace.root_path).await?;
            }
        }
        Ok(())
    }

    fn prune(&self, registry: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        let grace = self.grace;
        registry.retain(|_, entry| now.duration_since(entry.last_access) <= grace);
    }

    /// Cooperative cancellation: signal in-flight clone operations to stop.
    pub fn cancel_all(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }
}

fn clone_repo(url: &str, dest: &std::path::Path, interrupt: &Arc<AtomicBool>) -> EngineResult<()> {
    let mut progress = gix::progress::Discard;
    let prepare = gix::prepare_clone(url, dest)
        .map_err(|e| EngineError::IOError(format!("git clone setup failed: {e}")))?;
    let (mut checkout, _outcome) = prepare
        .fetch_then_checkout(&mut progress, interrupt)
        .map_err(|e| EngineError::IOError(format!("git fetch failed: {e}")))?;
    let (_repo, _outcome) = checkout
        .main_worktree(&mut progress, interrupt)
        .map_err(|e| EngineError::IOError(format!("git checkout failed: {e}")))?;
    Ok(())
}

fn registry_key(execution_id: &str, block_id: &str) -> String {
    format!("{execution_id}:{block_id}")
}
