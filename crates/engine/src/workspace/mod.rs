//! Per-execution working trees: one shared clone, or one isolated
//! subdirectory per agent (spec §4.2, §6.5).

mod manager;

pub use manager::WorkspaceManager;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    Shared,
    PerAgent,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub execution_id: String,
    pub block_id: String,
    pub root_path: PathBuf,
    pub mode: WorkspaceMode,
    pub per_agent_paths: HashMap<String, PathBuf>,
    pub created_at: i64,
}

impl Workspace {
    /// The working directory an agent should run in: its own subdirectory
    /// in `PerAgent` mode, or the shared root otherwise.
    pub fn path_for(&self, agent_name: Option<&str>) -> &Path {
        match (self.mode, agent_name) {
            (WorkspaceMode::PerAgent, Some(name)) => self
                .per_agent_paths
                .get(name)
                .map(PathBuf::as_path)
                .unwrap_or(&self.root_path),
            _ => &self.root_path,
        }
    }
}

/// Sanitize an agent name into a filesystem-safe directory component.
pub(crate) fn sanitize_agent_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "agent".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize_agent_name("Worker One/2"), "Worker_One_2");
    }

    #[test]
    fn empty_name_falls_back() {
        assert_eq!(sanitize_agent_name("///"), "agent");
    }
}
