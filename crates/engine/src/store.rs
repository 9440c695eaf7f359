//! `Store`: the external persistence collaborator (spec §3, §6.5). The
//! engine core does not persist anything itself; callers provide an
//! implementation backed by whatever database the surrounding system uses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub owner: Option<String>,
    pub design_id: Option<String>,
    pub git_repo: Option<String>,
    pub updated_at: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_workflow(&self, workflow_id: &str) -> crate::error::EngineResult<Workflow>;
    async fn put_workflow(&self, workflow: Workflow) -> crate::error::EngineResult<()>;
}

/// In-memory `Store` for tests and single-process deployments.
pub struct InMemoryStore {
    workflows: parking_lot::Mutex<std::collections::HashMap<String, Workflow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { workflows: parking_lot::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_workflow(&self, workflow_id: &str) -> crate::error::EngineResult<Workflow> {
        self.workflows
            .lock()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| crate::error::EngineError::NotFound(format!("workflow {workflow_id}")))
    }

    async fn put_workflow(&self, workflow: Workflow) -> crate::error::EngineResult<()> {
        self.workflows.lock().insert(workflow.id.clone(), workflow);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_workflow() {
        let store = InMemoryStore::new();
        store
            .put_workflow(Workflow { id: "wf1".to_string(), owner: None, design_id: None, git_repo: None, updated_at: 0 })
            .await
            .unwrap();
        let loaded = store.get_workflow("wf1").await.unwrap();
        assert_eq!(loaded.id, "wf1");
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let store = InMemoryStore::new();
        assert!(store.get_workflow("missing").await.is_err());
    }
}
