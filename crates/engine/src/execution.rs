//! Execution and per-block result types (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockResult {
    Completed {
        block_id: String,
        pattern: crate::design::BlockType,
        agents_used: Vec<String>,
        final_output: String,
        per_agent_outputs: Vec<AgentOutput>,
        duration_ms: u64,
    },
    Failed {
        block_id: String,
        pattern: crate::design::BlockType,
        error: String,
    },
    Skipped {
        block_id: String,
        reason: String,
    },
}

impl BlockResult {
    pub fn block_id(&self) -> &str {
        match self {
            BlockResult::Completed { block_id, .. } => block_id,
            BlockResult::Failed { block_id, .. } => block_id,
            BlockResult::Skipped { block_id, .. } => block_id,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, BlockResult::Failed { .. })
    }

    pub fn final_text(&self) -> Option<&str> {
        match self {
            BlockResult::Completed { final_output, .. } => Some(final_output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: String,
    pub design_id: String,
    pub workflow_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub block_results: HashMap<String, BlockResult>,
}

impl Execution {
    pub fn new(id: impl Into<String>, design_id: impl Into<String>, workflow_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            design_id: design_id.into(),
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: time::OffsetDateTime::now_utc().unix_timestamp(),
            finished_at: None,
            block_results: HashMap::new(),
        }
    }

    pub fn record(&mut self, result: BlockResult) {
        self.block_results.insert(result.block_id().to_string(), result);
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.finished_at = Some(time::OffsetDateTime::now_utc().unix_timestamp());
    }
}
