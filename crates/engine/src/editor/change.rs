//! The `Change` record: an apply-then-review mutation (spec §3, §4.1).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub file_path: PathBuf,
    pub operation: Operation,
    pub old_content: Option<Vec<u8>>,
    pub new_content: Option<Vec<u8>>,
    pub old_path: Option<PathBuf>,
    pub status: ChangeStatus,
    pub created_at: i64,
    pub diff: Option<String>,
    pub agent: Option<String>,
    pub block: Option<String>,
}

impl Change {
    /// Operation-shape invariants from spec §3: `create` has no
    /// `old_content`, `delete` has no `new_content`, `move` carries
    /// `old_path`, `update` carries both.
    pub fn validate_shape(&self) -> Result<(), String> {
        match self.operation {
            Operation::Create if self.old_content.is_some() => {
                Err("create must not carry old_content".to_string())
            }
            Operation::Delete if self.new_content.is_some() => {
                Err("delete must not carry new_content".to_string())
            }
            Operation::Move if self.old_path.is_none() => {
                Err("move must carry old_path".to_string())
            }
            Operation::Update if self.old_content.is_none() || self.new_content.is_none() => {
                Err("update must carry both old_content and new_content".to_string())
            }
            _ => Ok(()),
        }
    }
}
