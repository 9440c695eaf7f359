//! `BlockExecutor`: runs one block's coordination pattern (spec §4.6).

mod debate;
mod hierarchical;
mod parallel;
mod reflection;
mod routing;
mod sequential;

use crate::agent_runner::{AgentRunner, AgentRunnerInput};
use crate::design::{AgentSpec, Block};
use crate::execution::{AgentOutput, BlockResult};
use crate::model_client::ToolSpec;
use crate::workspace::Workspace;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-block input gathered by the scheduler: the block-level text input
/// plus any agent-targeted overrides from upstream `kind=agent` connections
/// (spec §4.7 step 3).
#[derive(Debug, Clone, Default)]
pub struct BlockInput {
    pub block_text: String,
    pub per_agent_overrides: HashMap<String, String>,
}

impl BlockInput {
    pub fn for_agent(&self, agent_name: &str) -> &str {
        self.per_agent_overrides
            .get(agent_name)
            .map(String::as_str)
            .unwrap_or(&self.block_text)
    }
}

pub struct BlockContext {
    pub runner: Arc<AgentRunner>,
    pub workspace: Option<Arc<Workspace>>,
    pub tool_catalogue: Vec<ToolSpec>,
    pub cancel_token: CancellationToken,
}

impl BlockContext {
    pub fn working_dir_for(&self, agent_name: &str) -> PathBuf {
        match &self.workspace {
            Some(ws) => ws.path_for(Some(agent_name)).to_path_buf(),
            None => std::env::temp_dir(),
        }
    }

    pub async fn run_agent(&self, agent: &AgentSpec, user_prompt: String) -> (String, Vec<crate::agent_runner::RunnerEvent>) {
        let tool_catalogue = if agent.use_tools { self.tool_catalogue.clone() } else { Vec::new() };
        self.runner
            .run(AgentRunnerInput {
                agent_name: agent.name.clone(),
                system_prompt: agent.system_prompt.clone(),
                working_dir: self.working_dir_for(&agent.name),
                user_prompt,
                tool_catalogue,
                cancel_token: self.cancel_token.clone(),
            })
            .await
    }
}

pub struct BlockExecutor;

impl BlockExecutor {
    pub async fn execute(block: &Block, input: &BlockInput, ctx: &BlockContext) -> BlockResult {
        let started = Instant::now();
        let outcome = match block.block_type {
            crate::design::BlockType::Sequential => sequential::run(block, input, ctx).await,
            crate::design::BlockType::Parallel => parallel::run(block, input, ctx).await,
            crate::design::BlockType::Hierarchical => hierarchical::run(block, input, ctx).await,
            crate::design::BlockType::Debate => debate::run(block, input, ctx).await,
            crate::design::BlockType::Routing => routing::run(block, input, ctx).await,
            crate::design::BlockType::Reflection => reflection::run(block, input, ctx).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((final_output, per_agent_outputs, agents_used)) => BlockResult::Completed {
                block_id: block.id.clone(),
                pattern: block.block_type,
                agents_used,
                final_output,
                per_agent_outputs,
                duration_ms,
            },
            Err(error) => BlockResult::Failed {
                block_id: block.id.clone(),
                pattern: block.block_type,
                error,
            },
        }
    }
}

/// What every pattern module returns before `BlockExecutor` wraps it in a
/// `BlockResult`: the block's final text, per-agent outputs in
/// declaration order, and the list of agents that actually ran.
pub(crate) type PatternOutcome = Result<(String, Vec<AgentOutput>, Vec<String>), String>;

pub(crate) fn format_concat(outputs: &[AgentOutput]) -> String {
    outputs
        .iter()
        .map(|o| format!("## {}\n{}", o.agent, o.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
