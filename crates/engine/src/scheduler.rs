//! `DesignScheduler`: compiles a `Design` into a DAG and drives block
//! execution in topological order (spec §4.7).

use crate::agent_runner::AgentRunner;
use crate::block::{BlockContext, BlockExecutor, BlockInput};
use crate::design::{Block, ConnectionKind, Design};
use crate::error::{EngineError, EngineResult};
use crate::execution::{BlockResult, Execution, ExecutionStatus};
use crate::model_client::{ModelClient, ToolSpec};
use crate::stream_hub::{StreamEvent, StreamHub};
use crate::workspace::{Workspace, WorkspaceManager};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

enum BlockOutcome {
    Ran(BlockResult),
    Skipped(String),
}

pub struct DesignScheduler {
    model_client: Arc<dyn ModelClient>,
    workspace_manager: Arc<WorkspaceManager>,
    stream_hub: Arc<StreamHub>,
    level_parallelism: bool,
    agent_turn_timeout: Duration,
    block_timeout: Duration,
    execution_timeout: Duration,
}

impl DesignScheduler {
    pub fn new(
        model_client: Arc<dyn ModelClient>,
        workspace_manager: Arc<WorkspaceManager>,
        stream_hub: Arc<StreamHub>,
    ) -> Self {
        let defaults = crate::config::EngineConfig::default();
        Self {
            model_client,
            workspace_manager,
            stream_hub,
            level_parallelism: false,
            agent_turn_timeout: defaults.agent_turn_timeout,
            block_timeout: defaults.block_timeout,
            execution_timeout: defaults.execution_timeout,
        }
    }

    /// Opt into running same-topological-level blocks concurrently instead
    /// of strictly one at a time (spec §9 Open Question: sequential-by-level
    /// is the default; this is the alternative).
    pub fn with_level_parallelism(mut self, enabled: bool) -> Self {
        self.level_parallelism = enabled;
        self
    }

    pub fn with_agent_turn_timeout(mut self, timeout: Duration) -> Self {
        self.agent_turn_timeout = timeout;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Run every block of `design` in topological order, honoring
    /// `cancel_token` at each block boundary and skipping transitive
    /// downstream blocks when a block fails (spec §4.7 steps 1, 5, 6).
    pub async fn run(
        &self,
        execution_id: &str,
        design: &Design,
        user_prompt: &str,
        tool_catalogue: Vec<ToolSpec>,
        cancel_token: CancellationToken,
    ) -> EngineResult<Execution> {
        design.validate()?;
        let levels = if self.level_parallelism {
            design.topological_levels()?
        } else {
            design.topological_order()?.into_iter().map(|id| vec![id]).collect()
        };
        let blocks_by_id: HashMap<&str, &Block> =
            design.blocks.iter().map(|b| (b.id.as_str(), b)).collect();

        let mut execution = Execution::new(execution_id, design.id.clone(), None);
        execution.status = ExecutionStatus::Running;
        self.stream_hub.publish(
            execution_id,
            StreamEvent::ExecutionStarted {
                execution_id: execution_id.to_string(),
                design_id: design.id.clone(),
            },
        );

        let mut failed_upstream: HashMap<String, String> = HashMap::new();
        let runner = Arc::new(AgentRunner::new(self.model_client.clone()).with_agent_turn_timeout(self.agent_turn_timeout));
        let execution_deadline = Instant::now() + self.execution_timeout;

        for level in &levels {
            if cancel_token.is_cancelled() {
                execution.finish(ExecutionStatus::Cancelled);
                self.stream_hub.publish(execution_id, StreamEvent::ExecutionCompleted { status: "cancelled".to_string() });
                return Ok(execution);
            }
            if Instant::now() >= execution_deadline {
                let error = EngineError::Timeout(format!("execution exceeded {:?}", self.execution_timeout));
                tracing::warn!(execution_id, error = %error, "execution timed out");
                execution.finish(ExecutionStatus::Failed);
                self.stream_hub.publish(execution_id, StreamEvent::ExecutionCompleted { status: "failed".to_string() });
                return Ok(execution);
            }

            let runs = level.iter().map(|block_id| {
                self.run_one_block(execution_id, design, &blocks_by_id, &execution, block_id, user_prompt, &tool_catalogue, &runner, &cancel_token, &failed_upstream)
            });
            let outcomes: Vec<(String, BlockOutcome)> = futures::future::join_all(runs).await;

            for (block_id, outcome) in outcomes {
                match outcome {
                    BlockOutcome::Skipped(reason) => {
                        execution.record(BlockResult::Skipped { block_id: block_id.clone(), reason: reason.clone() });
                        self.propagate_failure(design, &block_id, reason, &mut failed_upstream);
                    }
                    BlockOutcome::Ran(result) => {
                        if result.is_failure() {
                            let reason = match &result {
                                BlockResult::Failed { error, .. } => error.clone(),
                                _ => unreachable!(),
                            };
                            self.propagate_failure(design, &block_id, reason, &mut failed_upstream);
                        }
                        execution.record(result);
                    }
                }
            }
        }

        let final_status = if execution.block_results.values().any(BlockResult::is_failure) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        execution.finish(final_status);
        self.stream_hub.publish(
            execution_id,
            StreamEvent::ExecutionCompleted { status: format!("{final_status:?}").to_lowercase() },
        );
        Ok(execution)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_one_block(
        &self,
        execution_id: &str,
        design: &Design,
        blocks_by_id: &HashMap<&str, &Block>,
        execution: &Execution,
        block_id: &str,
        user_prompt: &str,
        tool_catalogue: &[ToolSpec],
        runner: &Arc<AgentRunner>,
        cancel_token: &CancellationToken,
        failed_upstream: &HashMap<String, String>,
    ) -> (String, BlockOutcome) {
        if let Some(reason) = failed_upstream.get(block_id) {
            return (block_id.to_string(), BlockOutcome::Skipped(reason.clone()));
        }

        let block = blocks_by_id.get(block_id).expect("block in topo order must exist");
        let input = self.gather_input(design, execution, block_id, user_prompt);

        let workspace = if block.git_repo.is_some() || block.isolate_agent_workspaces {
            let names: Vec<String> = block.agents.iter().map(|a| a.name.clone()).collect();
            match self
                .workspace_manager
                .prepare(execution_id, block_id, block.git_repo.as_deref(), &names, block.isolate_agent_workspaces)
                .await
            {
                Ok(ws) => {
                    self.publish_workspace_info(execution_id, &ws);
                    Some(ws)
                }
                Err(e) => {
                    return (
                        block_id.to_string(),
                        BlockOutcome::Ran(BlockResult::Failed { block_id: block_id.to_string(), pattern: block.block_type, error: e.to_string() }),
                    );
                }
            }
        } else {
            None
        };

        self.stream_hub.publish(
            execution_id,
            StreamEvent::BlockStarted { block_id: block_id.to_string(), pattern: format!("{:?}", block.block_type) },
        );

        let ctx = BlockContext {
            runner: runner.clone(),
            workspace: workspace.clone(),
            tool_catalogue: tool_catalogue.to_vec(),
            cancel_token: cancel_token.clone(),
        };

        let result = match tokio::time::timeout(self.block_timeout, BlockExecutor::execute(block, &input, &ctx)).await {
            Ok(result) => result,
            Err(_) => {
                let error = EngineError::Timeout(format!("block exceeded {:?}", self.block_timeout));
                BlockResult::Failed { block_id: block_id.to_string(), pattern: block.block_type, error: error.to_string() }
            }
        };
        self.stream_hub.publish(
            execution_id,
            StreamEvent::BlockCompleted {
                block_id: block_id.to_string(),
                result_summary: result.final_text().unwrap_or_default().to_string(),
            },
        );

        (block_id.to_string(), BlockOutcome::Ran(result))
    }

    fn publish_workspace_info(&self, execution_id: &str, workspace: &Workspace) {
        let agents = workspace
            .per_agent_paths
            .iter()
            .map(|(name, path)| crate::stream_hub::AgentPath { name: name.clone(), path: path.to_string_lossy().into_owned() })
            .collect();
        self.stream_hub.publish(
            execution_id,
            StreamEvent::WorkspaceInfo {
                block_id: workspace.block_id.clone(),
                agents,
                mode: format!("{:?}", workspace.mode).to_lowercase(),
            },
        );
    }

    fn propagate_failure(
        &self,
        design: &Design,
        failed_block: &str,
        reason: String,
        failed_upstream: &mut HashMap<String, String>,
    ) {
        let reason = format!("upstream_failure: {failed_block} ({reason})");
        let mut frontier = vec![failed_block.to_string()];
        while let Some(current) = frontier.pop() {
            for conn in &design.connections {
                if conn.source_block == current && !failed_upstream.contains_key(&conn.target_block) {
                    failed_upstream.insert(conn.target_block.clone(), reason.clone());
                    frontier.push(conn.target_block.clone());
                }
            }
        }
    }

    /// Gather a block's input per spec §4.7 step 3: block-level text is the
    /// concatenation of upstream `kind=block` outputs (or the original user
    /// prompt for source blocks); `kind=agent` connections become per-agent
    /// overrides for the downstream block only.
    fn gather_input(&self, design: &Design, execution: &Execution, block_id: &str, user_prompt: &str) -> BlockInput {
        let upstream: Vec<_> = design.connections.iter().filter(|c| c.target_block == block_id).collect();
        if upstream.is_empty() {
            return BlockInput { block_text: user_prompt.to_string(), per_agent_overrides: HashMap::new() };
        }

        let mut block_text_parts = Vec::new();
        let mut per_agent_overrides = HashMap::new();

        for conn in upstream {
            let Some(result) = execution.block_results.get(&conn.source_block) else { continue };
            let Some(text) = result.final_text() else { continue };
            match conn.kind {
                ConnectionKind::Block => block_text_parts.push(text.to_string()),
                ConnectionKind::Agent => {
                    if let Some(target_agent) = &conn.target_agent {
                        per_agent_overrides.insert(target_agent.clone(), text.to_string());
                    }
                }
            }
        }

        let block_text = if block_text_parts.is_empty() { user_prompt.to_string() } else { block_text_parts.join("\n\n") };
        BlockInput { block_text, per_agent_overrides }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{AgentRole, AgentSpec, BlockType, Connection};
    use crate::model_client::MockModelClient;
    use std::time::Duration;
    use tempfile::TempDir;

    fn seq_block(id: &str, system: &str) -> Block {
        Block {
            id: id.to_string(),
            block_type: BlockType::Sequential,
            agents: vec![AgentSpec { name: format!("{id}-agent"), role: AgentRole::Worker, system_prompt: system.to_string(), use_tools: false }],
            task: "task".to_string(),
            git_repo: None,
            isolate_agent_workspaces: false,
            rounds: None,
            aggregator: None,
        }
    }

    #[tokio::test]
    async fn runs_two_blocks_in_order_and_chains_output() {
        let client = Arc::new(MockModelClient::new());
        client.script("sys1", "stage one output");
        client.script("sys2", "stage two output");

        let design = Design {
            id: "d1".to_string(),
            blocks: vec![seq_block("b1", "sys1"), seq_block("b2", "sys2")],
            connections: vec![Connection {
                source_block: "b1".to_string(),
                target_block: "b2".to_string(),
                source_agent: None,
                target_agent: None,
                kind: ConnectionKind::Block,
            }],
        };

        let tmp = TempDir::new().unwrap();
        let workspace_manager = Arc::new(WorkspaceManager::new(tmp.path().to_path_buf(), Duration::from_secs(60)));
        let stream_hub = Arc::new(StreamHub::new(100));
        let scheduler = DesignScheduler::new(client, workspace_manager, stream_hub);

        let execution = scheduler
            .run("exec1", &design, "hello", Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.block_results.get("b2").unwrap().final_text().unwrap(), "stage two output");
    }

    #[tokio::test]
    async fn failed_block_skips_downstream() {
        let client = Arc::new(MockModelClient::new());
        client.script("sys1", "review");
        // b1 references an aggregator name that is not one of its declared
        // agents, which the parallel pattern only detects at run time (block
        // cardinality validation has no opinion on aggregator references).
        let mut b1 = seq_block("b1", "sys1");
        b1.block_type = BlockType::Parallel;
        b1.aggregator = Some("NOPE".to_string());

        let design = Design {
            id: "d1".to_string(),
            blocks: vec![b1, seq_block("b2", "sys2")],
            connections: vec![Connection {
                source_block: "b1".to_string(),
                target_block: "b2".to_string(),
                source_agent: None,
                target_agent: None,
                kind: ConnectionKind::Block,
            }],
        };

        let tmp = TempDir::new().unwrap();
        let workspace_manager = Arc::new(WorkspaceManager::new(tmp.path().to_path_buf(), Duration::from_secs(60)));
        let stream_hub = Arc::new(StreamHub::new(100));
        let scheduler = DesignScheduler::new(client, workspace_manager, stream_hub);

        let execution = scheduler
            .run("exec1", &design, "hello", Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(matches!(execution.block_results.get("b1").unwrap(), BlockResult::Failed { .. }));
        assert!(matches!(execution.block_results.get("b2").unwrap(), BlockResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn level_parallelism_runs_independent_blocks_concurrently() {
        let client = Arc::new(MockModelClient::new());
        client.script("sys1", "left output");
        client.script("sys2", "right output");
        client.script("sys3", "final output");

        let design = Design {
            id: "d1".to_string(),
            blocks: vec![seq_block("left", "sys1"), seq_block("right", "sys2"), seq_block("join", "sys3")],
            connections: vec![
                Connection {
                    source_block: "left".to_string(),
                    target_block: "join".to_string(),
                    source_agent: None,
                    target_agent: None,
                    kind: ConnectionKind::Block,
                },
                Connection {
                    source_block: "right".to_string(),
                    target_block: "join".to_string(),
                    source_agent: None,
                    target_agent: None,
                    kind: ConnectionKind::Block,
                },
            ],
        };

        let tmp = TempDir::new().unwrap();
        let workspace_manager = Arc::new(WorkspaceManager::new(tmp.path().to_path_buf(), Duration::from_secs(60)));
        let stream_hub = Arc::new(StreamHub::new(100));
        let scheduler = DesignScheduler::new(client, workspace_manager, stream_hub).with_level_parallelism(true);

        let execution = scheduler
            .run("exec1", &design, "hello", Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.block_results.get("left").unwrap().final_text().unwrap(), "left output");
        assert_eq!(execution.block_results.get("right").unwrap().final_text().unwrap(), "right output");
        let joined = execution.block_results.get("join").unwrap().final_text().unwrap();
        assert_eq!(joined, "final output");
    }
}
