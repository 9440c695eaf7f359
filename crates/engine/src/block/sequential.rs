//! Sequential pattern (spec §4.6.1): each agent sees the previous agent's
//! output appended to the block task.

use super::{BlockContext, BlockInput, PatternOutcome};
use crate::design::Block;
use crate::execution::AgentOutput;

pub async fn run(block: &Block, input: &BlockInput, ctx: &BlockContext) -> PatternOutcome {
    let mut accumulator = String::new();
    let mut per_agent_outputs = Vec::new();
    let mut agents_used = Vec::new();

    for agent in &block.agents {
        let user_prompt = if accumulator.is_empty() {
            input.for_agent(&agent.name).to_string()
        } else {
            format!("{}\n\nPrevious: {accumulator}", input.for_agent(&agent.name))
        };
        let (final_text, events) = ctx.run_agent(agent, user_prompt).await;
        if events.iter().any(|e| matches!(e, crate::agent_runner::RunnerEvent::Error { .. })) && final_text.is_empty() {
            return Err(format!("agent {} failed", agent.name));
        }
        accumulator = final_text.clone();
        per_agent_outputs.push(AgentOutput { agent: agent.name.clone(), text: final_text });
        agents_used.push(agent.name.clone());
    }

    Ok((accumulator, per_agent_outputs, agents_used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::AgentRunner;
    use crate::design::{AgentRole, AgentSpec, Block, BlockType};
    use crate::model_client::MockModelClient;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn make_block() -> Block {
        Block {
            id: "b1".to_string(),
            block_type: BlockType::Sequential,
            agents: vec![
                AgentSpec { name: "A1".to_string(), role: AgentRole::Worker, system_prompt: "Summarize".to_string(), use_tools: false },
                AgentSpec { name: "A2".to_string(), role: AgentRole::Worker, system_prompt: "Translate".to_string(), use_tools: false },
            ],
            task: "Explain TCP.".to_string(),
            git_repo: None,
            isolate_agent_workspaces: false,
            rounds: None,
            aggregator: None,
        }
    }

    #[tokio::test]
    async fn output_is_last_agent_final_text() {
        let client = Arc::new(MockModelClient::new());
        client.script("Summarize", "summary text");
        client.script("Translate", "texte resume");
        let runner = Arc::new(AgentRunner::new(client));
        let ctx = BlockContext {
            runner,
            workspace: None,
            tool_catalogue: Vec::new(),
            cancel_token: CancellationToken::new(),
        };
        let block = make_block();
        let input = BlockInput { block_text: block.task.clone(), per_agent_overrides: Default::default() };
        let (final_output, per_agent, agents_used) = run(&block, &input, &ctx).await.unwrap();
        assert_eq!(final_output, "texte resume");
        assert_eq!(agents_used, vec!["A1", "A2"]);
        assert_eq!(per_agent[0].agent, "A1");
        assert_eq!(per_agent[1].agent, "A2");
    }
}
