//! Routing pattern (spec §4.6.5): a router picks one specialist to handle
//! the block task.

use super::{BlockContext, BlockInput, PatternOutcome};
use crate::design::{AgentRole, Block};
use crate::execution::AgentOutput;

pub async fn run(block: &Block, input: &BlockInput, ctx: &BlockContext) -> PatternOutcome {
    let router = block
        .agents_with_role(AgentRole::Router)
        .into_iter()
        .next()
        .ok_or_else(|| format!("block {} has no router agent", block.id))?
        .clone();
    let specialists: Vec<_> = block.agents_with_role(AgentRole::Specialist).into_iter().cloned().collect();
    if specialists.is_empty() {
        return Err(format!("block {} has no specialist agents", block.id));
    }

    let roster = specialists.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(", ");
    let routing_prompt = format!("{}\n\nSpecialists available: {roster}", input.block_text);
    let (decision_text, _events) = ctx.run_agent(&router, routing_prompt).await;

    let (selected, used_fallback) = match parse_target(&decision_text, &specialists) {
        Some(name) => (name, false),
        None => (specialists[0].name.clone(), true),
    };
    if used_fallback {
        tracing::warn!(block_id = %block.id, "routing: could not parse router decision, falling back to first specialist");
    }

    let specialist = specialists
        .iter()
        .find(|s| s.name == selected)
        .expect("selected specialist must be in roster");
    let (final_text, _events) = ctx.run_agent(specialist, input.block_text.clone()).await;

    let per_agent_outputs = vec![
        AgentOutput { agent: router.name.clone(), text: decision_text },
        AgentOutput { agent: specialist.name.clone(), text: final_text.clone() },
    ];
    let agents_used = vec![router.name.clone(), specialist.name.clone()];

    Ok((final_text, per_agent_outputs, agents_used))
}

fn parse_target(text: &str, specialists: &[crate::design::AgentSpec]) -> Option<String> {
    specialists
        .iter()
        .find(|s| text.contains(&s.name))
        .map(|s| s.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::AgentRunner;
    use crate::design::{AgentSpec, BlockType};
    use crate::model_client::MockModelClient;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn make_block() -> Block {
        Block {
            id: "b1".to_string(),
            block_type: BlockType::Routing,
            agents: vec![
                AgentSpec { name: "Router".to_string(), role: AgentRole::Router, system_prompt: "router".to_string(), use_tools: false },
                AgentSpec { name: "Billing".to_string(), role: AgentRole::Specialist, system_prompt: "billing".to_string(), use_tools: false },
                AgentSpec { name: "Tech".to_string(), role: AgentRole::Specialist, system_prompt: "tech".to_string(), use_tools: false },
            ],
            task: "My invoice is wrong".to_string(),
            git_repo: None,
            isolate_agent_workspaces: false,
            rounds: None,
            aggregator: None,
        }
    }

    #[tokio::test]
    async fn routes_to_named_specialist() {
        let client = Arc::new(MockModelClient::new());
        client.script("router", "Route to Billing because it's an invoice issue");
        client.script("billing", "Refund issued");
        let block = make_block();
        let runner = Arc::new(AgentRunner::new(client));
        let ctx = BlockContext { runner, workspace: None, tool_catalogue: Vec::new(), cancel_token: CancellationToken::new() };
        let input = BlockInput { block_text: block.task.clone(), per_agent_overrides: Default::default() };

        let (final_output, _per_agent, agents_used) = run(&block, &input, &ctx).await.unwrap();
        assert_eq!(final_output, "Refund issued");
        assert_eq!(agents_used, vec!["Router".to_string(), "Billing".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_first_specialist_on_parse_failure() {
        let client = Arc::new(MockModelClient::new());
        client.script("router", "unparseable gibberish");
        client.script("billing", "handled by default");
        let block = make_block();
        let runner = Arc::new(AgentRunner::new(client));
        let ctx = BlockContext { runner, workspace: None, tool_catalogue: Vec::new(), cancel_token: CancellationToken::new() };
        let input = BlockInput { block_text: block.task.clone(), per_agent_overrides: Default::default() };

        let (final_output, ..) = run(&block, &input, &ctx).await.unwrap();
        assert_eq!(final_output, "handled by default");
    }
}
