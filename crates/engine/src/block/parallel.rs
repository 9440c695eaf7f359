//! Parallel pattern (spec §4.6.2): all agents run concurrently against the
//! same block task; results are collected in declaration order regardless
//! of completion order, then optionally folded through an aggregator.

use super::{format_concat, BlockContext, BlockInput, PatternOutcome};
use crate::design::Block;
use crate::execution::AgentOutput;

use futures::future::join_all;

pub async fn run(block: &Block, input: &BlockInput, ctx: &BlockContext) -> PatternOutcome {
    let fan_out: Vec<_> = block
        .agents
        .iter()
        .filter(|a| Some(&a.name) != block.aggregator.as_ref())
        .collect();

    let runs = fan_out.iter().map(|agent| {
        let prompt = input.for_agent(&agent.name).to_string();
        async move {
            let (final_text, _events) = ctx.run_agent(agent, prompt).await;
            AgentOutput { agent: agent.name.clone(), text: final_text }
        }
    });
    let per_agent_outputs: Vec<AgentOutput> = join_all(runs).await;
    let mut agents_used: Vec<String> = fan_out.iter().map(|a| a.name.clone()).collect();

    let final_output = match &block.aggregator {
        Some(aggregator_name) => {
            let aggregator = block.agent(aggregator_name).ok_or_else(|| {
                format!("aggregator {aggregator_name} is not a declared agent of block {}", block.id)
            })?;
            let serialized = format_concat(&per_agent_outputs);
            let prompt = format!("{}\n\n{serialized}", input.block_text);
            let (final_text, _events) = ctx.run_agent(aggregator, prompt).await;
            agents_used.push(aggregator.name.clone());
            final_text
        }
        None => format_concat(&per_agent_outputs),
    };

    Ok((final_output, per_agent_outputs, agents_used))
}
