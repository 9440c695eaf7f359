//! Hierarchical pattern (spec §4.6.3): manager delegates to workers, then
//! synthesizes their outputs.

use super::{format_concat, BlockContext, BlockInput, PatternOutcome};
use crate::design::{AgentRole, Block};
use crate::execution::AgentOutput;

use futures::future::join_all;
use std::collections::HashMap;

pub async fn run(block: &Block, input: &BlockInput, ctx: &BlockContext) -> PatternOutcome {
    let manager = block
        .agents_with_role(AgentRole::Manager)
        .into_iter()
        .next()
        .ok_or_else(|| format!("block {} has no manager agent", block.id))?
        .clone();
    let workers: Vec<_> = block
        .agents
        .iter()
        .filter(|a| a.role != AgentRole::Manager)
        .cloned()
        .collect();

    let roster = workers.iter().map(|w| w.name.clone()).collect::<Vec<_>>().join(", ");
    let delegation_prompt = format!("{}\n\nWorkers available: {roster}", input.block_text);
    let (delegation_text, _events) = ctx.run_agent(&manager, delegation_prompt).await;

    let assignments = parse_delegation(&delegation_text, &workers);

    let runs = workers.iter().map(|worker| {
        let task = assignments
            .get(&worker.name)
            .cloned()
            .unwrap_or_else(|| input.block_text.clone());
        async move {
            let (final_text, _events) = ctx.run_agent(worker, task).await;
            AgentOutput { agent: worker.name.clone(), text: final_text }
        }
    });
    let worker_outputs: Vec<AgentOutput> = join_all(runs).await;

    let synthesis_prompt = format!("{}\n\n{}", input.block_text, format_concat(&worker_outputs));
    let (synthesis, _events) = ctx.run_agent(&manager, synthesis_prompt).await;

    let mut per_agent_outputs = vec![AgentOutput { agent: manager.name.clone(), text: delegation_text }];
    per_agent_outputs.extend(worker_outputs);
    per_agent_outputs.push(AgentOutput { agent: manager.name.clone(), text: synthesis.clone() });

    let mut agents_used = vec![manager.name.clone()];
    agents_used.extend(workers.iter().map(|w| w.name.clone()));

    Ok((synthesis, per_agent_outputs, agents_used))
}

/// Parse the manager's delegation output. Tries JSON `{worker: task}` first;
/// falls back to a heuristic split on lines that start with a known worker
/// name followed by a colon.
fn parse_delegation(text: &str, workers: &[crate::design::AgentSpec]) -> HashMap<String, String> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        return map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect();
    }

    let mut assignments = HashMap::new();
    for worker in workers {
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix(&format!("{}:", worker.name)) {
                assignments.insert(worker.name.clone(), rest.trim().to_string());
            }
        }
    }
    assignments
}
