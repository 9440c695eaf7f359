//! Reflection pattern (spec §4.6.6, sixth pattern): worker drafts, a
//! reflector critiques, the worker revises. Repeats for `rounds` (default
//! 1); block output is the final revised draft.

use super::{BlockContext, BlockInput, PatternOutcome};
use crate::design::{AgentRole, Block};
use crate::execution::AgentOutput;

const DEFAULT_ROUNDS: u32 = 1;

pub async fn run(block: &Block, input: &BlockInput, ctx: &BlockContext) -> PatternOutcome {
    let worker = block
        .agents_with_role(AgentRole::Worker)
        .into_iter()
        .next()
        .ok_or_else(|| format!("block {} has no worker agent", block.id))?
        .clone();
    let reflector = block
        .agents_with_role(AgentRole::Reflector)
        .into_iter()
        .next()
        .ok_or_else(|| format!("block {} has no reflector agent", block.id))?
        .clone();

    let rounds = block.rounds.unwrap_or(DEFAULT_ROUNDS).max(1);
    let mut per_agent_outputs = Vec::new();

    let (mut draft, _events) = ctx.run_agent(&worker, input.block_text.clone()).await;
    per_agent_outputs.push(AgentOutput { agent: worker.name.clone(), text: draft.clone() });

    for _round in 0..rounds {
        let critique_prompt = format!("Draft:\n{draft}\n\nCritique this draft.");
        let (critique, _events) = ctx.run_agent(&reflector, critique_prompt).await;
        per_agent_outputs.push(AgentOutput { agent: reflector.name.clone(), text: critique.clone() });

        let revision_prompt = format!("{}\n\nPrevious draft:\n{draft}\n\nCritique:\n{critique}\n\nRevise.", input.block_text);
        let (revised, _events) = ctx.run_agent(&worker, revision_prompt).await;
        per_agent_outputs.push(AgentOutput { agent: worker.name.clone(), text: revised.clone() });
        draft = revised;
    }

    let agents_used = vec![worker.name.clone(), reflector.name.clone()];
    Ok((draft, per_agent_outputs, agents_used))
}
