//! Debate pattern (spec §4.6.4): N rounds of participants responding in
//! declared order, each seeing the transcript so far. No aggregator.

use super::{BlockContext, BlockInput, PatternOutcome};
use crate::design::Block;
use crate::execution::AgentOutput;

const DEFAULT_ROUNDS: u32 = 1;

pub async fn run(block: &Block, input: &BlockInput, ctx: &BlockContext) -> PatternOutcome {
    let rounds = block.rounds.unwrap_or(DEFAULT_ROUNDS).max(1);
    let mut transcript = String::new();
    let mut per_agent_outputs = Vec::new();
    let mut last_statement = String::new();

    for _round in 0..rounds {
        for agent in &block.agents {
            let prompt = if transcript.is_empty() {
                input.block_text.clone()
            } else {
                format!("{}\n\nTranscript so far:\n{transcript}", input.block_text)
            };
            let (final_text, _events) = ctx.run_agent(agent, prompt).await;
            transcript.push_str(&format!("\n[{}]: {}\n", agent.name, final_text));
            last_statement = final_text.clone();
            per_agent_outputs.push(AgentOutput { agent: agent.name.clone(), text: final_text });
        }
    }

    let agents_used: Vec<String> = block.agents.iter().map(|a| a.name.clone()).collect();
    let _ = last_statement;
    Ok((transcript, per_agent_outputs, agents_used))
}
