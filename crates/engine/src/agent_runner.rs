//! `AgentRunner`: runs one agent once against a `ModelClient` (spec §4.5).

use crate::error::EngineError;
use crate::model_client::{ChatMessage, ChatRole, ModelClient, ModelEvent, ToolSpec};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunnerEvent {
    Chunk { text: String },
    ToolCall { name: String, arguments: serde_json::Value },
    Done { final_text: String },
    Error { message: String },
}

pub struct AgentRunnerInput {
    pub agent_name: String,
    pub system_prompt: String,
    pub working_dir: PathBuf,
    pub user_prompt: String,
    pub tool_catalogue: Vec<ToolSpec>,
    pub cancel_token: CancellationToken,
}

pub struct AgentRunner {
    model_client: Arc<dyn ModelClient>,
    agent_turn_timeout: Duration,
}

impl AgentRunner {
    pub fn new(model_client: Arc<dyn ModelClient>) -> Self {
        Self { model_client, agent_turn_timeout: Duration::from_secs(600) }
    }

    pub fn with_agent_turn_timeout(mut self, timeout: Duration) -> Self {
        self.agent_turn_timeout = timeout;
        self
    }

    /// Run one turn, returning the fully-drained final text plus the typed
    /// event trace. Already-applied file changes are never rolled back on
    /// cancellation (spec §4.5) — this only stops consuming further events.
    #[instrument(
        name = "agent_runner.run",
        skip(self, input),
        fields(agent = %input.agent_name)
    )]
    pub async fn run(&self, input: AgentRunnerInput) -> (String, Vec<RunnerEvent>) {
        let messages = vec![ChatMessage { role: ChatRole::User, content: input.user_prompt }];
        let mut stream = self
            .model_client
            .stream(&input.system_prompt, &messages, &input.tool_catalogue)
            .await;

        let mut events = Vec::new();
        let mut final_text = String::new();
        let deadline = tokio::time::sleep(self.agent_turn_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = input.cancel_token.cancelled() => {
                    events.push(RunnerEvent::Error { message: "cancelled".to_string() });
                    break;
                }
                _ = &mut deadline => {
                    let error = EngineError::Timeout(format!("agent turn exceeded {:?}", self.agent_turn_timeout));
                    events.push(RunnerEvent::Error { message: error.to_string() });
                    break;
                }
                next = stream.next() => {
                    match next {
                        Some(ModelEvent::Chunk { text }) => {
                            events.push(RunnerEvent::Chunk { text });
                        }
                        Some(ModelEvent::ToolCall { name, arguments }) => {
                            events.push(RunnerEvent::ToolCall { name, arguments });
                        }
                        Some(ModelEvent::Done { final_text: text }) => {
                            final_text = text.clone();
                            events.push(RunnerEvent::Done { final_text: text });
                        }
                        Some(ModelEvent::Error { message }) => {
                            events.push(RunnerEvent::Error { message });
                        }
                        None => break,
                    }
                }
            }
        }

        (final_text, events)
    }
}
