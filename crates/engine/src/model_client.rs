//! The LLM vendor client is an external collaborator (spec §1); this module
//! pins the interface the rest of the engine is written against, plus a
//! deterministic test double so the scheduler and block patterns can be
//! exercised without a real provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelEvent {
    Chunk { text: String },
    ToolCall { name: String, arguments: serde_json::Value },
    Done { final_text: String },
    Error { message: String },
}

pub type EventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// One method, per spec §1: `stream(system, messages, tools) -> chan Event`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> EventStream;
}

enum Scripted {
    Immediate(String),
    /// Emits the chunk right away, then waits `delay` before `Done`, so
    /// tests can cancel in the window between the two events.
    Delayed(String, std::time::Duration),
}

/// Deterministic test double. Each call to `stream` for a given `system`
/// prompt pops the next scripted response queued for it (or falls back to
/// echoing the last user message), so the five block patterns can be
/// exercised with predictable output in unit and scenario tests.
#[derive(Default)]
pub struct MockModelClient {
    scripts: parking_lot::Mutex<std::collections::HashMap<String, std::collections::VecDeque<Scripted>>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted final-text response keyed by the caller's system prompt.
    pub fn script(&self, system_prompt: impl Into<String>, response: impl Into<String>) {
        self.scripts
            .lock()
            .entry(system_prompt.into())
            .or_default()
            .push_back(Scripted::Immediate(response.into()));
    }

    /// Queue a response whose `Done` event lands only after `delay`, so a
    /// caller holding a cancellation token can cancel after the first chunk
    /// but before the turn actually finishes.
    pub fn script_slow(&self, system_prompt: impl Into<String>, response: impl Into<String>, delay: std::time::Duration) {
        self.scripts
            .lock()
            .entry(system_prompt.into())
            .or_default()
            .push_back(Scripted::Delayed(response.into(), delay));
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> EventStream {
        let scripted = self.scripts.lock().get_mut(system).and_then(|q| q.pop_front());
        match scripted {
            Some(Scripted::Delayed(text, delay)) => {
                let chunk = tokio_stream::iter(vec![ModelEvent::Chunk { text: text.clone() }]);
                let done = futures::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    ModelEvent::Done { final_text: text }
                });
                Box::pin(futures::StreamExt::chain(chunk, done))
            }
            Some(Scripted::Immediate(text)) => {
                let events = vec![ModelEvent::Chunk { text: text.clone() }, ModelEvent::Done { final_text: text }];
                Box::pin(tokio_stream::iter(events))
            }
            None => {
                let text = messages.last().map(|m| m.content.clone()).unwrap_or_default();
                let events = vec![ModelEvent::Chunk { text: text.clone() }, ModelEvent::Done { final_text: text }];
                Box::pin(tokio_stream::iter(events))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn mock_returns_scripted_response() {
        let client = MockModelClient::new();
        client.script("sys", "scripted reply");
        let mut stream = client.stream("sys", &[], &[]).await;
        let mut last = None;
        while let Some(event) = stream.next().await {
            if let ModelEvent::Done { final_text } = event {
                last = Some(final_text);
            }
        }
        assert_eq!(last.as_deref(), Some("scripted reply"));
    }

    #[tokio::test]
    async fn mock_echoes_last_message_without_script() {
        let client = MockModelClient::new();
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            content: "hello".to_string(),
        }];
        let mut stream = client.stream("sys", &messages, &[]).await;
        let mut last = None;
        while let Some(event) = stream.next().await {
            if let ModelEvent::Done { final_text } = event {
                last = Some(final_text);
            }
        }
        assert_eq!(last.as_deref(), Some("hello"));
    }
}
