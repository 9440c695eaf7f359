//! `StreamHub`: per-execution typed event fan-out (spec §4.8), grounded on
//! the broadcast-channel pattern the teacher uses for its agent event bus,
//! plus a snapshot ring buffer so late subscribers can catch up.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ExecutionStarted { execution_id: String, design_id: String },
    WorkspaceInfo { block_id: String, agents: Vec<AgentPath>, mode: String },
    BlockStarted { block_id: String, pattern: String },
    AgentStarted { block_id: String, agent: String },
    AgentChunk { block_id: String, agent: String, text: String },
    ToolCall { block_id: String, agent: String, name: String, args_summary: String, result_summary: Option<String> },
    AgentCompleted { block_id: String, agent: String, duration_ms: u64 },
    BlockCompleted { block_id: String, result_summary: String },
    ExecutionCompleted { status: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPath {
    pub name: String,
    pub path: String,
}

/// Sequenced wrapper so the ring buffer and subscribers can reason about
/// total order (spec §5 "events are totally ordered").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub timestamp: i64,
    pub event: StreamEvent,
}

struct ExecutionChannel {
    sender: broadcast::Sender<Envelope>,
    ring: Mutex<Vec<Envelope>>,
    ring_capacity: usize,
    sequence: AtomicU64,
}

impl ExecutionChannel {
    fn new(ring_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { sender, ring: Mutex::new(Vec::new()), ring_capacity, sequence: AtomicU64::new(0) }
    }

    fn publish(&self, event: StreamEvent) {
        let envelope = Envelope {
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
            event,
        };
        {
            let mut ring = self.ring.lock();
            ring.push(envelope.clone());
            if ring.len() > self.ring_capacity {
                let overflow = ring.len() - self.ring_capacity;
                ring.drain(0..overflow);
            }
        }
        // A lagging or absent subscriber is fine: the broadcast channel is
        // lossy by design (spec §5 back-pressure policy) and the ring
        // buffer is what late joiners actually replay from.
        let _ = self.sender.send(envelope);
    }

    fn snapshot(&self) -> Vec<Envelope> {
        self.ring.lock().clone()
    }
}

/// Process-wide registry of per-execution channels (spec §9 "global mutable
/// state ... initialize at startup; tear down on shutdown").
pub struct StreamHub {
    ring_capacity: usize,
    channels: Mutex<HashMap<String, Arc<ExecutionChannel>>>,
}

impl StreamHub {
    pub fn new(ring_capacity: usize) -> Self {
        Self { ring_capacity, channels: Mutex::new(HashMap::new()) }
    }

    fn channel(&self, execution_id: &str) -> Arc<ExecutionChannel> {
        self.channels
            .lock()
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(ExecutionChannel::new(self.ring_capacity)))
            .clone()
    }

    pub fn publish(&self, execution_id: &str, event: StreamEvent) {
        self.channel(execution_id).publish(event);
    }

    /// Snapshot-then-tail: the caller first receives everything currently in
    /// the ring buffer, then future events arrive over the receiver.
    pub fn subscribe(&self, execution_id: &str) -> (Vec<Envelope>, broadcast::Receiver<Envelope>) {
        let channel = self.channel(execution_id);
        let receiver = channel.sender.subscribe();
        (channel.snapshot(), receiver)
    }

    pub fn forget(&self, execution_id: &str) {
        self.channels.lock().remove(execution_id);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_tail_sees_prior_and_future_events() {
        let hub = StreamHub::new(10);
        hub.publish("e1", StreamEvent::ExecutionStarted { execution_id: "e1".to_string(), design_id: "d1".to_string() });

        let (snapshot, mut receiver) = hub.subscribe("e1");
        assert_eq!(snapshot.len(), 1);

        hub.publish("e1", StreamEvent::BlockStarted { block_id: "b1".to_string(), pattern: "sequential".to_string() });
        let next = receiver.try_recv().unwrap();
        assert!(matches!(next.event, StreamEvent::BlockStarted { .. }));
    }

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let hub = StreamHub::new(2);
        for i in 0..5 {
            hub.publish("e1", StreamEvent::AgentChunk { block_id: "b1".to_string(), agent: "a1".to_string(), text: i.to_string() });
        }
        let (snapshot, _receiver) = hub.subscribe("e1");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.last().unwrap().seq, 4);
    }

    #[test]
    fn events_are_monotonically_sequenced() {
        let hub = StreamHub::new(10);
        for i in 0..3 {
            hub.publish("e1", StreamEvent::AgentChunk { block_id: "b1".to_string(), agent: "a1".to_string(), text: i.to_string() });
        }
        let (snapshot, _receiver) = hub.subscribe("e1");
        let seqs: Vec<u64> = snapshot.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
