//! Service metrics, exposed on `/metrics`

use huddle_telemetry::{Counter, Gauge, Histogram};
use serde_json::{json, Value};

pub struct ServiceMetrics {
    pub messages_sent: Counter,
    pub reads_recorded: Counter,
    pub conflict_retries: Counter,
    pub idempotent_replays: Counter,
    pub command_failures: Counter,
    pub typing_swept: Counter,
    pub command_latency_ms: Histogram,
    pub ws_sessions: Gauge,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: Counter::new("conversation_messages_sent_total"),
            reads_recorded: Counter::new("conversation_reads_recorded_total"),
            conflict_retries: Counter::new("conversation_conflict_retries_total"),
            idempotent_replays: Counter::new("conversation_idempotent_replays_total"),
            command_failures: Counter::new("conversation_command_failures_total"),
            typing_swept: Counter::new("conversation_typing_swept_total"),
            command_latency_ms: Histogram::new("conversation_command_latency_ms"),
            ws_sessions: Gauge::new("conversation_ws_sessions"),
        }
    }

    pub fn snapshot(&self) -> Value {
        let counters = [
            &self.messages_sent,
            &self.reads_recorded,
            &self.conflict_retries,
            &self.idempotent_replays,
            &self.command_failures,
            &self.typing_swept,
        ];
        let mut body = serde_json::Map::new();
        for counter in counters {
            body.insert(counter.name().to_string(), json!(counter.get()));
        }
        body.insert(self.ws_sessions.name().to_string(), json!(self.ws_sessions.get()));
        body.insert(
            self.command_latency_ms.name().to_string(),
            json!(self.command_latency_ms.summary()),
        );
        Value::Object(body)
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
