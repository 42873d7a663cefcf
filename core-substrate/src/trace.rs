//! Append-only structured event log, consumed by an external collector.

use serde::{Deserialize, Serialize};

/// A single structured trace record.
///
/// Event types are free-form strings rather than an enum so a sink can
/// record event kinds this crate doesn't know about yet (`swarm.*`,
/// `autocompaction.*`) without a breaking change here. Common ones:
/// `iteration.start`/`iteration.end`, `llm.request`/`llm.response`/`llm.thinking`,
/// `tool.start`/`tool.end`, `decision`, `subagent.link`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Dotted event kind, e.g. `"tool.start"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event-specific payload. Shape depends on `event_type`.
    pub data: serde_json::Value,
    /// Session this event belongs to.
    pub session_id: String,
    /// Task within the session, if the event is task-scoped.
    pub task_id: Option<String>,
    /// Loop iteration number, if the event is iteration-scoped.
    pub iteration: Option<u32>,
    /// Agent that spawned the emitting agent, if any.
    pub parent_agent: Option<String>,
    /// Identifier of the subagent that emitted this event, if emitted by one.
    pub subagent_id: Option<String>,
    /// Milliseconds since the Unix epoch, set by the caller.
    pub timestamp: u64,
}

impl TraceEvent {
    /// Build a session-scoped event with no task/iteration/agent context.
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        session_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            session_id: session_id.into(),
            task_id: None,
            iteration: None,
            parent_agent: None,
            subagent_id: None,
            timestamp,
        }
    }

    /// Attach a task id.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attach an iteration number.
    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Attach the spawning parent's agent id.
    pub fn with_parent_agent(mut self, parent_agent: impl Into<String>) -> Self {
        self.parent_agent = Some(parent_agent.into());
        self
    }

    /// Attach the emitting subagent's id.
    pub fn with_subagent_id(mut self, subagent_id: impl Into<String>) -> Self {
        self.subagent_id = Some(subagent_id.into());
        self
    }
}

/// Destination for trace events.
///
/// `record` is deliberately synchronous: a sink that needs to do I/O
/// (write to a file, ship to a collector) buffers internally and flushes
/// on its own schedule rather than making every call site `.await`. Must
/// be safe to call from multiple tasks concurrently.
pub trait TraceSink: Send + Sync {
    /// Record one event. Must not block for long — sinks that need I/O
    /// queue the event and return.
    fn record(&self, event: TraceEvent);
}

/// Default sink: emits one `tracing` event per record.
///
/// This is what a deployment with no explicit collector configured falls
/// back to, so trace data still lands in structured logs rather than
/// going nowhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: TraceEvent) {
        tracing::info!(
            event_type = %event.event_type,
            session_id = %event.session_id,
            task_id = event.task_id.as_deref(),
            iteration = event.iteration,
            parent_agent = event.parent_agent.as_deref(),
            subagent_id = event.subagent_id.as_deref(),
            timestamp = event.timestamp,
            data = %event.data,
            "trace",
        );
    }
}

/// Test helpers for asserting on emitted trace events.
pub mod test_utils {
    use super::{TraceEvent, TraceSink};
    use std::sync::Mutex;

    /// Sink that accumulates every recorded event for later inspection.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<TraceEvent>>,
    }

    impl RecordingSink {
        /// Build an empty recording sink.
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of every event recorded so far, in recorded order.
        pub fn events(&self) -> Vec<TraceEvent> {
            self.events.lock().expect("recording sink lock poisoned").clone()
        }
    }

    impl TraceSink for RecordingSink {
        fn record(&self, event: TraceEvent) {
            self.events
                .lock()
                .expect("recording sink lock poisoned")
                .push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::RecordingSink;
    use super::*;

    #[test]
    fn recording_sink_preserves_order_and_fields() {
        let sink = RecordingSink::new();
        sink.record(
            TraceEvent::new("iteration.start", serde_json::json!({"n": 1}), "sess-1", 100)
                .with_task("task-1")
                .with_iteration(1),
        );
        sink.record(TraceEvent::new(
            "iteration.end",
            serde_json::json!({"n": 1}),
            "sess-1",
            200,
        ));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "iteration.start");
        assert_eq!(events[0].task_id.as_deref(), Some("task-1"));
        assert_eq!(events[0].iteration, Some(1));
        assert_eq!(events[1].event_type, "iteration.end");
        assert_eq!(events[1].timestamp, 200);
    }

    #[test]
    fn tracing_sink_does_not_panic_on_record() {
        let sink = TracingSink;
        sink.record(TraceEvent::new(
            "decision",
            serde_json::json!({"chose": "continue"}),
            "sess-2",
            0,
        ));
    }
}
