#![deny(missing_docs)]
//! Local (passthrough) implementation of the `Environment` protocol.
//!
//! No container, no gVisor/microVM boundary. Executes the turn directly
//! in the current process. The turn is provided at construction time and
//! stored as an `Arc<dyn Turn>`. The one piece of `EnvironmentSpec` this
//! implementation does honor is `resources.max_handles`: it tracks
//! concurrently in-flight `run` calls and rejects new ones past the
//! configured ceiling, the way a passthrough environment can still
//! apply a resource limit without an OS-level sandbox.

use agentcore_proto::environment::{Environment, EnvironmentSpec};
use agentcore_proto::error::EnvError;
use agentcore_proto::lifecycle::{EventSource, ObservableEvent};
use agentcore_proto::turn::{Turn, TurnInput, TurnOutput};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Receives observability events emitted by [`LocalEnv`] as it runs turns.
///
/// Optional — an environment with no sink attached just doesn't emit.
/// Kept as a plain synchronous callback (not a `Hook`) because these
/// events describe the environment's own lifecycle, not a point the
/// turn's inner loop can intervene on.
pub trait EnvironmentEventSink: Send + Sync {
    /// Called once per observable event.
    fn emit_observable(&self, event: ObservableEvent);
}

/// Local passthrough environment.
///
/// Owns an `Arc<dyn Turn>` and delegates directly to it. There is no
/// isolation boundary; the only enforcement is an optional concurrent
/// in-flight handle cap sourced from the `EnvironmentSpec` passed to
/// each `run` call.
pub struct LocalEnv {
    turn: Arc<dyn Turn>,
    in_flight: AtomicU32,
    event_sink: Option<Arc<dyn EnvironmentEventSink>>,
}

impl LocalEnv {
    /// Create a new local environment wrapping the given turn.
    pub fn new(turn: Arc<dyn Turn>) -> Self {
        Self {
            turn,
            in_flight: AtomicU32::new(0),
            event_sink: None,
        }
    }

    /// Attach an event sink for observability events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EnvironmentEventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Number of `run` calls currently executing.
    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        if let Some(sink) = &self.event_sink {
            sink.emit_observable(ObservableEvent::new(
                EventSource::Environment,
                event_type,
                agentcore_proto::duration::DurationMs::ZERO,
                data,
            ));
        }
    }
}

#[async_trait]
impl Environment for LocalEnv {
    async fn run(
        &self,
        input: TurnInput,
        spec: &EnvironmentSpec,
    ) -> Result<TurnOutput, EnvError> {
        if let Some(limits) = &spec.resources {
            if let Some(max) = limits.max_handles {
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                if current > max {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!(current, max, "environment resource limit exceeded");
                    return Err(EnvError::ResourceExceeded(format!(
                        "max_handles exceeded: {current} in flight, limit {max}"
                    )));
                }
            } else {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }

        self.emit("environment.run.start", serde_json::json!({}));
        let result = self.turn.execute(input).await.map_err(EnvError::TurnError);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &result {
            Ok(_) => self.emit("environment.run.complete", serde_json::json!({"ok": true})),
            Err(e) => self.emit(
                "environment.run.complete",
                serde_json::json!({"ok": false, "error": e.to_string()}),
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_proto::content::Content;
    use agentcore_proto::environment::ResourceLimits;
    use agentcore_proto::test_utils::EchoTurn;
    use agentcore_proto::turn::TriggerType;
    use std::sync::Mutex;

    fn simple_input(msg: &str) -> TurnInput {
        TurnInput::new(Content::text(msg), TriggerType::User)
    }

    #[tokio::test]
    async fn passthrough_execution() {
        let env = LocalEnv::new(Arc::new(EchoTurn));
        let output = env.run(simple_input("hello"), &EnvironmentSpec::default()).await.unwrap();
        assert_eq!(output.message, Content::text("hello"));
    }

    #[tokio::test]
    async fn no_resource_limit_allows_unbounded_calls() {
        let env = LocalEnv::new(Arc::new(EchoTurn));
        for _ in 0..5 {
            env.run(simple_input("x"), &EnvironmentSpec::default()).await.unwrap();
        }
        assert_eq!(env.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn rejects_past_max_handles() {
        let env = Arc::new(LocalEnv::new(Arc::new(EchoTurn)));
        let mut spec = EnvironmentSpec::default();
        let mut resources = ResourceLimits::default();
        resources.max_handles = Some(0);
        spec.resources = Some(resources);

        let result = env.run(simple_input("blocked"), &spec).await;
        assert!(matches!(result, Err(EnvError::ResourceExceeded(_))));
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ObservableEvent>>,
    }

    impl EnvironmentEventSink for RecordingSink {
        fn emit_observable(&self, event: ObservableEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn emits_start_and_complete_events() {
        let sink = Arc::new(RecordingSink::default());
        let env = LocalEnv::new(Arc::new(EchoTurn)).with_event_sink(sink.clone());

        env.run(simple_input("hi"), &EnvironmentSpec::default()).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "environment.run.start");
        assert_eq!(events[1].event_type, "environment.run.complete");
    }

    #[tokio::test]
    async fn usable_as_dyn_environment() {
        let env: Box<dyn Environment> = Box::new(LocalEnv::new(Arc::new(EchoTurn)));
        let output = env.run(simple_input("dyn"), &EnvironmentSpec::default()).await.unwrap();
        assert_eq!(output.message, Content::text("dyn"));
    }
}
