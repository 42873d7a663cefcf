//! In-memory implementations for testing.
//!
//! Available behind the `test-utils` feature flag. These are minimal
//! implementations that prove the trait APIs are usable.

mod echo_turn;
mod in_memory_store;
mod local_environment;
mod local_orchestrator;
mod logging_hook;

pub use echo_turn::EchoTurn;
pub use in_memory_store::InMemoryStore;
pub use local_environment::LocalEnvironment;
pub use local_orchestrator::LocalOrchestrator;
pub use logging_hook::{LoggingHook, RecordedEvent};
