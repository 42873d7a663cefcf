//! A no-op turn for exercising the plumbing around it, not the loop itself.

use crate::error::TurnError;
use crate::turn::{ExitReason, TurnInput, TurnMetadata, TurnOutput};
use async_trait::async_trait;

/// Hands the input message straight back as the output, no model call
/// involved. Useful when a test cares about orchestration, environment,
/// or hook wiring and wants a `Turn` that can't fail or do anything
/// surprising.
pub struct EchoTurn;

#[async_trait]
impl crate::turn::Turn for EchoTurn {
    async fn execute(&self, input: TurnInput) -> Result<TurnOutput, TurnError> {
        Ok(TurnOutput {
            message: input.message,
            exit_reason: ExitReason::Complete,
            metadata: TurnMetadata::default(),
            effects: vec![],
        })
    }
}
