//! Configuration for context assembly, recitation, and compaction.

use serde::{Deserialize, Serialize};

/// Tunables for the context-engineering pipeline: cache-aware assembly,
/// recitation, reversible compaction, and tool-output compaction.
///
/// Loading this from a file or environment is out of scope here — this
/// type only defines the recognised-options shape so an external loader
/// can deserialize directly into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Fraction of the model's context window (0.0-1.0) at which
    /// reversible compaction triggers.
    pub compaction_threshold: f64,

    /// Fraction of the model's context window at which recitation
    /// (goal/plan restatement) is injected before the newest user turn.
    pub recitation_threshold: f64,

    /// Tool-result bodies longer than `preview_chars * 2` are replaced
    /// by a preview of this length plus a compacted-size marker.
    pub preview_chars: usize,

    /// Maximum number of `preserveFromCompaction`-flagged tool results
    /// retained verbatim; older ones beyond this bound are compacted
    /// like any other tool output.
    pub max_preserved_results: usize,

    /// The model's total context window in tokens, used to turn the
    /// threshold fractions above into absolute token counts.
    pub context_window_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 0.70,
            recitation_threshold: 0.70,
            preview_chars: 200,
            max_preserved_results: 6,
            context_window_tokens: 200_000,
        }
    }
}

impl ContextConfig {
    /// Absolute token count at which compaction should trigger.
    pub fn compaction_token_limit(&self) -> usize {
        (self.context_window_tokens as f64 * self.compaction_threshold) as usize
    }

    /// Absolute token count at which recitation should trigger.
    pub fn recitation_token_limit(&self) -> usize {
        (self.context_window_tokens as f64 * self.recitation_threshold) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ContextConfig::default();
        assert_eq!(config.compaction_threshold, 0.70);
        assert_eq!(config.recitation_threshold, 0.70);
        assert_eq!(config.preview_chars, 200);
        assert_eq!(config.max_preserved_results, 6);
    }

    #[test]
    fn token_limits_scale_with_window() {
        let config = ContextConfig {
            context_window_tokens: 100_000,
            ..ContextConfig::default()
        };
        assert_eq!(config.compaction_token_limit(), 70_000);
        assert_eq!(config.recitation_token_limit(), 70_000);
    }

    #[test]
    fn serde_round_trip() {
        let config = ContextConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ContextConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.preview_chars, config.preview_chars);
    }
}
