//! Duplicate-spawn detection: exact match plus near-duplicate matching
//! over a recent window, so a model that asks for the same investigation
//! twice in a row gets the cached answer instead of a second agent.

use crate::SpawnResult;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How far back a spawn can match a new request.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Token-Jaccard similarity at or above which two tasks are the same spawn.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;

fn canonical_words(task: &str) -> Vec<String> {
    task.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

struct Entry {
    agent_name: String,
    raw_task: String,
    words: Vec<String>,
    queued_at: Instant,
    result: SpawnResult,
}

/// Recent-spawn cache keyed by agent name plus a canonicalised task.
pub struct DedupCache {
    window: Duration,
    threshold: f64,
    entries: Mutex<VecDeque<Entry>>,
}

impl DedupCache {
    /// Create a cache using the default window and similarity threshold.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_WINDOW, DEFAULT_SIMILARITY_THRESHOLD)
    }

    /// Create a cache with explicit tuning, for tests or non-default deployments.
    pub fn with_params(window: Duration, threshold: f64) -> Self {
        Self {
            window,
            threshold,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Look for a spawn of the same agent on an equivalent task within the
    /// window. Expired entries are reaped as a side effect.
    pub async fn find_duplicate(&self, agent_name: &str, task: &str) -> Option<SpawnResult> {
        let now = Instant::now();
        let words = canonical_words(task);
        let mut entries = self.entries.lock().await;
        entries.retain(|e| now.saturating_duration_since(e.queued_at) < self.window);

        entries
            .iter()
            .find(|e| {
                e.agent_name == agent_name
                    && (e.raw_task == task || jaccard(&words, &e.words) >= self.threshold)
            })
            .map(|e| e.result.clone())
    }

    /// Record a completed spawn so a later equivalent request can be deduped.
    pub async fn record(&self, agent_name: &str, task: &str, result: SpawnResult) {
        let mut entries = self.entries.lock().await;
        entries.push_back(Entry {
            agent_name: agent_name.to_string(),
            raw_task: task.to_string(),
            words: canonical_words(task),
            queued_at: Instant::now(),
            result,
        });
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}
