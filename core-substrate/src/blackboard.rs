//! Concurrent findings board plus a path-claim table.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A single posted finding.
#[derive(Debug, Clone)]
pub struct Finding {
    /// Agent that posted this finding.
    pub agent: String,
    /// Free-form classification used by [`FindingQuery::types`].
    pub finding_type: String,
    /// Topic string used for deduplication and `topics` filtering.
    pub topic: String,
    /// The finding's content.
    pub content: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// When this finding was posted, relative to blackboard creation.
    posted_at: Instant,
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Filter for [`Blackboard::query`].
#[derive(Debug, Clone, Default)]
pub struct FindingQuery {
    /// Only findings whose `finding_type` is in this list (empty = any).
    pub types: Vec<String>,
    /// Only findings whose `topic` is in this list (empty = any).
    pub topics: Vec<String>,
    /// Minimum confidence, inclusive.
    pub min_confidence: f64,
    /// Maximum number of findings returned, most recent first.
    pub limit: usize,
}

/// Claim mode: exclusive writer, or shared among readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Only the holder may act on this path until release or expiry.
    Writer,
    /// Multiple agents may hold a reader claim on the same path
    /// concurrently; a writer claim cannot coexist with any reader claim.
    Reader,
}

/// A claim on a path.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Agent holding the claim.
    pub agent: String,
    /// Writer or reader.
    pub mode: ClaimMode,
    expires_at: Instant,
}

struct ClaimEntry {
    writer: Option<Claim>,
    readers: Vec<Claim>,
}

impl ClaimEntry {
    fn reap_expired(&mut self, now: Instant) {
        if self.writer.as_ref().is_some_and(|c| c.expires_at <= now) {
            self.writer = None;
        }
        self.readers.retain(|c| c.expires_at > now);
    }

    fn is_empty(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

struct FindingEntry {
    finding: Finding,
    key: (String, String, u64),
}

/// Shared findings board and path-claim table for an agent hierarchy.
pub struct Blackboard {
    findings: RwLock<Vec<FindingEntry>>,
    claims: RwLock<HashMap<String, ClaimEntry>>,
    max_findings: usize,
}

impl Blackboard {
    /// Create a blackboard that retains at most `max_findings` deduplicated
    /// findings, evicting the oldest once the cap is reached.
    pub fn new(max_findings: usize) -> Self {
        Self {
            findings: RwLock::new(Vec::new()),
            claims: RwLock::new(HashMap::new()),
            max_findings,
        }
    }

    /// Post a finding. Deduplicated by `(topic, agent, content_hash)`; a
    /// repeat post is a no-op rather than an error.
    pub async fn post(
        &self,
        agent: impl Into<String>,
        finding_type: impl Into<String>,
        topic: impl Into<String>,
        content: impl Into<String>,
        confidence: f64,
    ) {
        let agent = agent.into();
        let topic = topic.into();
        let content = content.into();
        let key = (topic.clone(), agent.clone(), content_hash(&content));

        let mut findings = self.findings.write().await;
        if findings.iter().any(|f| f.key == key) {
            return;
        }
        if findings.len() >= self.max_findings {
            findings.remove(0);
        }
        findings.push(FindingEntry {
            finding: Finding {
                agent,
                finding_type: finding_type.into(),
                topic,
                content,
                confidence,
                posted_at: Instant::now(),
            },
            key,
        });
    }

    /// Query findings matching `query`, most-recently-posted first.
    pub async fn query(&self, query: &FindingQuery) -> Vec<Finding> {
        let findings = self.findings.read().await;
        let mut matched: Vec<&Finding> = findings
            .iter()
            .map(|e| &e.finding)
            .filter(|f| f.confidence >= query.min_confidence)
            .filter(|f| query.types.is_empty() || query.types.contains(&f.finding_type))
            .filter(|f| query.topics.is_empty() || query.topics.contains(&f.topic))
            .collect();
        matched.sort_by_key(|f| std::cmp::Reverse(f.posted_at));
        let limit = if query.limit == 0 {
            matched.len()
        } else {
            query.limit
        };
        matched.into_iter().take(limit).cloned().collect()
    }

    /// Attempt to claim `path` for `agent` in `mode` for `ttl`.
    ///
    /// Multiple `Reader` claims may coexist; a `Writer` claim requires no
    /// other live claim (writer or reader) from a different agent.
    pub async fn claim(
        &self,
        path: impl Into<String>,
        agent: impl Into<String>,
        mode: ClaimMode,
        ttl: Duration,
    ) -> Result<(), String> {
        let path = path.into();
        let agent = agent.into();
        let now = Instant::now();
        let mut claims = self.claims.write().await;
        let entry = claims.entry(path).or_insert_with(|| ClaimEntry {
            writer: None,
            readers: Vec::new(),
        });
        entry.reap_expired(now);

        match mode {
            ClaimMode::Writer => {
                if let Some(existing) = &entry.writer {
                    if existing.agent != agent {
                        return Err(existing.agent.clone());
                    }
                }
                if entry.readers.iter().any(|r| r.agent != agent) {
                    return Err(entry.readers[0].agent.clone());
                }
                entry.writer = Some(Claim {
                    agent,
                    mode,
                    expires_at: now + ttl,
                });
            }
            ClaimMode::Reader => {
                if let Some(existing) = &entry.writer {
                    if existing.agent != agent {
                        return Err(existing.agent.clone());
                    }
                }
                entry.readers.retain(|r| r.agent != agent);
                entry.readers.push(Claim {
                    agent,
                    mode,
                    expires_at: now + ttl,
                });
            }
        }
        Ok(())
    }

    /// Release `agent`'s claim on `path`, if any.
    pub async fn release(&self, path: &str, agent: &str) {
        let mut claims = self.claims.write().await;
        if let Some(entry) = claims.get_mut(path) {
            if entry.writer.as_ref().is_some_and(|c| c.agent == agent) {
                entry.writer = None;
            }
            entry.readers.retain(|r| r.agent != agent);
            if entry.is_empty() {
                claims.remove(path);
            }
        }
    }

    /// Release every claim held by `agent`, across all paths. Called when
    /// an agent finishes or is cancelled.
    pub async fn release_all(&self, agent: &str) {
        let mut claims = self.claims.write().await;
        claims.retain(|_path, entry| {
            if entry.writer.as_ref().is_some_and(|c| c.agent == agent) {
                entry.writer = None;
            }
            entry.readers.retain(|r| r.agent != agent);
            !entry.is_empty()
        });
    }

    /// Drop all bookkeeping for `agent` without touching other agents'
    /// claims — an alias kept distinct from [`Self::release_all`] for
    /// callers that mean "this agent is gone" rather than "release its
    /// claims but it may still be alive".
    pub async fn unsubscribe_agent(&self, agent: &str) {
        self.release_all(agent).await;
    }

    /// Number of findings currently retained.
    pub async fn finding_count(&self) -> usize {
        self.findings.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_dedupes_by_topic_agent_content() {
        let board = Blackboard::new(100);
        board.post("agent-a", "finding", "auth", "found a bug", 0.9).await;
        board.post("agent-a", "finding", "auth", "found a bug", 0.9).await;
        assert_eq!(board.finding_count().await, 1);
    }

    #[tokio::test]
    async fn post_respects_max_findings_cap_with_lru_eviction() {
        let board = Blackboard::new(2);
        board.post("a", "f", "t1", "one", 0.5).await;
        board.post("a", "f", "t2", "two", 0.5).await;
        board.post("a", "f", "t3", "three", 0.5).await;
        assert_eq!(board.finding_count().await, 2);

        let all = board.query(&FindingQuery::default()).await;
        assert!(!all.iter().any(|f| f.content == "one"));
    }

    #[tokio::test]
    async fn query_filters_by_min_confidence_and_type() {
        let board = Blackboard::new(100);
        board.post("a", "bug", "t1", "low conf", 0.3).await;
        board.post("a", "insight", "t1", "high conf", 0.9).await;

        let results = board
            .query(&FindingQuery {
                min_confidence: 0.5,
                ..Default::default()
            })
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "high conf");

        let typed = board
            .query(&FindingQuery {
                types: vec!["bug".into()],
                ..Default::default()
            })
            .await;
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].finding_type, "bug");
    }

    #[tokio::test]
    async fn writer_claim_blocks_other_agents() {
        let board = Blackboard::new(100);
        board
            .claim("src/lib.rs", "agent-a", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap();

        let err = board
            .claim("src/lib.rs", "agent-b", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err, "agent-a");
    }

    #[tokio::test]
    async fn multiple_readers_coexist() {
        let board = Blackboard::new(100);
        board
            .claim("src/lib.rs", "agent-a", ClaimMode::Reader, Duration::from_secs(60))
            .await
            .unwrap();
        board
            .claim("src/lib.rs", "agent-b", ClaimMode::Reader, Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn writer_cannot_claim_over_existing_reader() {
        let board = Blackboard::new(100);
        board
            .claim("src/lib.rs", "agent-a", ClaimMode::Reader, Duration::from_secs(60))
            .await
            .unwrap();
        let err = board
            .claim("src/lib.rs", "agent-b", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err, "agent-a");
    }

    #[tokio::test]
    async fn release_all_frees_every_path_for_agent() {
        let board = Blackboard::new(100);
        board
            .claim("a.rs", "agent-a", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap();
        board
            .claim("b.rs", "agent-a", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap();

        board.release_all("agent-a").await;

        board
            .claim("a.rs", "agent-b", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap();
        board
            .claim("b.rs", "agent-b", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_claim_is_reaped_lazily() {
        let board = Blackboard::new(100);
        board
            .claim("a.rs", "agent-a", ClaimMode::Writer, Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        board
            .claim("a.rs", "agent-b", ClaimMode::Writer, Duration::from_secs(60))
            .await
            .unwrap();
    }
}
