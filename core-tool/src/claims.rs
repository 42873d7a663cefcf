//! File claims: a lease on a path so two agents don't write it concurrently.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A claim conflict: another holder already owns the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConflict {
    /// The path that's already claimed.
    pub path: String,
    /// Identifier of the agent holding the claim.
    pub holder: String,
}

struct Claim {
    holder: String,
    expires_at: Instant,
}

/// Tracks which agent currently holds a write claim on which path.
///
/// Claims expire after their TTL even if never explicitly released, so a
/// crashed or hung agent can't permanently lock a path.
pub trait ClaimStore: Send + Sync {
    /// Attempt to claim `path` for `holder` for `ttl`. Fails if a valid
    /// claim by a different holder exists.
    fn try_claim<'a>(
        &'a self,
        path: &'a str,
        holder: &'a str,
        ttl: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ClaimConflict>> + Send + 'a>>;

    /// Release a claim on `path` held by `holder`. No-op if `holder` does
    /// not hold it (including if it already expired).
    fn release<'a>(
        &'a self,
        path: &'a str,
        holder: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>>;
}

/// In-process claim tracker backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct InMemoryClaimStore {
    claims: RwLock<HashMap<String, Claim>>,
}

impl InMemoryClaimStore {
    /// Create an empty claim store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently-held (possibly expired) claims.
    pub async fn len(&self) -> usize {
        self.claims.read().await.len()
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn try_claim<'a>(
        &'a self,
        path: &'a str,
        holder: &'a str,
        ttl: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ClaimConflict>> + Send + 'a>>
    {
        Box::pin(async move {
            let now = Instant::now();
            let mut claims = self.claims.write().await;
            if let Some(existing) = claims.get(path) {
                if existing.expires_at > now && existing.holder != holder {
                    return Err(ClaimConflict {
                        path: path.to_string(),
                        holder: existing.holder.clone(),
                    });
                }
            }
            claims.insert(
                path.to_string(),
                Claim {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
            tracing::debug!(path, holder, ttl_ms = ttl.as_millis() as u64, "claimed path");
            Ok(())
        })
    }

    fn release<'a>(
        &'a self,
        path: &'a str,
        holder: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut claims = self.claims.write().await;
            if claims.get(path).is_some_and(|c| c.holder == holder) {
                claims.remove(path);
                tracing::debug!(path, holder, "released claim");
            }
        })
    }
}

/// Default claim TTL: 2 minutes.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_then_release_allows_reclaim_by_other_holder() {
        let store = InMemoryClaimStore::new();
        store
            .try_claim("src/lib.rs", "agent-a", DEFAULT_CLAIM_TTL)
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);

        let conflict = store
            .try_claim("src/lib.rs", "agent-b", DEFAULT_CLAIM_TTL)
            .await
            .unwrap_err();
        assert_eq!(conflict.holder, "agent-a");

        store.release("src/lib.rs", "agent-a").await;
        store
            .try_claim("src/lib.rs", "agent-b", DEFAULT_CLAIM_TTL)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn same_holder_can_reclaim_its_own_path() {
        let store = InMemoryClaimStore::new();
        store
            .try_claim("src/lib.rs", "agent-a", DEFAULT_CLAIM_TTL)
            .await
            .unwrap();
        store
            .try_claim("src/lib.rs", "agent-a", DEFAULT_CLAIM_TTL)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_claim_can_be_taken_by_another_holder() {
        let store = InMemoryClaimStore::new();
        store
            .try_claim("src/lib.rs", "agent-a", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .try_claim("src/lib.rs", "agent-b", DEFAULT_CLAIM_TTL)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_by_non_holder_is_noop() {
        let store = InMemoryClaimStore::new();
        store
            .try_claim("src/lib.rs", "agent-a", DEFAULT_CLAIM_TTL)
            .await
            .unwrap();
        store.release("src/lib.rs", "agent-b").await;
        let conflict = store
            .try_claim("src/lib.rs", "agent-b", DEFAULT_CLAIM_TTL)
            .await
            .unwrap_err();
        assert_eq!(conflict.holder, "agent-a");
    }
}
