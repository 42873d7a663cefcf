//! Hierarchical cancellation, plus a separate wrap-up warning signal.

use tokio::sync::watch;

/// A cancellation signal that propagates from parent to every descendant
/// token. `cancel()` is a single atomic publish; `cancelled()` and
/// `throw_if_requested()` are cheap reads with no lock contention on the
/// hot path.
#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    /// Create a new root token, not derived from any parent.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            parent: None,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Returns `Err(Cancelled)` if this token or any ancestor has been
    /// cancelled, otherwise `Ok(())`. Named for call sites that want `?`.
    pub fn throw_if_requested(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        if let Some(parent) = &self.parent {
            let mut own_rx = self.rx.clone();
            tokio::select! {
                _ = own_rx.changed() => {}
                () = Box::pin(parent.cancelled()) => {}
            }
        } else {
            let mut own_rx = self.rx.clone();
            while !*own_rx.borrow_and_update() {
                if own_rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Create a child token. Cancelling the parent (or any of its
    /// ancestors) cancels the child; cancelling the child has no effect on
    /// the parent.
    pub fn child_token(&self) -> CancellationToken {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            parent: Some(Box::new(self.clone())),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by [`CancellationToken::throw_if_requested`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// A one-shot wrap-up warning, separate from the cancellation tree.
///
/// Only subagent lifecycles carry this: the spawner fires it at
/// `hard_deadline - wrapup_window`, giving the subagent a chance to
/// produce a best-effort result before the hard kill, without that
/// early warning propagating as cancellation to the subagent's own
/// children.
#[derive(Clone)]
pub struct WrapUpSignal {
    rx: watch::Receiver<bool>,
}

/// The sending half of a [`WrapUpSignal`], held by the spawner.
pub struct WrapUpTrigger {
    tx: watch::Sender<bool>,
}

/// Create a linked wrap-up trigger/signal pair.
pub fn wrap_up_channel() -> (WrapUpTrigger, WrapUpSignal) {
    let (tx, rx) = watch::channel(false);
    (WrapUpTrigger { tx }, WrapUpSignal { rx })
}

impl WrapUpTrigger {
    /// Fire the wrap-up warning.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

impl WrapUpSignal {
    /// Whether wrap-up has already been signalled.
    pub fn is_signalled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once wrap-up is signalled.
    pub async fn signalled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_marks_token_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.throw_if_requested().is_err());
    }

    #[test]
    fn child_inherits_parent_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_direct_cancel() {
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            t.cancel();
        });
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("cancelled() should resolve");
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_ancestor_cancel() {
        let root = CancellationToken::new();
        let mid = root.child_token();
        let leaf = mid.child_token();

        let r = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            r.cancel();
        });
        tokio::time::timeout(Duration::from_secs(1), leaf.cancelled())
            .await
            .expect("leaf should observe ancestor cancellation");
    }

    #[tokio::test]
    async fn wrap_up_is_independent_of_cancellation_token() {
        let token = CancellationToken::new();
        let (trigger, signal) = wrap_up_channel();
        assert!(!signal.is_signalled());
        trigger.fire();
        assert!(signal.is_signalled());
        assert!(!token.is_cancelled());
    }
}
