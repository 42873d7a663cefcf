//! Graceful-timeout lifecycle for one spawned child.
//!
//! Three phases: normal operation with the deadline pushed out on every
//! progress event, a wrap-up window during which the child is asked (not
//! forced) to close out, then hard cancellation once the window elapses.

use core_substrate::{wrap_up_channel, CancellationToken, WrapUpSignal, WrapUpTrigger};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Drives a child's deadline: watches it, fires the wrap-up warning, then
/// cancels. `record_progress` from the caller pushes the deadline back out.
pub struct GracefulTimeout {
    token: CancellationToken,
    wrapup_trigger: WrapUpTrigger,
    wrapup_signal: WrapUpSignal,
    deadline: Mutex<Instant>,
    hard_timeout: Duration,
    wrapup_window: Duration,
}

impl GracefulTimeout {
    /// Derive a child token from `parent` (so cancelling the parent
    /// cancels this child too) with the given hard timeout and wrap-up
    /// window.
    pub fn new(parent: &CancellationToken, hard_timeout: Duration, wrapup_window: Duration) -> Self {
        let (wrapup_trigger, wrapup_signal) = wrap_up_channel();
        Self {
            token: parent.child_token(),
            wrapup_trigger,
            wrapup_signal,
            deadline: Mutex::new(Instant::now() + hard_timeout),
            hard_timeout,
            wrapup_window,
        }
    }

    /// The cancellation token this child should be run with.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The wrap-up warning signal; a well-behaved child watches this and
    /// starts closing out (producing a closure report) once it fires.
    pub fn wrapup_signal(&self) -> WrapUpSignal {
        self.wrapup_signal.clone()
    }

    /// Push the deadline back out to a full `hard_timeout` from now.
    /// Call this on every observed progress event so an actively working
    /// child isn't starved by a fixed wall-clock budget.
    pub fn record_progress(&self) {
        let mut deadline = self.deadline.lock().expect("deadline mutex poisoned");
        *deadline = Instant::now() + self.hard_timeout;
    }

    /// Run the watchdog to completion: sleeps until the wrap-up point,
    /// fires the warning, sleeps the wrap-up window, then cancels.
    /// Returns early without cancelling if the token is already
    /// cancelled by the time either sleep elapses.
    pub async fn watch(&self) {
        loop {
            let wrapup_at = {
                let deadline = self.deadline.lock().expect("deadline mutex poisoned");
                deadline.checked_sub(self.wrapup_window).unwrap_or(*deadline)
            };
            let now = Instant::now();
            if now >= wrapup_at {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(wrapup_at - now) => {}
                () = self.token.cancelled() => return,
            }
            // The deadline may have moved during the sleep; recheck.
        }

        if self.token.is_cancelled() {
            return;
        }
        self.wrapup_trigger.fire();

        let hard_deadline = *self.deadline.lock().expect("deadline mutex poisoned");
        let now = Instant::now();
        if now < hard_deadline {
            tokio::select! {
                () = tokio::time::sleep(hard_deadline - now) => {}
                () = self.token.cancelled() => return,
            }
        }
        if !self.token.is_cancelled() {
            self.token.cancel();
        }
    }
}
