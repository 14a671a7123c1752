//! Poll timer: a background tick loop owned by a `PollHandle`.
//!
//! Runs as a `tokio::spawn` task with cancellation via `CancellationToken`.
//! Dropping the handle cancels the loop, so holding the handle is holding the
//! timer. A tick that is already running is allowed to finish; whatever it
//! produces must be checked against session identity by the caller.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Owned handle to a running poll loop.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollHandle {
    /// Start calling `tick` every `period`. The first call happens one full
    /// period after spawning. The loop ends when `tick` breaks or the handle
    /// is stopped or dropped.
    pub fn spawn<F, Fut>(generation: u64, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(generation, period_ms = period.as_millis() as u64, "Poll loop started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if tick().await.is_break() {
                    break;
                }
            }
            debug!(generation, "Poll loop stopped");
        });

        Self { cancel, handle }
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
