//! Small shared primitives used across the voice engine.
//!
//! Grounded on songbird's design note that one-shot signals
//! (metadata-ready, playback-started, track-finished, ready-threshold,
//! file-created) should be "closed-at-most-once" notification primitives,
//! and on `driver/tasks/mod.rs`'s pattern of isolating each spawned task's
//! panics from the rest of the process.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::error;

/// A notification that can only ever fire once. Waiters that arrive after
/// the close are woken immediately; the close itself is idempotent.
#[derive(Debug, Default)]
pub struct NotifyOnce {
    closed: AtomicBool,
    notify: Notify,
}

impl NotifyOnce {
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Closes the signal. Subsequent calls are no-ops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits until [`close`] has been called, returning immediately if it
    /// already has.
    pub async fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let notified = self.notify.notified();
        // Re-check after registering interest to avoid missing a close that
        // raced with subscription.
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

/// Spawns `fut` on the Tokio runtime, trapping any panic into a CRITICAL log
/// line rather than letting it unwind across the task boundary and take
/// other sessions down with it.
pub fn spawn_guarded<F>(task_name: &'static str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let result = AssertUnwindSafe(fut).catch_unwind().await;
        if let Err(panic) = result {
            let message = panic_message(&panic);
            error!(critical = true, task = task_name, %message, "task panicked");
        }
    })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Retries a fallible, possibly-panicking call a fixed number of times with
/// a fixed delay between attempts. Used to wrap join/leave calls into the
/// voice connection handle, which can panic internally on a bad gateway
/// handshake.
pub async fn retry_panic_safe<T, E, F, Fut>(
    attempts: u32,
    delay: std::time::Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        match AssertUnwindSafe(op()).catch_unwind().await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_err = Some(e),
            Err(panic) => {
                error!(critical = true, attempt, message = %panic_message(&panic), "connection call panicked");
            },
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(last_err.expect("retry_panic_safe exhausted attempts without capturing an error"))
}

/// Thin wrapper so callers can `Arc::clone` a cancellation token the same way
/// they clone any other session handle.
pub type CancelToken = Arc<tokio_util::sync::CancellationToken>;

pub fn new_cancel_token() -> CancelToken {
    Arc::new(tokio_util::sync::CancellationToken::new())
}
