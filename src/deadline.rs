//! Refreshable deadline primitive.
//!
//! A [`Deadline`] is a cancellation signal that can be re-armed to an
//! absolute point in time. Ports keep one per direction to implement
//! `set_read_deadline`/`set_write_deadline` semantics: a fired deadline can
//! be cleared and the signal re-opened, which a one-shot token cannot do.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A refreshable cancellation signal with absolute-time semantics.
///
/// Semantics of [`Deadline::set`]:
///
/// 1. `None` cancels any pending timeout; the signal stays open.
/// 2. A future instant (re-)arms a timer that fires the signal.
/// 3. A past instant fires the signal immediately.
/// 4. If the previous signal already fired, it is replaced with a fresh
///    open one before re-arming, so earlier expirations do not leak into
///    later operations.
#[derive(Debug)]
pub struct Deadline {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
    // Bumped on every set(); a stale timer task observing a different
    // generation must not fire the current token.
    generation: u64,
}

impl Deadline {
    /// Creates an unarmed deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                token: CancellationToken::new(),
                timer: None,
                generation: 0,
            })),
        }
    }

    /// Sets the point in time at which the signal fires.
    ///
    /// Must be called from within a tokio runtime when `when` is a future
    /// instant (a timer task is spawned).
    pub fn set(&self, when: Option<Instant>) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        let Some(when) = when else {
            // No deadline: re-open the signal if a previous one fired.
            if inner.token.is_cancelled() {
                inner.token = CancellationToken::new();
            }
            return;
        };

        if when <= Instant::now() {
            inner.token.cancel();
            return;
        }

        if inner.token.is_cancelled() {
            inner.token = CancellationToken::new();
        }
        let generation = inner.generation;
        let shared = Arc::clone(&self.inner);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(when).await;
            let inner = shared.lock();
            if inner.generation == generation {
                inner.token.cancel();
            }
        }));
    }

    /// Returns the current signal.
    ///
    /// The returned token is a snapshot: a later [`Deadline::set`] may
    /// replace the signal, exactly like re-reading a deadline channel.
    #[must_use]
    pub fn wait(&self) -> CancellationToken {
        self.inner.lock().token.clone()
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_past_deadline_fires_immediately() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() - Duration::from_secs(1)));
        assert!(deadline.wait().is_cancelled());
    }

    #[tokio::test]
    async fn test_future_deadline_fires() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() + Duration::from_millis(20)));
        let token = deadline.wait();
        assert!(!token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_clear_reopens_after_fire() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() - Duration::from_secs(1)));
        assert!(deadline.wait().is_cancelled());

        deadline.set(None);
        assert!(!deadline.wait().is_cancelled());
    }

    #[tokio::test]
    async fn test_clear_stops_pending_timer() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() + Duration::from_millis(20)));
        deadline.set(None);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!deadline.wait().is_cancelled());
    }

    #[tokio::test]
    async fn test_rearm_after_fire() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() - Duration::from_secs(1)));
        assert!(deadline.wait().is_cancelled());

        deadline.set(Some(Instant::now() + Duration::from_millis(20)));
        let token = deadline.wait();
        assert!(!token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_refresh_replaces_pending_timer() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() + Duration::from_millis(20)));
        deadline.set(Some(Instant::now() + Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!deadline.wait().is_cancelled());
    }
}
