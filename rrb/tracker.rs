//! Tracks a [`crate::Client`]'s in-flight request ids so `disconnect` can wait for them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::TimeDelta;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::misc::sleep_compat;

/// Tracks in-flight request ids for a single client, with a shared "drained" signal: unset
/// while the set is non-empty, set when it becomes empty. [`crate::Client::disconnect`] waits
/// on it before closing the command connection.
#[derive(Clone)]
pub struct RunningRequests {
    inner: Arc<Mutex<HashSet<String>>>,
    drained: Arc<Notify>,
}

impl RunningRequests {
    /// A tracker with nothing in flight.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashSet::new())),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Register `id` as in-flight. Also schedules an automatic [`Self::finish`] after
    /// `timeout`, so a pathological request that never resolves can't block `disconnect`
    /// forever.
    pub fn add(&self, id: impl Into<String>, timeout: TimeDelta) {
        let id = id.into();
        self.inner.lock().insert(id.clone());

        let this = self.clone();
        tokio::spawn(async move {
            sleep_compat(timeout).await;
            this.finish(&id);
        });
    }

    /// Mark `id` as finished. Releases the drained signal if the set becomes empty.
    pub fn finish(&self, id: &str) {
        let mut guard = self.inner.lock();
        guard.remove(id);
        if guard.is_empty() {
            drop(guard);
            self.drained.notify_waiters();
        }
    }

    /// How many requests are currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Block until there are no in-flight requests.
    pub async fn await_drained(&self) {
        loop {
            // Register interest before checking the condition, so a `finish()` landing
            // between the check and the wait can't be missed.
            let notified = self.drained.notified();
            if self.inner.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for RunningRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn test_await_drained_returns_immediately_when_empty() {
        let tracker = RunningRequests::new();
        tracker.await_drained().await;
    }

    #[rstest]
    #[tokio::test]
    async fn test_await_drained_waits_for_finish() {
        let tracker = RunningRequests::new();
        tracker.add("a", TimeDelta::seconds(30));
        assert_eq!(tracker.len(), 1);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker.await_drained().await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tracker.finish("a");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("await_drained should have resolved")
            .unwrap();
    }

    #[rstest]
    #[tokio::test]
    async fn test_add_auto_finishes_after_timeout() {
        let tracker = RunningRequests::new();
        tracker.add("a", TimeDelta::milliseconds(20));
        assert_eq!(tracker.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(tracker.len(), 0);
    }
}
