//! Subscribes to a queue's request-notification channel and atomically claims and executes
//! one request at a time, publishing the response (or serialized handler error) back.
//!
//! See the crate's design docs for the full dispatch state machine; in short: a notification
//! only means "there may be work" - the authoritative signal is the `LPOP` against the queue,
//! which is what actually makes claiming race-free across however many workers are listening.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::{self, HandlerError};
use crate::defaults::{Defaults, Options};
use crate::keys::Keys;
use crate::log::{log_backend_failure, log_debug, log_decode_failure};
use crate::prelude::*;
use crate::redis::{Backend, CommandConn, SubscriberConn};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A request handler invoked by a [`Worker`] for every item it claims off the queue.
///
/// Implemented automatically for `Fn(serde_json::Value) -> Future<Output = Result<...>>`, so
/// an `async fn`/closure can be passed directly to [`Worker::new`].
pub trait WorkerHandler: Send + Sync + 'static {
    /// Handle one request's data, returning the value to publish as the response, or a
    /// [`HandlerError`] to normalize and publish as the error response instead.
    fn call(&self, data: serde_json::Value) -> BoxFuture<Result<serde_json::Value, HandlerError>>;
}

impl<F, Fut> WorkerHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    fn call(&self, data: serde_json::Value) -> BoxFuture<Result<serde_json::Value, HandlerError>> {
        Box::pin(self(data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Working,
    Draining,
    Stopped,
}

struct WorkerInner {
    id: String,
    queue_name: String,
    keys: Keys,
    backend: Backend,
    handler: Arc<dyn WorkerHandler>,
    state: Mutex<WorkerState>,
    stopped: Notify,
    stop_requested: AtomicBool,
    wake: Notify,
    command_conn: tokio::sync::Mutex<Option<CommandConn>>,
}

/// Listens on a queue, claims one request at a time, runs the handler, and publishes the
/// response.
///
/// At most one handler invocation is ever in flight per worker - run multiple `Worker`s on
/// the same queue for concurrency; they race for each queued item at the `LPOP` step.
pub struct Worker {
    inner: Arc<WorkerInner>,
    listen_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Worker {
    /// Prepare a worker for `queue_name`. Opens no connections yet - call [`Worker::listen`].
    pub fn new(
        queue_name: impl Into<String>,
        conn_str: impl Into<String>,
        handler: impl WorkerHandler,
        options: Options,
    ) -> RResult<Self> {
        let resolved = Defaults::apply(&options);
        let backend = Backend::new(conn_str)?;
        Ok(Self {
            inner: Arc::new(WorkerInner {
                id: uuid::Uuid::new_v4().to_string(),
                queue_name: queue_name.into(),
                keys: Keys::new(resolved.prefix),
                backend,
                handler: Arc::new(handler),
                state: Mutex::new(WorkerState::Idle),
                stopped: Notify::new(),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                command_conn: tokio::sync::Mutex::new(None),
            }),
            listen_task: Mutex::new(None),
        })
    }

    /// This worker's unique id, generated at construction.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Open connections, subscribe to the request-notification channel, then run an initial
    /// queue check - so work enqueued before this call (or between a prior worker stopping
    /// and this one starting) still gets picked up rather than waiting for the next
    /// notification, which may never come.
    pub async fn listen(&self) -> RResult<()> {
        let cmd_conn = self.inner.backend.command_conn().await?;
        *self.inner.command_conn.lock().await = Some(cmd_conn);

        let mut sub_conn = self.inner.backend.subscriber_conn().await?;
        let notif_channel = self.inner.keys.notification_channel(&self.inner.queue_name);
        sub_conn
            .subscribe(&notif_channel)
            .await
            .change_context(BrokerError::Listen)?;

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            Self::run_loop(inner, sub_conn, notif_channel).await;
        });
        *self.listen_task.lock() = Some(task);

        Self::try_drain(&self.inner).await;

        Ok(())
    }

    async fn run_loop(inner: Arc<WorkerInner>, mut sub_conn: SubscriberConn, notif_channel: String) {
        loop {
            if inner.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                msg = sub_conn.recv() => {
                    match msg {
                        Some(_) => {
                            if inner.stop_requested.load(Ordering::SeqCst) {
                                break;
                            }
                            Self::try_drain(&inner).await;
                        }
                        None => break,
                    }
                }
                _ = inner.wake.notified() => {}
            }
        }
        let _ = sub_conn.unsubscribe(&notif_channel).await;
        sub_conn.close().await;
    }

    /// Attempt to go `Idle -> Working`, `LPOP` the queue, run the handler, publish the
    /// response, then keep draining the queue (a fresh notification may have been missed
    /// while we were busy) until it's empty or `stop` intervenes.
    async fn try_drain(inner: &Arc<WorkerInner>) {
        loop {
            {
                let mut state = inner.state.lock();
                if *state != WorkerState::Idle {
                    return;
                }
                *state = WorkerState::Working;
            }

            let queue_key = inner.keys.queue(&inner.queue_name);
            let popped = {
                let mut guard = inner.command_conn.lock().await;
                let conn = guard
                    .as_mut()
                    .expect("listen() opens the command connection before try_drain runs");
                conn.lpop(&queue_key).await
            };

            let raw = match popped {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    log_debug(
                        "worker",
                        &inner.id,
                        &inner.queue_name,
                        "lost claim race, nothing to pop",
                    );
                    if !Self::finish_turn(inner).await {
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    log_backend_failure(
                        "worker",
                        &inner.id,
                        Some(&inner.queue_name),
                        &format!("{:?}", e),
                    );
                    if !Self::finish_turn(inner).await {
                        return;
                    }
                    continue;
                }
            };

            Self::handle_one(inner, &raw).await;

            if !Self::finish_turn(inner).await {
                return;
            }
        }
    }

    async fn handle_one(inner: &Arc<WorkerInner>, raw: &str) {
        let req = match codec::parse_request(raw) {
            Ok(req) => req,
            Err(e) => {
                log_decode_failure("worker", &inner.id, &inner.queue_name, &format!("{:?}", e));
                return;
            }
        };

        let result = inner.handler.call(req.data).await;
        let response_bytes = match result {
            Ok(value) => codec::compose_response(&req.id, value),
            Err(err) => codec::compose_error(&req.id, &err),
        };

        let response_channel = inner.keys.response_channel(&req.id);
        let publish_result = {
            let mut guard = inner.command_conn.lock().await;
            let conn = guard
                .as_mut()
                .expect("listen() opens the command connection before handle_one runs");
            conn.publish(&response_channel, &response_bytes).await
        };

        if let Err(e) = publish_result {
            // The client may have already timed out and torn down its response listener.
            // At-most-once delivery of the response is accepted; the client's own timeout is
            // the safety net, so this is not re-queued.
            log_backend_failure(
                "worker",
                &inner.id,
                Some(&req.id),
                &format!("could not publish response: {:?}", e),
            );
        }
    }

    /// Transition out of `Working`: `Draining -> Stopped` (shutting down), or back to `Idle`
    /// (the caller loops to re-check the queue). Returns whether the caller should keep
    /// draining.
    async fn finish_turn(inner: &Arc<WorkerInner>) -> bool {
        let draining = {
            let mut state = inner.state.lock();
            if *state == WorkerState::Draining {
                *state = WorkerState::Stopped;
                true
            } else {
                *state = WorkerState::Idle;
                false
            }
        };

        if draining {
            if let Some(conn) = inner.command_conn.lock().await.take() {
                conn.close().await;
            }
            inner.stopped.notify_waiters();
            false
        } else {
            true
        }
    }

    /// Idempotent. Marks the worker as non-listening and unsubscribes; if it isn't currently
    /// handling a request, connections close immediately, otherwise shutdown is deferred
    /// until the in-flight handler returns. Resolves once connections are closed.
    pub async fn stop(&self) {
        let should_wait_for_drain = {
            let mut state = self.inner.state.lock();
            match *state {
                WorkerState::Stopped => return,
                WorkerState::Working => {
                    *state = WorkerState::Draining;
                    true
                }
                WorkerState::Idle | WorkerState::Draining => {
                    *state = WorkerState::Stopped;
                    false
                }
            }
        };

        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();

        if should_wait_for_drain {
            self.inner.stopped.notified().await;
        } else if let Some(conn) = self.inner.command_conn.lock().await.take() {
            conn.close().await;
        }

        if let Some(task) = self.listen_task.lock().take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use serde_json::json;

    use super::*;
    use crate::testing::prelude::*;

    #[rstest]
    #[tokio::test]
    async fn test_stop_before_listen_is_idempotent(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worker = Worker::new(
            "jobs",
            server.client_conn_str(),
            |data: serde_json::Value| async move { Ok(data) },
            Options::default(),
        )?;

        // Never listened, stop should still resolve without panicking.
        worker.stop().await;
        worker.stop().await;
        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_worker_claims_and_echoes(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worker = Worker::new(
            "jobs",
            server.client_conn_str(),
            |data: serde_json::Value| async move { Ok(data) },
            Options::default(),
        )?;
        worker.listen().await?;

        let backend = Backend::new(server.client_conn_str())?;
        let keys = Keys::new("rrb:");
        let mut cmd = backend.command_conn().await?;
        let mut response_sub = backend.subscriber_conn().await?;
        let response_channel = keys.response_channel("req-1");
        response_sub.subscribe(&response_channel).await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        cmd.rpush(&keys.queue("jobs"), &codec::compose_request("req-1", json!(10)))
            .await?;
        cmd.publish(&keys.notification_channel("jobs"), "").await?;

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), response_sub.recv())
            .await
            .expect("should receive a response before the test timeout")
            .expect("subscriber connection should still be open");
        match codec::parse_response(&msg.payload)? {
            codec::ResponseMsg::Ok { response, .. } => assert_eq!(response, json!(10)),
            codec::ResponseMsg::Err { error, .. } => panic!("unexpected error: {:?}", error),
        }

        worker.stop().await;
        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_worker_publishes_handler_error(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worker = Worker::new(
            "jobs",
            server.client_conn_str(),
            |data: serde_json::Value| async move { Err(HandlerError::new(data.to_string())) },
            Options::default(),
        )?;
        worker.listen().await?;

        let backend = Backend::new(server.client_conn_str())?;
        let keys = Keys::new("rrb:");
        let mut cmd = backend.command_conn().await?;
        let mut response_sub = backend.subscriber_conn().await?;
        let response_channel = keys.response_channel("req-1");
        response_sub.subscribe(&response_channel).await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        cmd.rpush(
            &keys.queue("jobs"),
            &codec::compose_request("req-1", json!("data")),
        )
        .await?;
        cmd.publish(&keys.notification_channel("jobs"), "").await?;

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), response_sub.recv())
            .await
            .expect("should receive a response before the test timeout")
            .expect("subscriber connection should still be open");
        match codec::parse_response(&msg.payload)? {
            codec::ResponseMsg::Err { error, .. } => assert_eq!(error.message, "\"data\""),
            codec::ResponseMsg::Ok { .. } => panic!("expected an error response"),
        }

        worker.stop().await;
        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_two_workers_exactly_one_claims(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worked = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let make_worker = |worked: Arc<std::sync::atomic::AtomicUsize>| {
            Worker::new(
                "jobs",
                server.client_conn_str(),
                move |data: serde_json::Value| {
                    let worked = worked.clone();
                    async move {
                        worked.fetch_add(1, Ordering::SeqCst);
                        Ok(data)
                    }
                },
                Options::default(),
            )
        };

        let w1 = make_worker(worked.clone())?;
        let w2 = make_worker(worked.clone())?;
        w1.listen().await?;
        w2.listen().await?;

        let backend = Backend::new(server.client_conn_str())?;
        let keys = Keys::new("rrb:");
        let mut cmd = backend.command_conn().await?;
        let mut response_sub = backend.subscriber_conn().await?;
        let response_channel = keys.response_channel("req-1");
        response_sub.subscribe(&response_channel).await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        cmd.rpush(
            &keys.queue("jobs"),
            &codec::compose_request("req-1", json!("work")),
        )
        .await?;
        cmd.publish(&keys.notification_channel("jobs"), "").await?;

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), response_sub.recv())
            .await
            .expect("should receive a response before the test timeout")
            .expect("subscriber connection should still be open");
        assert!(matches!(
            codec::parse_response(&msg.payload)?,
            codec::ResponseMsg::Ok { .. }
        ));
        assert_eq!(worked.load(Ordering::SeqCst), 1);

        w1.stop().await;
        w2.stop().await;
        Ok(())
    }
}
