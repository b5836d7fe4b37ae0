//! Issues request/response RPC calls against a [`crate::Worker`] listening on the same queue.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec;
use crate::defaults::{Defaults, Options};
use crate::keys::Keys;
use crate::log::{log_decode_failure, log_notice};
use crate::misc::with_timeout;
use crate::prelude::*;
use crate::redis::Backend;
use crate::tracker::RunningRequests;

/// Issues requests on a named queue and awaits their response, with a per-request timeout.
///
/// A request is never retried across workers - the notification mechanism already lets any
/// idle worker race for a queued item, so a client timeout handles worker starvation.
pub struct Client {
    id: String,
    queue_name: String,
    keys: Keys,
    backend: Backend,
    timeout: chrono::TimeDelta,
    command_conn: tokio::sync::Mutex<Option<crate::redis::CommandConn>>,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    tracker: RunningRequests,
}

impl Client {
    /// Prepare a client for `queue_name`. Opens no connections yet - call [`Client::connect`].
    pub fn new(
        queue_name: impl Into<String>,
        conn_str: impl Into<String>,
        options: Options,
    ) -> RResult<Self> {
        let resolved = Defaults::apply(&options);
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue_name: queue_name.into(),
            keys: Keys::new(resolved.prefix),
            backend: Backend::new(conn_str)?,
            timeout: resolved.timeout,
            command_conn: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            tracker: RunningRequests::new(),
        })
    }

    /// This client's unique id, generated at construction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the command connection.
    pub async fn connect(&self) -> RResult<()> {
        let conn = self.backend.command_conn().await?;
        *self.command_conn.lock().await = Some(conn);
        self.shutting_down.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Idempotent. Waits for all in-flight requests to complete or time out, then closes the
    /// command connection. Resolves immediately if never connected.
    pub async fn disconnect(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.tracker.await_drained().await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(conn) = self.command_conn.lock().await.take() {
            conn.close().await;
        }
    }

    /// Send one request and await its resolution.
    ///
    /// Rejects immediately with [`BrokerError::NotConnected`]/[`BrokerError::ShuttingDown`] if
    /// called before `connect()` or during `disconnect()`. Otherwise: enqueues the request,
    /// publishes a wakeup notification, and waits up to the configured timeout for a worker's
    /// response, rejecting with [`BrokerError::Timeout`] if none arrives in time.
    pub async fn request(&self, data: serde_json::Value) -> RResult<serde_json::Value> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(error_stack::report!(BrokerError::ShuttingDown));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(error_stack::report!(BrokerError::NotConnected));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        self.tracker.add(request_id.clone(), self.timeout);

        let result = self.request_inner(&request_id, data).await;

        self.tracker.finish(&request_id);
        result
    }

    async fn request_inner(
        &self,
        request_id: &str,
        data: serde_json::Value,
    ) -> RResult<serde_json::Value> {
        // A dedicated short-lived subscriber connection per request: response delivery for
        // concurrent requests on the same client must never cross-talk, and a subscribed
        // connection can't also issue the RPUSH/PUBLISH below.
        let mut sub_conn = self.backend.subscriber_conn().await?;
        let response_channel = self.keys.response_channel(request_id);
        sub_conn
            .subscribe(&response_channel)
            .await
            .change_context(BrokerError::Listen)?;

        let queue_key = self.keys.queue(&self.queue_name);
        let notif_channel = self.keys.notification_channel(&self.queue_name);
        let payload = codec::compose_request(request_id, data);

        {
            let mut guard = self.command_conn.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| error_stack::report!(BrokerError::NotConnected))?;
            conn.rpush(&queue_key, &payload).await?;
            let recipients = conn
                .publish(&notif_channel, &codec::compose_notification())
                .await?;
            if recipients == 0 {
                log_notice("client", &self.id, &self.queue_name, "no active worker");
            }
        }

        let outcome = with_timeout(
            self.timeout,
            || Err(error_stack::report!(BrokerError::Timeout)),
            async {
                loop {
                    match sub_conn.recv().await {
                        Some(msg) => match codec::parse_response(&msg.payload) {
                            Ok(parsed) => return Ok(parsed),
                            Err(e) => {
                                log_decode_failure(
                                    "client",
                                    &self.id,
                                    request_id,
                                    &format!("{:?}", e),
                                );
                                continue;
                            }
                        },
                        None => {
                            return Err(error_stack::report!(BrokerError::Backend)
                                .attach_printable(
                                    "response subscriber connection closed before a response arrived",
                                ))
                        }
                    }
                }
            },
        )
        .await;

        let _ = sub_conn.unsubscribe(&response_channel).await;
        sub_conn.close().await;

        match outcome? {
            codec::ResponseMsg::Ok { response, .. } => Ok(response),
            codec::ResponseMsg::Err { error, .. } => {
                Err(error_stack::report!(BrokerError::Handler(error)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use serde_json::json;

    use super::*;
    use crate::testing::prelude::*;
    use crate::worker::Worker;

    #[rstest]
    #[tokio::test]
    async fn test_request_before_connect_rejects(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let client = Client::new("jobs", server.client_conn_str(), Options::default())?;

        let err = client.request(json!(1)).await.unwrap_err();
        assert!(matches!(err.current_context(), BrokerError::NotConnected));
        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_disconnect_before_connect_is_idempotent(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let client = Client::new("jobs", server.client_conn_str(), Options::default())?;
        client.disconnect().await;
        client.disconnect().await;
        Ok(())
    }

    // S1: single worker echoes the request back.
    #[rstest]
    #[tokio::test]
    async fn test_s1_request_resolves_with_worker_response(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worker = Worker::new(
            "test",
            server.client_conn_str(),
            |data: serde_json::Value| async move { Ok(data) },
            Options::default(),
        )?;
        worker.listen().await?;

        let client = Client::new("test", server.client_conn_str(), Options::default())?;
        client.connect().await?;

        let response = client.request(json!(10)).await?;
        assert_eq!(response, json!(10));

        client.disconnect().await;
        worker.stop().await;
        Ok(())
    }

    // S2: a handler error is re-raised, carrying the original payload.
    #[rstest]
    #[tokio::test]
    async fn test_s2_request_rejects_with_handler_error(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worker = Worker::new(
            "test",
            server.client_conn_str(),
            |data: serde_json::Value| async move {
                Err(crate::codec::HandlerError::new(
                    data.as_str().unwrap_or_default().to_string(),
                ))
            },
            Options::default(),
        )?;
        worker.listen().await?;

        let client = Client::new("test", server.client_conn_str(), Options::default())?;
        client.connect().await?;

        let err = client.request(json!("data")).await.unwrap_err();
        match err.current_context() {
            BrokerError::Handler(normalized) => assert_eq!(normalized.message, "data"),
            other => panic!("expected Handler error, got {:?}", other),
        }

        client.disconnect().await;
        worker.stop().await;
        Ok(())
    }

    // S3: no worker listening, request times out.
    #[rstest]
    #[tokio::test]
    async fn test_s3_request_times_out_with_no_worker(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let client = Client::new(
            "invalid",
            server.client_conn_str(),
            Options {
                timeout: Some(chrono::TimeDelta::milliseconds(70)),
                ..Default::default()
            },
        )?;
        client.connect().await?;

        let start = std::time::Instant::now();
        let err = client.request(json!(20)).await.unwrap_err();
        assert!(matches!(err.current_context(), BrokerError::Timeout));
        assert!(start.elapsed() < std::time::Duration::from_millis(500));

        client.disconnect().await;
        Ok(())
    }

    // S4: two workers, exactly one handles the request - the would-be-panicking one never
    // runs because the winner's LPOP already removed the item.
    #[rstest]
    #[tokio::test]
    async fn test_s4_exactly_one_of_two_workers_handles_request(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let make_worker = |worked: std::sync::Arc<std::sync::atomic::AtomicBool>| {
            Worker::new(
                "test",
                server.client_conn_str(),
                move |data: serde_json::Value| {
                    let worked = worked.clone();
                    async move {
                        if worked.swap(true, Ordering::SeqCst) {
                            panic!("handler invoked twice for the same request");
                        }
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

        let client = Client::new("test", server.client_conn_str(), Options::default())?;
        client.connect().await?;

        let response = client.request(json!("work")).await?;
        assert_eq!(response, json!("work"));
        assert!(worked.load(Ordering::SeqCst));

        client.disconnect().await;
        w1.stop().await;
        w2.stop().await;
        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_concurrent_requests_are_isolated(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let worker = Worker::new(
            "test",
            server.client_conn_str(),
            |data: serde_json::Value| async move {
                let n = data.as_i64().unwrap_or_default();
                Ok(json!(n * 2))
            },
            Options::default(),
        )?;
        worker.listen().await?;

        let client = std::sync::Arc::new(Client::new(
            "test",
            server.client_conn_str(),
            Options::default(),
        )?);
        client.connect().await?;

        let mut handles = Vec::new();
        for n in 0..10i64 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let response = client.request(json!(n)).await.unwrap();
                assert_eq!(response, json!(n * 2));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        client.disconnect().await;
        worker.stop().await;
        Ok(())
    }
}
