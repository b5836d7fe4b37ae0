use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, FromRedisValue, PushInfo, PushKind};
use tokio::sync::mpsc;

use crate::log::log_decode_failure;
use crate::prelude::*;

/// A single message delivered on a subscribed channel.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    /// The channel the message arrived on.
    pub channel: String,
    /// The raw payload, still encoded exactly as published.
    pub payload: String,
}

/// A dedicated (not pooled) connection used purely for `SUBSCRIBE`/`UNSUBSCRIBE`/`PUBLISH`
/// push delivery.
///
/// Every participant that listens for backend-pushed messages (a worker's notification
/// channel, a client's per-request response channel, a subscriber's user channel) owns one
/// of these exclusively - it is never shared, per the connection-discipline rule that a
/// subscribed connection can't also issue other commands.
pub struct SubscriberConn {
    conn: MultiplexedConnection,
    push_rx: mpsc::UnboundedReceiver<PushInfo>,
}

impl SubscriberConn {
    pub(crate) async fn new(client: &redis::Client) -> RResult<Self> {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let config = AsyncConnectionConfig::new().set_push_sender(push_tx);

        let conn = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .change_context(BrokerError::Listen)?;

        Ok(Self { conn, push_rx })
    }

    /// `SUBSCRIBE` to a channel on this connection.
    pub async fn subscribe(&mut self, channel: &str) -> RResult<()> {
        self.conn
            .subscribe(channel)
            .await
            .change_context(BrokerError::Listen)
    }

    /// `UNSUBSCRIBE` from a channel on this connection.
    pub async fn unsubscribe(&mut self, channel: &str) -> RResult<()> {
        self.conn
            .unsubscribe(channel)
            .await
            .change_context(BrokerError::Listen)
    }

    /// Wait for the next pushed message, skipping over subscribe/unsubscribe acks and any
    /// message that fails to decode (logged and swallowed, never surfaced to the caller).
    ///
    /// Returns `None` once the connection has been dropped/disconnected - callers treat this
    /// as "stop listening".
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        loop {
            let push_info = self.push_rx.recv().await?;
            match push_info.kind {
                PushKind::Message => {
                    match <(String, redis::Value)>::from_owned_redis_value(redis::Value::Array(
                        push_info.data,
                    )) {
                        Ok((channel, value)) => match String::from_owned_redis_value(value) {
                            Ok(payload) => return Some(PubSubMessage { channel, payload }),
                            Err(e) => log_decode_failure(
                                "subscriber",
                                "conn",
                                "push-message",
                                &format!("{:?}", e),
                            ),
                        },
                        Err(e) => log_decode_failure(
                            "subscriber",
                            "conn",
                            "push-message",
                            &format!("{:?}", e),
                        ),
                    }
                }
                PushKind::Disconnection => return None,
                // Subscribe/unsubscribe acks, pattern variants: not used by this crate.
                _ => {}
            }
        }
    }

    /// Close the connection gracefully with `QUIT`, per spec.md §5's "graceful close first,
    /// forced close as the fallback". `QUIT` failing just means the connection was already
    /// gone; the forced close (spec.md §6's `END`) still happens via the subsequent drop.
    pub async fn close(mut self) {
        let _: Result<(), redis::RedisError> = redis::cmd("QUIT").query_async(&mut self.conn).await;
    }
}
