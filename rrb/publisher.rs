//! Publishes fan-out messages on a named channel, optionally requiring a minimum number of
//! recipients.

use crate::codec;
use crate::defaults::{Defaults, Options};
use crate::keys::Keys;
use crate::prelude::*;
use crate::redis::{Backend, CommandConn};

/// Publishes messages on a named channel.
///
/// Every currently-subscribed [`crate::Subscriber`] receives each published message - delivery
/// is fire-and-forget beyond the recipient count `publish` returns.
pub struct Publisher {
    channel_name: String,
    keys: Keys,
    backend: Backend,
    minimum_recipients: u64,
    command_conn: tokio::sync::Mutex<Option<CommandConn>>,
}

impl Publisher {
    /// Prepare a publisher for `channel_name`. Opens no connection yet - call
    /// [`Publisher::connect`].
    pub fn new(
        channel_name: impl Into<String>,
        conn_str: impl Into<String>,
        options: Options,
    ) -> RResult<Self> {
        let resolved = Defaults::apply(&options);
        Ok(Self {
            channel_name: channel_name.into(),
            keys: Keys::new(resolved.prefix),
            backend: Backend::new(conn_str)?,
            minimum_recipients: resolved.minimum_recipients,
            command_conn: tokio::sync::Mutex::new(None),
        })
    }

    /// Open the connection. Fails with [`BrokerError::AlreadyConnected`] if called twice
    /// without an intervening [`Publisher::disconnect`].
    pub async fn connect(&self) -> RResult<()> {
        let mut guard = self.command_conn.lock().await;
        if guard.is_some() {
            return Err(error_stack::report!(BrokerError::AlreadyConnected));
        }
        *guard = Some(self.backend.command_conn().await?);
        Ok(())
    }

    /// Idempotent; closes the connection if open, resolves immediately otherwise.
    pub async fn disconnect(&self) {
        if let Some(conn) = self.command_conn.lock().await.take() {
            conn.close().await;
        }
    }

    /// Publish `message`, returning the number of recipients that received it.
    ///
    /// Rejects with [`BrokerError::InsufficientRecipients`] if fewer than the configured
    /// `minimum_recipients` were listening - the message still reached whoever was listening;
    /// this only affects what's reported back to the caller.
    pub async fn publish(&self, message: serde_json::Value) -> RResult<u64> {
        let publish_id = uuid::Uuid::new_v4().to_string();
        let payload = codec::compose_pub_sub_message(&publish_id, message);
        let channel = self.keys.channel(&self.channel_name);

        let mut guard = self.command_conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| error_stack::report!(BrokerError::NotConnected))?;
        let recipients = conn.publish(&channel, &payload).await?;

        if recipients < self.minimum_recipients {
            return Err(error_stack::report!(BrokerError::InsufficientRecipients {
                got: recipients,
                required: self.minimum_recipients,
            }));
        }

        Ok(recipients)
    }
}
