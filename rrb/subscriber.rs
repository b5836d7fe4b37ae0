//! Listens on a named channel and invokes a handler for every message published there.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::{self, HandlerError};
use crate::defaults::{Defaults, Options};
use crate::keys::Keys;
use crate::log::{log_decode_failure, log_handler_failure};
use crate::prelude::*;
use crate::redis::Backend;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A message handler invoked by a [`Subscriber`] for every message published on its channel.
///
/// Implemented automatically for `Fn(serde_json::Value) -> Future<Output = Result<(), _>>`.
/// Failures are logged and swallowed - they never stop the subscriber or affect the
/// publisher.
pub trait SubscriberHandler: Send + Sync + 'static {
    /// Handle one published message.
    fn call(&self, message: serde_json::Value) -> BoxFuture<Result<(), HandlerError>>;
}

impl<F, Fut> SubscriberHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, message: serde_json::Value) -> BoxFuture<Result<(), HandlerError>> {
        Box::pin(self(message))
    }
}

/// Listens on a named channel, invoking the handler for every message received.
pub struct Subscriber {
    id: String,
    channel_name: String,
    keys: Keys,
    backend: Backend,
    handler: Arc<dyn SubscriberHandler>,
    listening: AtomicBool,
    stop_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
    listen_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Subscriber {
    /// Prepare a subscriber for `channel_name`. Opens no connection yet - call
    /// [`Subscriber::listen`].
    pub fn new(
        channel_name: impl Into<String>,
        conn_str: impl Into<String>,
        handler: impl SubscriberHandler,
        options: Options,
    ) -> RResult<Self> {
        let resolved = Defaults::apply(&options);
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_name: channel_name.into(),
            keys: Keys::new(resolved.prefix),
            backend: Backend::new(conn_str)?,
            handler: Arc::new(handler),
            listening: AtomicBool::new(false),
            stop_requested: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            listen_task: Mutex::new(None),
        })
    }

    /// This subscriber's unique id, generated at construction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to the channel and start invoking the handler for every message. Rejects
    /// with [`BrokerError::AlreadyListening`] if called twice without an intervening
    /// [`Subscriber::stop`].
    pub async fn listen(&self) -> RResult<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(error_stack::report!(BrokerError::AlreadyListening));
        }

        let mut sub_conn = self.backend.subscriber_conn().await?;
        let channel = self.keys.channel(&self.channel_name);
        sub_conn
            .subscribe(&channel)
            .await
            .change_context(BrokerError::Listen)?;

        let handler = self.handler.clone();
        let id = self.id.clone();
        let stop_requested = self.stop_requested.clone();
        let wake = self.wake.clone();
        let channel_for_task = channel.clone();

        let task = tokio::spawn(async move {
            loop {
                if stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    msg = sub_conn.recv() => {
                        match msg {
                            Some(msg) => {
                                if stop_requested.load(Ordering::SeqCst) {
                                    break;
                                }
                                match codec::parse_pub_sub_message(&msg.payload) {
                                    Ok(parsed) => {
                                        if let Err(e) = handler.call(parsed.message).await {
                                            log_handler_failure(
                                                "subscriber",
                                                &id,
                                                &channel_for_task,
                                                &format!("{}", e),
                                            );
                                        }
                                    }
                                    Err(e) => log_decode_failure(
                                        "subscriber",
                                        &id,
                                        &channel_for_task,
                                        &format!("{:?}", e),
                                    ),
                                }
                            }
                            None => break,
                        }
                    }
                    _ = wake.notified() => {}
                }
            }
            let _ = sub_conn.unsubscribe(&channel_for_task).await;
            sub_conn.close().await;
        });

        *self.listen_task.lock() = Some(task);
        Ok(())
    }

    /// Idempotent; unsubscribes and closes the connection. Resolves immediately if never
    /// listening.
    pub async fn stop(&self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();

        if let Some(task) = self.listen_task.lock().take() {
            let _ = task.await;
        }
    }
}
