use deadpool_redis::{Config, Runtime};

use crate::prelude::*;

use super::{CommandConn, SubscriberConn};

/// A handle on the backend keyspace, giving out both kinds of connection a participant needs:
/// pooled [`CommandConn`]s for issuing commands, and dedicated [`SubscriberConn`]s for
/// listening on pub/sub channels.
///
/// Mirrors how the rest of this crate's ecosystem wraps a connection pool: construction is
/// cheap and fallible only on a malformed URL, the actual network connection is established
/// lazily per-call.
#[derive(Clone)]
pub struct Backend {
    pool: deadpool_redis::Pool,
    client: redis::Client,
}

impl Backend {
    /// Create a new backend handle from a connection string (e.g. `redis://127.0.0.1`).
    pub fn new<A: Into<String>>(conn_str: A) -> RResult<Self> {
        let conn_str = conn_str.into();

        let cfg = Config::from_url(&conn_str);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .change_context(BrokerError::Backend)?;

        let client = redis::Client::open(conn_str).change_context(BrokerError::Backend)?;

        Ok(Self { pool, client })
    }

    /// Get a pooled [`CommandConn`] for issuing `RPUSH`/`LPOP`/`LLEN`/`PUBLISH` commands.
    pub async fn command_conn(&self) -> RResult<CommandConn> {
        let conn = self
            .pool
            .get()
            .await
            .change_context(BrokerError::Backend)?;
        Ok(CommandConn::new(conn))
    }

    /// Open a dedicated, unpooled connection for subscribing to channels. Each
    /// worker/client-request/subscriber owns one of these exclusively for its lifetime.
    pub async fn subscriber_conn(&self) -> RResult<SubscriberConn> {
        SubscriberConn::new(&self.client).await
    }
}
