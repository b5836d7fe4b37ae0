use crate::log::log_backend_failure;
use crate::prelude::*;

use super::redis_retry::redis_retry_config;

/// A pooled connection used for issuing plain commands against the backend keyspace:
/// `RPUSH`, `LPOP`, `LLEN` and `PUBLISH` used purely to notify (not to subscribe).
///
/// Transient errors (`BUSYLOADING`, `TRYAGAIN`, `MASTERDOWN`) are retried internally with
/// [`redis_retry_config`]; anything still failing after that surfaces as
/// [`BrokerError::Backend`].
pub struct CommandConn {
    conn: deadpool_redis::Connection,
}

impl CommandConn {
    pub(crate) fn new(conn: deadpool_redis::Connection) -> Self {
        Self { conn }
    }

    /// `PING` the backend, returning true if it responded.
    pub async fn ping(&mut self) -> bool {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await
            .is_ok()
    }

    /// `RPUSH value onto key`.
    pub async fn rpush(&mut self, key: &str, value: &str) -> RResult<()> {
        let retry = redis_retry_config();
        let conn = &mut self.conn;
        let result = crate::retry_flexi!(retry, {
            redis::cmd("RPUSH")
                .arg(key)
                .arg(value)
                .query_async::<i64>(conn)
                .await
        });
        result.map(|_| ()).map_err(|e| on_backend_err("RPUSH", key, e))
    }

    /// `LPOP key`, returning `None` if the list was empty.
    pub async fn lpop(&mut self, key: &str) -> RResult<Option<String>> {
        let retry = redis_retry_config();
        let conn = &mut self.conn;
        let result = crate::retry_flexi!(retry, {
            redis::cmd("LPOP")
                .arg(key)
                .query_async::<Option<String>>(conn)
                .await
        });
        result.map_err(|e| on_backend_err("LPOP", key, e))
    }

    /// `LLEN key`.
    pub async fn llen(&mut self, key: &str) -> RResult<u64> {
        let retry = redis_retry_config();
        let conn = &mut self.conn;
        let result = crate::retry_flexi!(retry, {
            redis::cmd("LLEN").arg(key).query_async::<u64>(conn).await
        });
        result.map_err(|e| on_backend_err("LLEN", key, e))
    }

    /// `PUBLISH channel message`, returning the number of clients that received it.
    /// This is the authoritative recipient count used to enforce `minimumRecipients`.
    pub async fn publish(&mut self, channel: &str, message: &str) -> RResult<u64> {
        let retry = redis_retry_config();
        let conn = &mut self.conn;
        let result = crate::retry_flexi!(retry, {
            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(message)
                .query_async::<u64>(conn)
                .await
        });
        result.map_err(|e| on_backend_err("PUBLISH", channel, e))
    }

    /// Close the connection gracefully with `QUIT` before it's dropped. Per spec.md §5's
    /// "graceful close first, forced close as the fallback": if `QUIT` itself fails, this just
    /// logs it and falls through to the forced close a plain drop gives us (spec.md §6's
    /// `END`) - the pool recycles a connection it can no longer use the next time it's
    /// checked out.
    pub async fn close(mut self) {
        let _ = redis::cmd("QUIT")
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(|e| on_backend_err("QUIT", "command-conn", e));
    }
}

fn on_backend_err(action: &str, scope: &str, e: redis::RedisError) -> error_stack::Report<BrokerError> {
    log_backend_failure("backend", action, Some(scope), &format!("{:?}", e));
    error_stack::report!(BrokerError::Backend).attach_printable(format!("{:?}", e))
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;
    use crate::redis::Backend;
    use crate::testing::prelude::*;

    #[rstest]
    #[tokio::test]
    async fn test_rpush_lpop_llen(#[allow(unused_variables)] logging: ()) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let backend = Backend::new(server.client_conn_str())?;
        let mut conn = backend.command_conn().await?;

        assert!(conn.ping().await);
        assert_eq!(conn.llen("mylist").await?, 0);
        assert_eq!(conn.lpop("mylist").await?, None);

        conn.rpush("mylist", "a").await?;
        conn.rpush("mylist", "b").await?;
        assert_eq!(conn.llen("mylist").await?, 2);
        assert_eq!(conn.lpop("mylist").await?, Some("a".to_string()));
        assert_eq!(conn.lpop("mylist").await?, Some("b".to_string()));
        assert_eq!(conn.lpop("mylist").await?, None);

        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_publish_recipient_count(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let backend = Backend::new(server.client_conn_str())?;
        let mut conn = backend.command_conn().await?;

        // No subscribers yet:
        assert_eq!(conn.publish("some-channel", "hi").await?, 0);

        Ok(())
    }
}
