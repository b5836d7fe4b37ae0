mod backend;
mod conn;
mod redis_retry;
mod standalone_redis;
mod subscriber_conn;

pub use backend::Backend;
pub use conn::CommandConn;
pub use standalone_redis::RedisStandalone;
pub use subscriber_conn::{PubSubMessage, SubscriberConn};

// Re-exporting so downstream crates don't need a direct dependency on either for type
// signatures that cross this module's boundary.
pub use deadpool_redis;
pub use redis;

// Redis server can't be run on windows.
#[cfg(not(target_os = "windows"))]
#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;
    use crate::testing::prelude::*;

    #[rstest]
    #[tokio::test]
    async fn test_subscribe_publish_roundtrip(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let backend = Backend::new(server.client_conn_str())?;

        let mut sub = backend.subscriber_conn().await?;
        sub.subscribe("foo").await?;

        let mut cmd = backend.command_conn().await?;
        // Give the subscribe a moment to land before publishing.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let received = cmd.publish("foo", "bar").await?;
        assert_eq!(received, 1);

        let msg = sub.recv().await.expect("should receive a message");
        assert_eq!(msg.channel, "foo");
        assert_eq!(msg.payload, "bar");

        Ok(())
    }

    #[rstest]
    #[tokio::test]
    async fn test_unsubscribe_stops_delivery(
        #[allow(unused_variables)] logging: (),
    ) -> RResult<()> {
        let server = RedisStandalone::new_no_persistence().await?;
        let backend = Backend::new(server.client_conn_str())?;

        let mut sub = backend.subscriber_conn().await?;
        sub.subscribe("foo").await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        sub.unsubscribe("foo").await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut cmd = backend.command_conn().await?;
        let received = cmd.publish("foo", "bar").await?;
        assert_eq!(received, 0);

        Ok(())
    }
}
