//! Deterministic naming of queues, channels and response channels under a configured prefix.

/// Builds every backend key/channel name this crate uses, for one configured prefix.
///
/// Participants read the prefix once at construction (from [`crate::defaults::Defaults`] or
/// an explicit [`crate::defaults::Options`] override) and build a `Keys` from it - prefix
/// changes afterwards never retroactively affect already-constructed participants.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    /// Build a key set for the given prefix (e.g. `"rrb:"`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The request queue list for `queue_name`.
    pub fn queue(&self, queue_name: &str) -> String {
        format!("{}q:{}", self.prefix, queue_name)
    }

    /// The request-notification pub/sub channel for `queue_name`.
    pub fn notification_channel(&self, queue_name: &str) -> String {
        format!("{}n:{}", self.prefix, queue_name)
    }

    /// The response pub/sub channel for a single request id.
    pub fn response_channel(&self, request_id: &str) -> String {
        format!("{}r:{}", self.prefix, request_id)
    }

    /// The user-facing pub/sub channel for `channel_name`.
    pub fn channel(&self, channel_name: &str) -> String {
        format!("{}c:{}", self.prefix, channel_name)
    }
}
