//! Logging for the broker's components.
//!
//! Emission itself goes through `tracing`, same as the rest of the crate. This module adds
//! a thin `Logger` interface on top, so a caller that wants the exact
//! `(level, message, time, component, instance, scope)` shape can still plug one in without
//! needing to configure a `tracing` subscriber themselves.
//!
//! Every logged event in this crate - decode failures, backend failures, handler failures, the
//! "no active worker" notice, a lost `LPOP` claim race - goes through [`emit`] via one of the
//! `log_*` helpers below, so a caller-installed [`crate::defaults::Defaults::set_logger`] sink
//! observes all of them, not just a subset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a logged event. Matches spec.md §6's five logical level names
/// (`error|warning|notice|info|debug`) exactly, so [`crate::defaults::Options::levels`] can
/// remap each one to whatever opaque value a caller's own logging library expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Fine-grained diagnostic detail, e.g. a lost `LPOP` claim race.
    Debug,
    /// Informational, non-actionable detail.
    Info,
    /// Worth surfacing but not a problem by itself, e.g. publishing with no active worker.
    Notice,
    /// Notable but non-fatal, e.g. a backend hiccup that's about to be retried.
    Warning,
    /// Something that broke a request or caused a participant to stop.
    Error,
}

impl LogLevel {
    /// The logical level name spec.md §6's `levels` option maps, identity by default.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A single structured log event, in the shape external logging interfaces expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Severity of the event.
    pub level: LogLevel,
    /// The opaque value `level` resolves to under the process-wide
    /// [`crate::defaults::Options::levels`] mapping - identity strings (`"error"`, `"warning"`,
    /// ...) unless a caller has overridden them.
    pub level_value: serde_json::Value,
    /// Human readable message.
    pub message: String,
    /// When the event happened.
    pub time: DateTime<Utc>,
    /// Which component logged it: `"worker"`, `"client"`, `"publisher"`, `"subscriber"`.
    pub component: &'static str,
    /// The identifier of the specific worker/client/publisher/subscriber instance.
    pub instance: String,
    /// The queue/channel scope the event relates to, if any.
    pub scope: Option<String>,
}

/// Something that wants to receive every [`LogEvent`] emitted by the broker, in addition to
/// whatever `tracing` subscriber is installed process-wide.
pub trait Logger: Send + Sync {
    /// Handle a single log event.
    fn log(&self, event: LogEvent);
}

impl<F: Fn(LogEvent) + Send + Sync> Logger for F {
    fn log(&self, event: LogEvent) {
        self(event)
    }
}

fn emit(level: LogLevel, component: &'static str, instance: &str, scope: Option<&str>, message: String) {
    match level {
        LogLevel::Debug => {
            tracing::debug!(component, instance, scope, "{}", message);
        }
        LogLevel::Info => {
            tracing::info!(component, instance, scope, "{}", message);
        }
        LogLevel::Notice => {
            tracing::info!(component, instance, scope, notice = true, "{}", message);
        }
        LogLevel::Warning => {
            tracing::warn!(component, instance, scope, "{}", message);
        }
        LogLevel::Error => {
            tracing::error!(component, instance, scope, "{}", message);
        }
    }

    if let Some(logger) = crate::defaults::Defaults::logger() {
        let level_value = crate::defaults::Defaults::get()
            .levels
            .get(level.as_str())
            .cloned()
            .unwrap_or_else(|| serde_json::Value::String(level.as_str().to_string()));
        logger.log(LogEvent {
            level,
            level_value,
            message,
            time: Utc::now(),
            component,
            instance: instance.to_string(),
            scope: scope.map(|s| s.to_string()),
        });
    }
}

/// Log that a message pulled off the backend couldn't be decoded, per the swallow-and-log
/// contract codec failures have: they never propagate to a caller.
pub fn log_decode_failure(component: &'static str, instance: &str, scope: &str, reason: &str) {
    emit(
        LogLevel::Warning,
        component,
        instance,
        Some(scope),
        format!("failed to decode message: {}", reason),
    );
}

/// Log a backend command failure (`RPUSH`/`LPOP`/`PUBLISH`/etc. returning an error after
/// retries are exhausted, or a response that couldn't be published). Always `warning` - these
/// are the failures spec.md's worker/client failure semantics call out explicitly, as opposed
/// to the benign "lost the claim race" `LPOP` miss, which is logged at `debug` via
/// [`log_debug`].
pub fn log_backend_failure(component: &'static str, instance: &str, scope: Option<&str>, reason: &str) {
    emit(
        LogLevel::Warning,
        component,
        instance,
        scope,
        format!("backend command failed: {}", reason),
    );
}

/// Log a user handler raising. Never propagated - a [`crate::subscriber::Subscriber`]'s
/// handler failures have nowhere else to go (unlike a [`crate::worker::Worker`]'s, which are
/// serialized into the error response instead).
pub fn log_handler_failure(component: &'static str, instance: &str, scope: &str, reason: &str) {
    emit(
        LogLevel::Warning,
        component,
        instance,
        Some(scope),
        format!("handler failed: {}", reason),
    );
}

/// Log a `notice`-level event: spec.md §4.4 step 7's "no active worker" when a request's
/// wakeup notification reaches zero subscribed workers.
pub fn log_notice(component: &'static str, instance: &str, scope: &str, message: &str) {
    emit(LogLevel::Notice, component, instance, Some(scope), message.to_string());
}

/// Log a `debug`-level event: spec.md §4.3's "another worker won the race" when an `LPOP`
/// comes back empty after a notification or queue-check.
pub fn log_debug(component: &'static str, instance: &str, scope: &str, message: &str) {
    emit(LogLevel::Debug, component, instance, Some(scope), message.to_string());
}
