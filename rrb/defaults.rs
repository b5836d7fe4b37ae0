//! Process-wide option defaults.
//!
//! The *content* of configuration plumbing is out of scope for this crate (an external
//! collaborator, same as the underlying backend client itself) - this module is just the
//! seam: a small global registry every participant reads from once, at construction, so a
//! later [`Defaults::set`] never retroactively changes an already-built participant.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use chrono::TimeDelta;
use serde_json::Value;

use crate::log::{LogLevel, Logger};

/// Process-wide defaults, overridable per-participant via [`Options`].
#[derive(Debug, Clone)]
pub struct BrokerDefaults {
    /// Keyspace prefix applied to every generated key/channel name.
    pub prefix: String,
    /// Client request timeout.
    pub timeout: TimeDelta,
    /// Minimum recipients a [`crate::Publisher`] requires before `publish` resolves.
    pub minimum_recipients: u64,
    /// Mapping from logical level name (`"error"`, `"warning"`, `"notice"`, `"info"`,
    /// `"debug"`) to the opaque value [`crate::log::LogEvent::level_value`] carries for a
    /// caller-installed [`crate::log::Logger`] - identity strings by default, overridable for
    /// a sink that expects e.g. numeric syslog-style levels instead. Process-wide only (set
    /// via [`Defaults::set`], not [`Options`]) - the same footing as [`Defaults::set_logger`]:
    /// the logging sink's shape is a process-wide concern, not a per-participant one.
    pub levels: HashMap<String, Value>,
}

impl Default for BrokerDefaults {
    fn default() -> Self {
        Self {
            prefix: "rrb:".to_string(),
            timeout: TimeDelta::milliseconds(1000),
            minimum_recipients: 0,
            levels: default_levels(),
        }
    }
}

fn default_levels() -> HashMap<String, Value> {
    [
        LogLevel::Error,
        LogLevel::Warning,
        LogLevel::Notice,
        LogLevel::Info,
        LogLevel::Debug,
    ]
    .into_iter()
    .map(|level| (level.as_str().to_string(), Value::String(level.as_str().to_string())))
    .collect()
}

fn registry() -> &'static ArcSwap<BrokerDefaults> {
    static REGISTRY: OnceLock<ArcSwap<BrokerDefaults>> = OnceLock::new();
    REGISTRY.get_or_init(|| ArcSwap::from_pointee(BrokerDefaults::default()))
}

fn logger_registry() -> &'static ArcSwap<Option<Arc<dyn Logger>>> {
    static REGISTRY: OnceLock<ArcSwap<Option<Arc<dyn Logger>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| ArcSwap::from_pointee(None))
}

/// Per-participant option overrides, merged onto [`BrokerDefaults`] via [`Defaults::apply`].
///
/// Every field left `None` falls back to the process-wide default at the time the
/// participant is constructed.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Override the keyspace prefix.
    pub prefix: Option<String>,
    /// Override the client request timeout.
    pub timeout: Option<TimeDelta>,
    /// Override the publisher minimum-recipients requirement.
    pub minimum_recipients: Option<u64>,
}

/// The process-wide defaults registry.
pub struct Defaults;

impl Defaults {
    /// Overwrite the process-wide defaults. Only participants constructed afterwards observe
    /// it - an already-constructed [`crate::Worker`]/[`crate::Client`]/etc. read their prefix
    /// once and keep it for their whole lifetime.
    pub fn set(defaults: BrokerDefaults) {
        registry().store(Arc::new(defaults));
    }

    /// The current process-wide defaults.
    pub fn get() -> Arc<BrokerDefaults> {
        registry().load_full()
    }

    /// Merge a per-participant [`Options`] override on top of the current process-wide
    /// defaults.
    pub fn apply(options: &Options) -> BrokerDefaults {
        let base = Self::get();
        BrokerDefaults {
            prefix: options
                .prefix
                .clone()
                .unwrap_or_else(|| base.prefix.clone()),
            timeout: options.timeout.unwrap_or(base.timeout),
            minimum_recipients: options
                .minimum_recipients
                .unwrap_or(base.minimum_recipients),
            levels: base.levels.clone(),
        }
    }

    /// Overwrite just the logical-level-name -> opaque-value mapping, leaving the rest of the
    /// process-wide defaults untouched.
    pub fn set_levels(levels: HashMap<String, Value>) {
        let mut next = (*Self::get()).clone();
        next.levels = levels;
        Self::set(next);
    }

    /// Install (or clear) the external [`Logger`] sink invoked alongside `tracing` for every
    /// emitted event.
    pub fn set_logger(logger: Option<Arc<dyn Logger>>) {
        logger_registry().store(Arc::new(logger));
    }

    /// The currently installed external logger, if any.
    pub fn logger() -> Option<Arc<dyn Logger>> {
        logger_registry().load_full().as_ref().clone()
    }
}
