#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]
#![warn(clippy::disallowed_types)]
#![warn(missing_docs)]

//! A distributed request broker and pub/sub library layered on a Redis-like keyspace.
//!
//! Two interaction patterns share one backend:
//! - Request/response RPC: a [`Client`] issues a request on a named queue; exactly one
//!   [`Worker`] listening on that queue handles it and returns a response.
//! - Fan-out pub/sub: a [`Publisher`] emits a message on a named channel; every currently
//!   listening [`Subscriber`] receives it.
//!
//! The hard part is the coordination protocol that turns the backend's list/pub-sub commands
//! into a correct, race-free work-dispatch and fan-out medium - see [`worker`] for the
//! claim-and-dispatch state machine and [`client`] for the request lifecycle.

// When docs auto created for docs.rs, will include features, given docs.rs uses nightly by default:
#![cfg_attr(all(doc, CHANNEL_NIGHTLY), feature(doc_auto_cfg))]

mod prelude;

/// Request/response client.
pub mod client;
/// Wire message encode/decode.
pub mod codec;
/// Process-wide option defaults.
pub mod defaults;
/// Error handling types.
pub mod errors;
/// Deterministic key/channel naming.
pub mod keys;
/// Logging interface.
pub mod log;
/// Completely miscellaneous utilities (retry, timeout, sleep).
pub mod misc;
/// Fan-out publisher.
pub mod publisher;
/// Backend connection plumbing.
pub mod redis;
/// Fan-out subscriber.
pub mod subscriber;
/// Client-local tracking of in-flight requests.
pub mod tracker;
/// Request/response worker.
pub mod worker;

pub use client::Client;
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use worker::Worker;

#[cfg(test)]
mod testing;
