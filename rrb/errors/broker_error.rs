use error_stack::Context;

use crate::codec::NormalizedError;

/// The error context used throughout the broker for every fallible operation.
///
/// Mirrors the error surface a request/pub-sub broker needs to expose to callers: everything
/// that can go wrong talking to the backend, waiting on a response, or running a handler.
#[derive(Debug)]
pub enum BrokerError {
    /// A client request was not answered within its configured timeout.
    Timeout,
    /// An operation was attempted on a participant that hasn't called `connect()` yet.
    NotConnected,
    /// An operation was attempted on a participant that is draining or has already stopped.
    ShuttingDown,
    /// `connect()` was called twice on the same participant.
    AlreadyConnected,
    /// `listen()` was called twice on the same worker/subscriber.
    AlreadyListening,
    /// A publish required a minimum number of recipients that wasn't met.
    InsufficientRecipients {
        /// How many recipients actually received the message.
        got: u64,
        /// How many were required.
        required: u64,
    },
    /// A message pulled off the backend couldn't be decoded as a known wire shape.
    Decode,
    /// Subscribing to (or unsubscribing from) a backend channel failed.
    Listen,
    /// The backend (redis-like keyspace) itself returned an error or is unreachable.
    Backend,
    /// A request handler returned an error, which has been normalized for transport back
    /// to the caller.
    Handler(NormalizedError),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out waiting for a response"),
            Self::NotConnected => write!(f, "not connected"),
            Self::ShuttingDown => write!(f, "shutting down"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::AlreadyListening => write!(f, "already listening"),
            Self::InsufficientRecipients { got, required } => write!(
                f,
                "publish reached {} recipient(s), {} required",
                got, required
            ),
            Self::Decode => write!(f, "failed to decode a backend message"),
            Self::Listen => write!(f, "failed to subscribe to a backend channel"),
            Self::Backend => write!(f, "backend command failed"),
            Self::Handler(err) => write!(f, "handler failed: {}", err.message),
        }
    }
}

impl Context for BrokerError {}
