//! Wire codec: pure serialize/parse functions for every message shape the broker sends.
//!
//! No state, no I/O. Malformed input becomes a [`BrokerError::Decode`] - callers must log and
//! swallow it rather than propagate it; a decode failure is protocol damage, not a caller
//! error.

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// A request, as enqueued by a [`crate::Client`] and dequeued by a [`crate::Worker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMsg {
    /// Unique per-`request()`-call id. Also names the response channel the worker replies on.
    pub id: String,
    /// Arbitrary user payload.
    pub data: serde_json::Value,
}

/// A pub/sub message, as published by a [`crate::Publisher`] and received by every
/// [`crate::Subscriber`] listening on the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubMsg {
    /// Unique per-publish id, used only for logging/tracing - never for delivery logic.
    pub id: String,
    /// Arbitrary user payload.
    pub message: serde_json::Value,
}

/// The outcome of a worker's handler, as received and rehydrated on the client side.
#[derive(Debug, Clone)]
pub enum ResponseMsg {
    /// The handler returned successfully.
    Ok {
        /// The request id this is a response to.
        id: String,
        /// The handler's return value.
        response: serde_json::Value,
    },
    /// The handler raised; `error` is its normalized form.
    Err {
        /// The request id this is a response to.
        id: String,
        /// The normalized error.
        error: NormalizedError,
    },
}

/// A user error flattened to a plain record so it survives the wire.
///
/// Methods and any non-enumerable state on the original error are lost - documented behavior,
/// not a bug: a [`crate::worker::WorkerHandler`] can only return a [`HandlerError`], which is
/// already in this shape, so no information is lost converting one to the other.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NormalizedError {
    /// Human readable message.
    pub message: String,
    /// The error's "name", analogous to an exception class name.
    pub name: String,
    /// A stack trace, if the originating language captured one. Always `None` coming from a
    /// Rust handler - there's no userland equivalent to capture.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
    /// Any additional enumerable fields the handler attached.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for NormalizedError {}

/// A user error a [`crate::worker::WorkerHandler`] can return.
///
/// Normalized and transported back to the client as a `{ok:false}` response, then rehydrated
/// as a [`NormalizedError`] there (the client can't reconstruct the original Rust error type,
/// only this flattened record).
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    /// Analogous to an exception class name. Defaults to `"Error"`.
    pub name: String,
    /// Human readable message.
    pub message: String,
    /// Optional stack/context string, carried through verbatim if set.
    pub stack: Option<String>,
    /// Additional structured fields to transport alongside message/name.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HandlerError {
    /// A plain error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
            extra: Default::default(),
        }
    }

    /// Override the error's name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach an additional structured field, transported alongside message/name.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<&HandlerError> for NormalizedError {
    fn from(err: &HandlerError) -> Self {
        Self {
            message: err.message.clone(),
            name: err.name.clone(),
            stack: err.stack.clone(),
            extra: err.extra.clone(),
        }
    }
}

impl From<NormalizedError> for HandlerError {
    fn from(err: NormalizedError) -> Self {
        Self {
            name: err.name,
            message: err.message,
            stack: err.stack,
            extra: err.extra,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ResponseWire {
    id: String,
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<NormalizedError>,
}

/// Serialize a request for enqueueing.
pub fn compose_request(id: &str, data: serde_json::Value) -> String {
    serde_json::to_string(&RequestMsg {
        id: id.to_string(),
        data,
    })
    .expect("RequestMsg serializes infallibly")
}

/// Parse a request popped off the queue.
pub fn parse_request(bytes: &str) -> RResult<RequestMsg> {
    serde_json::from_str(bytes).change_context(BrokerError::Decode)
}

/// Serialize a successful response.
pub fn compose_response(id: &str, response: serde_json::Value) -> String {
    serde_json::to_string(&ResponseWire {
        id: id.to_string(),
        ok: true,
        response: Some(response),
        error: None,
    })
    .expect("ResponseWire serializes infallibly")
}

/// Serialize a failure response, normalizing `err` for transport.
pub fn compose_error(id: &str, err: &HandlerError) -> String {
    serde_json::to_string(&ResponseWire {
        id: id.to_string(),
        ok: false,
        response: None,
        error: Some(NormalizedError::from(err)),
    })
    .expect("ResponseWire serializes infallibly")
}

/// Parse a response received on a request's response channel, branching on `ok`.
pub fn parse_response(bytes: &str) -> RResult<ResponseMsg> {
    let wire: ResponseWire = serde_json::from_str(bytes).change_context(BrokerError::Decode)?;
    if wire.ok {
        let response = wire.response.ok_or_else(|| {
            error_stack::report!(BrokerError::Decode)
                .attach_printable("ok:true response missing its `response` field")
        })?;
        Ok(ResponseMsg::Ok {
            id: wire.id,
            response,
        })
    } else {
        let error = wire.error.ok_or_else(|| {
            error_stack::report!(BrokerError::Decode)
                .attach_printable("ok:false response missing its `error` field")
        })?;
        Ok(ResponseMsg::Err { id: wire.id, error })
    }
}

/// The payload published on a request-notification channel: carries no data, the subscribed
/// worker only needs to know "check the queue".
pub fn compose_notification() -> String {
    String::new()
}

/// Serialize a pub/sub message for publishing on a user channel.
pub fn compose_pub_sub_message(id: &str, message: serde_json::Value) -> String {
    serde_json::to_string(&PubSubMsg {
        id: id.to_string(),
        message,
    })
    .expect("PubSubMsg serializes infallibly")
}

/// Parse a pub/sub message received on a user channel.
pub fn parse_pub_sub_message(bytes: &str) -> RResult<PubSubMsg> {
    serde_json::from_str(bytes).change_context(BrokerError::Decode)
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn test_request_round_trip() {
        let bytes = compose_request("req-1", json!({"a": 1}));
        let parsed = parse_request(&bytes).unwrap();
        assert_eq!(parsed.id, "req-1");
        assert_eq!(parsed.data, json!({"a": 1}));
    }

    #[rstest]
    fn test_response_ok_round_trip() {
        let bytes = compose_response("req-1", json!(42));
        match parse_response(&bytes).unwrap() {
            ResponseMsg::Ok { id, response } => {
                assert_eq!(id, "req-1");
                assert_eq!(response, json!(42));
            }
            ResponseMsg::Err { .. } => panic!("expected Ok"),
        }
    }

    #[rstest]
    fn test_response_err_round_trip() {
        let err = HandlerError::new("boom").with_name("ValueError").with_extra(
            "code",
            json!(7),
        );
        let bytes = compose_error("req-1", &err);
        match parse_response(&bytes).unwrap() {
            ResponseMsg::Err { id, error } => {
                assert_eq!(id, "req-1");
                assert_eq!(error.message, "boom");
                assert_eq!(error.name, "ValueError");
                assert_eq!(error.extra.get("code"), Some(&json!(7)));
            }
            ResponseMsg::Ok { .. } => panic!("expected Err"),
        }
    }

    #[rstest]
    fn test_pub_sub_message_round_trip() {
        let bytes = compose_pub_sub_message("pub-1", json!("hello"));
        let parsed = parse_pub_sub_message(&bytes).unwrap();
        assert_eq!(parsed.id, "pub-1");
        assert_eq!(parsed.message, json!("hello"));
    }

    #[rstest]
    fn test_malformed_request_is_decode_error() {
        let err = parse_request("not json").unwrap_err();
        assert!(matches!(err.current_context(), BrokerError::Decode));
    }

    #[rstest]
    fn test_response_missing_required_field_is_decode_error() {
        // `ok:true` but no `response` field present.
        let err = parse_response(r#"{"id":"req-1","ok":true}"#).unwrap_err();
        assert!(matches!(err.current_context(), BrokerError::Decode));
    }

    #[rstest]
    fn test_unknown_top_level_field_is_ignored() {
        let bytes = r#"{"id":"req-1","data":1,"extra_unused":true}"#;
        let parsed = parse_request(bytes).unwrap();
        assert_eq!(parsed.id, "req-1");
    }
}
