//! Error types for the transport and the client.
//!
//! The taxonomy follows the layers: [`FrameError`] is what the codec can
//! report about a single frame, [`CallFailure`] is why one call did not
//! produce a result, and [`ClientError`] is what the public client surface
//! returns.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::message::{RequestId, ResponseError};

/// A frame on the protocol stream could not be read.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value `{0}`")]
    InvalidContentLength(String),

    #[error("Content-Length {length} exceeds maximum {max}")]
    Oversized { length: usize, max: usize },

    #[error("stream closed inside frame headers")]
    TruncatedHeaders,

    #[error("stream closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },

    #[error("malformed JSON-RPC body ({} bytes): {source}", raw.len())]
    Parse {
        source: serde_json::Error,
        raw: Vec<u8>,
    },

    #[error("body is not a JSON-RPC message: {reason}")]
    NotAMessage { reason: &'static str, raw: Vec<u8> },

    #[error("i/o error on protocol stream: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Header or length problems: the frame boundary itself was wrong.
    #[must_use]
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::MissingContentLength
                | Self::InvalidContentLength(_)
                | Self::Oversized { .. }
                | Self::TruncatedHeaders
                | Self::TruncatedBody { .. }
        )
    }

    /// The frame was intact but its body was not a usable JSON-RPC message.
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::NotAMessage { .. })
    }

    /// Whether the stream can no longer be read after this error.
    #[must_use]
    pub fn ends_stream(&self) -> bool {
        matches!(
            self,
            Self::TruncatedHeaders | Self::TruncatedBody { .. } | Self::Io(_)
        )
    }

    /// Raw body bytes, kept for diagnostics when the body failed to parse.
    #[must_use]
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Self::Parse { raw, .. } | Self::NotAMessage { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Why a call did not produce a result.
///
/// Cloneable so a single stream fault can be delivered to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallFailure {
    #[error("{0}")]
    Frame(Arc<FrameError>),

    #[error("transport closed before a response arrived")]
    TransportClosed,

    #[error("server returned error {}: {}", .0.code, .0.message)]
    Remote(ResponseError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("writing to server failed: {0}")]
    Io(Arc<io::Error>),
}

impl CallFailure {
    pub(crate) fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof => Self::TransportClosed,
            _ => Self::Io(Arc::new(err)),
        }
    }
}

/// A failed call, with the method and identifier that were attempted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{method} (id {id}) failed: {cause}")]
pub struct CallError {
    method: String,
    id: RequestId,
    cause: CallFailure,
}

impl CallError {
    pub(crate) fn new(method: &str, id: RequestId, cause: CallFailure) -> Self {
        Self {
            method: method.to_string(),
            id,
            cause,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    #[must_use]
    pub fn cause(&self) -> &CallFailure {
        &self.cause
    }

    /// The server's error object, when the call failed with a well-formed
    /// error response.
    #[must_use]
    pub fn remote(&self) -> Option<&ResponseError> {
        match &self.cause {
            CallFailure::Remote(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_transport_closed(&self) -> bool {
        matches!(self.cause, CallFailure::TransportClosed)
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, CallFailure::Timeout(_))
    }

    #[must_use]
    pub fn is_framing(&self) -> bool {
        matches!(&self.cause, CallFailure::Frame(e) if e.is_framing())
    }

    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(&self.cause, CallFailure::Frame(e) if e.is_parse())
    }
}

/// Errors surfaced by [`crate::LspClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{command} not found in PATH")]
    CommandNotFound {
        command: String,
        source: which::Error,
    },

    #[error("spawning {command}: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("no {0} pipe on spawned server")]
    MissingPipe(&'static str),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("sending {method} failed: {cause}")]
    Notify { method: String, cause: CallFailure },

    #[error("unexpected {method} result: {source}")]
    UnexpectedResult {
        method: &'static str,
        source: serde_json::Error,
    },

    #[error("waiting for server exit: {0}")]
    Wait(io::Error),
}

impl ClientError {
    /// The underlying call failure, when this error came from a request.
    #[must_use]
    pub fn call(&self) -> Option<&CallError> {
        match self {
            Self::Call(err) => Some(err),
            _ => None,
        }
    }
}
