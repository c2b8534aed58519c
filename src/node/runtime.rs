//! Node runtime contract
//!
//! The launcher talks to the node only through [`NodeRuntime`]. The production
//! implementation is [`super::native::NativeRuntime`], which forwards every call
//! into the dynamically loaded LND library.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

use super::config::ConfigBlob;
use super::subscription::{BidiStream, Subscription};

/// Entry point that boots the node
pub const START: &str = "start";

/// Unary status query
pub const GET_INFO: &str = "getInfo";

/// Server stream of node state transitions
pub const SUBSCRIBE_STATE: &str = "subscribeState";

/// Bidirectional stream that lets the launcher answer incoming channel requests
pub const CHANNEL_ACCEPTOR: &str = "channelAcceptor";

/// Writes one message into an open bidirectional stream
pub const SEND_STREAM: &str = "SendStreamC";

/// Closes a bidirectional stream on the node side
pub const STOP_STREAM: &str = "StopStreamC";

/// Errors reported by the node runtime or the binding around it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to load node library {path}: {reason}")]
    LibraryLoad { path: String, reason: String },

    #[error("node library does not export {0}")]
    SymbolNotFound(String),

    #[error("invalid argument for {method}: {reason}")]
    InvalidArgument { method: String, reason: String },

    /// Error text passed through from the node itself
    #[error("{0}")]
    Runtime(String),

    #[error("{method} did not answer within {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("{0} callback was dropped without an answer")]
    Dropped(String),

    #[error("{0} stream is not active")]
    Closed(String),

    #[error("{0}")]
    Unsupported(String),
}

/// Opaque bytes returned by the node (a serialized protobuf message)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Base64 text of the payload, the form the node's other bindings hand out
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{} ({} bytes)", self.to_base64(), self.0.len())
        }
    }
}

/// Decode a selector into the request bytes handed to the node.
///
/// Selectors are base64 text of a serialized request message. The empty
/// selector is the empty request.
pub fn decode_selector(method: &str, selector: &str) -> Result<Vec<u8>, RuntimeError> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    STANDARD
        .decode(trimmed)
        .map_err(|e| RuntimeError::InvalidArgument {
            method: method.to_string(),
            reason: format!("selector is not valid base64: {}", e),
        })
}

/// The control surface of the embedded node
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    /// Boot the node with the given configuration.
    ///
    /// Resolves once the node reports that startup succeeded or failed. The
    /// node keeps running in the background afterwards.
    async fn start(&self, config: &ConfigBlob) -> Result<Payload, RuntimeError>;

    /// Call a unary method with serialized request bytes
    async fn call(&self, method: &str, request: &[u8]) -> Result<Payload, RuntimeError>;

    /// Open a server stream. Updates flow into the returned [`Subscription`].
    fn subscribe(&self, method: &str, request: &[u8]) -> Result<Subscription, RuntimeError>;

    /// Open a bidirectional stream. Cancelling its handle closes the stream
    /// on the node side as well.
    fn open_bidi_stream(&self, method: &str) -> Result<BidiStream, RuntimeError>;
}
