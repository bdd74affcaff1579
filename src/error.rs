use crate::protocol::DecodeError;

/// An error while applying or extracting player forwarding.
///
/// Decode-stage failures wrap [`DecodeError`]; the remaining variants are
/// produced by the strategy and dispatcher layers. None of them is
/// retriable: the connection is terminated and the player must reconnect,
/// which restarts the state machine from the handshake.
#[derive(Debug, thiserror::Error)]
pub enum ForwardingError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Fatal at startup, never per-connection.
    #[error("forwarding type '{0}' requires a non-empty secret")]
    MissingSecret(&'static str),
    #[error("forwarded payload signature does not match")]
    SignatureMismatch,
    #[error("forwarded payload is {age_ms}ms old, outside the {window_ms}ms freshness window")]
    StalePayload { age_ms: i64, window_ms: i64 },
    #[error("timed out waiting for the forwarding exchange to complete")]
    ForwardingTimeout,
    #[error("plugin message on unexpected channel '{0}'")]
    UnexpectedChannel(String),
    #[error("malformed profile property list: {0}")]
    MalformedProperties(#[from] serde_json::Error),
    #[error("malformed player uuid")]
    MalformedUuid,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = ForwardingError> = std::result::Result<T, E>;
