use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Why an inbound frame was discarded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame has no `type` discriminant")]
    MissingType,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of a rejected `send_message` call. Never fatal; the caller decides
/// whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected to the session server")]
    NotConnected,

    #[error("client has shut down")]
    Closed,

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transport-level failures. All of these are recovered by the reconnect
/// loop; they only surface in logs and as `ConnectionState::Disconnected`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("session server is unavailable")]
    Unavailable,

    #[error("invalid origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error(transparent)]
    Transport(#[from] tungstenite::Error),
}

impl ClientError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Transport(err)
        }
    }
}
