//! Server error type.

/// Errors produced by the connection and session machinery.
///
/// Protocol-level rejections (a 413, a WebSocket close code) are not
/// errors: they travel through the response writer or as close frames.
/// This type covers the failures that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A deadline elapsed with no socket progress.
    #[error("operation timed out")]
    Timeout,

    #[error("malformed request: {0}")]
    BadRequest(&'static str),

    #[error("websocket protocol violation: {0}")]
    WsProtocol(&'static str),

    /// A frame announced a payload over the inbound limit.
    #[error("websocket frame of {0} bytes exceeds the inbound limit")]
    WsTooBig(u64),

    /// A send attempted on a session that already closed.
    #[error("websocket session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
