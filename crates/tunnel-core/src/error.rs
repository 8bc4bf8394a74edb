use thiserror::Error;

/// Errors produced by the tunnel protocol layer.
///
/// Variants line up with the error kinds in the design's error-handling
/// table: each names an effect, not a type, so callers can match on what
/// happened rather than where.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// A frame's length prefix didn't match its body, or the body wasn't
    /// valid JSON. Skip the frame and keep reading the stream.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A decoded envelope failed field validation (bad clientID length,
    /// unknown conn_type/operation literal).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Declared frame length exceeds the safety ceiling.
    #[error("frame of {0} bytes exceeds the {1} byte limit")]
    FrameTooLarge(u32, u32),

    /// TCP dial to a peer (server or local service) failed.
    #[error("dial failed: {0}")]
    DialFailed(String),

    /// Binding a forward listener's public port failed.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// A clientID/serverID/forwardID lookup came up empty.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type TunnelResult<T> = Result<T, TunnelError>;
