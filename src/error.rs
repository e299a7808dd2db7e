use std::io;
use thiserror::Error;

/// Convenient type alias for `Result<T, MuxError>`.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Error types for the muxio library.
///
/// `MuxError` covers everything from transport failures to peer protocol
/// violations. Transport failures and malformed frames are fatal to the
/// session; channel-level conditions are not.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("end of stream")]
    EndOfStream,

    #[error("session closed")]
    SessionClosed,

    #[error("invalid channel id: {0}")]
    InvalidChannel(u32),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MuxError {
    /// True if this error terminates the whole session rather than a single
    /// channel or call.
    pub fn is_fatal(&self) -> bool {
        match self {
            MuxError::Transport(_) | MuxError::MalformedFrame(_) => true,
            MuxError::EndOfStream
            | MuxError::SessionClosed
            | MuxError::InvalidChannel(_)
            | MuxError::Config(_) => false,
        }
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Transport(e) => e,
            MuxError::EndOfStream => io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"),
            MuxError::SessionClosed => io::Error::new(io::ErrorKind::BrokenPipe, "session closed"),
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
