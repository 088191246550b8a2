use std::fmt;
use std::io;

#[derive(Debug)]
pub enum IdsError {
    UsageError(String),
    PermissionError(String),
    ModelLoadError(String),
    ParseError(String),
    SchemaError(String),
    TransformError(String),
    BufferOverflow(String),
    QueueError(String),
    IoError(String),
}

impl IdsError {
    /// Errors scoped to a single packet; the loop answers them with the fail policy.
    pub fn is_per_packet(&self) -> bool {
        matches!(
            self,
            IdsError::ParseError(_) | IdsError::SchemaError(_) | IdsError::TransformError(_)
        )
    }

    /// Queue conditions the loop absorbs and keeps receiving after.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IdsError::BufferOverflow(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            IdsError::UsageError(_) => 2,
            _ => 1,
        }
    }

    /// Maps a failure to open or bind the queue, keeping privilege problems distinct.
    pub fn from_bind_error(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied
            || err.raw_os_error() == Some(libc::EPERM)
        {
            IdsError::PermissionError(err.to_string())
        } else {
            IdsError::QueueError(err.to_string())
        }
    }
}

impl fmt::Display for IdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdsError::UsageError(msg) => write!(f, "Usage error: {}", msg),
            IdsError::PermissionError(msg) => write!(
                f,
                "Access denied ({}); do I have root rights or CAP_NET_ADMIN?",
                msg
            ),
            IdsError::ModelLoadError(msg) => write!(f, "Model load error: {}", msg),
            IdsError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            IdsError::SchemaError(msg) => write!(f, "Schema error: {}", msg),
            IdsError::TransformError(msg) => write!(f, "Transform error: {}", msg),
            IdsError::BufferOverflow(msg) => write!(f, "Buffer overflow: {}", msg),
            IdsError::QueueError(msg) => write!(f, "Queue error: {}", msg),
            IdsError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for IdsError {}

impl From<io::Error> for IdsError {
    fn from(err: io::Error) -> Self {
        IdsError::IoError(err.to_string())
    }
}

impl From<csv::Error> for IdsError {
    fn from(err: csv::Error) -> Self {
        IdsError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IdsError {
    fn from(err: serde_json::Error) -> Self {
        IdsError::ModelLoadError(err.to_string())
    }
}

impl From<ctrlc::Error> for IdsError {
    fn from(err: ctrlc::Error) -> Self {
        IdsError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IdsError>;
