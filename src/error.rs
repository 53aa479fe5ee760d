use std::fmt;

/// Result type for emergent-selfish operations
pub type Result<T> = std::result::Result<T, SelfishError>;

/// Main error type for the signalling-game library
#[derive(Debug, Clone)]
pub enum SelfishError {
    /// Invalid dimensions for operations
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Empty buffer or container
    EmptyBuffer(String),

    /// A training-loop invariant was broken (ordering, lengths, lifecycle)
    InvariantViolation(String),

    /// A per-run log file could not be read or parsed
    MalformedLog {
        path: String,
        reason: String,
    },

    /// Results root or experiment directories are missing
    MissingResults(String),
}

impl fmt::Display for SelfishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfishError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            SelfishError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            SelfishError::IoError(msg) => write!(f, "IO error: {}", msg),
            SelfishError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            SelfishError::EmptyBuffer(msg) => write!(f, "Empty buffer: {}", msg),
            SelfishError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            SelfishError::MalformedLog { path, reason } => {
                write!(f, "cant read json {}: {}", path, reason)
            }
            SelfishError::MissingResults(msg) => write!(f, "Missing results: {}", msg),
        }
    }
}

impl std::error::Error for SelfishError {}

impl From<std::io::Error> for SelfishError {
    fn from(err: std::io::Error) -> Self {
        SelfishError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for SelfishError {
    fn from(err: bincode::Error) -> Self {
        SelfishError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for SelfishError {
    fn from(err: serde_json::Error) -> Self {
        SelfishError::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for SelfishError {
    fn from(err: csv::Error) -> Self {
        SelfishError::IoError(err.to_string())
    }
}

// Helper functions for common error patterns
impl SelfishError {
    pub fn dimension_mismatch<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        SelfishError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        SelfishError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        SelfishError::InvariantViolation(msg.into())
    }
}
