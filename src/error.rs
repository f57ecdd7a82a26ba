/*!
 * Error types for Convoy
 */

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, ConvoyError>;

#[derive(Debug)]
pub enum ConvoyError {
    /// Path does not live under the expected source root
    PathMismatch { path: String, root: String },

    /// Chunking limits are inconsistent (e.g. max size not above min size)
    InvalidLimits(String),

    /// Configuration error
    Config(String),

    /// Source root cannot be reached during pre-flight
    SourceUnreachable(String),

    /// Insufficient disk space at the destination
    InsufficientDiskSpace { required: u64, available: u64 },

    /// I/O error
    Io(io::Error),

    /// Copier subprocess failed to launch or stream
    Copier(String),

    /// Snapshot operation failed (creation, junction, release)
    Snapshot { message: String, retryable: bool },

    /// Insufficient privileges for a snapshot or path operation
    Permission(String),

    /// Cross-process lock could not be acquired within its timeout
    LockTimeout(String),

    /// Persisted state (checkpoint, tracking registry) is unreadable
    CorruptState(String),

    /// Operation cancelled by a stop request
    Cancelled,

    /// Completion notification could not be delivered
    Notify(String),

    /// Generic error with message
    Other(String),
}

impl ConvoyError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            ConvoyError::PathMismatch { .. } => true,
            ConvoyError::InvalidLimits(_) => true,
            ConvoyError::Config(_) => true,
            ConvoyError::SourceUnreachable(_) => true,
            ConvoyError::InsufficientDiskSpace { .. } => true,
            ConvoyError::Permission(_) => true,
            ConvoyError::Cancelled => true,

            ConvoyError::Io(_) => false,
            ConvoyError::Copier(_) => false,
            ConvoyError::Snapshot { .. } => false,
            ConvoyError::LockTimeout(_) => false,
            ConvoyError::CorruptState(_) => false,
            ConvoyError::Notify(_) => false,
            ConvoyError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            ConvoyError::Io(io_err) => Self::is_io_transient(io_err),
            ConvoyError::Copier(_) => true,
            ConvoyError::Snapshot { retryable, .. } => *retryable,
            ConvoyError::Notify(_) => true,

            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
        )
    }

    /// Get error category for logging and per-kind policy (retry, circuit breaker)
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConvoyError::PathMismatch { .. }
            | ConvoyError::InvalidLimits(_)
            | ConvoyError::Config(_) => ErrorCategory::InvalidInput,
            ConvoyError::SourceUnreachable(_) | ConvoyError::Permission(_) => {
                ErrorCategory::Permission
            }
            ConvoyError::InsufficientDiskSpace { .. } | ConvoyError::LockTimeout(_) => {
                ErrorCategory::Resource
            }
            ConvoyError::Io(_) | ConvoyError::Copier(_) | ConvoyError::Notify(_) => {
                ErrorCategory::Transient
            }
            ConvoyError::Snapshot { retryable, .. } => {
                if *retryable {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Resource
                }
            }
            ConvoyError::CorruptState(_) => ErrorCategory::CorruptState,
            ConvoyError::Cancelled => ErrorCategory::Cancelled,
            ConvoyError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category mirroring the per-kind handling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input; fail fast, no retry
    InvalidInput,
    /// Temporary failure; retry with backoff
    Transient,
    /// Insufficient privileges; profile fails, others continue
    Permission,
    /// Resource exhaustion; counts toward the circuit breaker
    Resource,
    /// Unreadable persisted artifact; drop it, warn, continue
    CorruptState,
    /// Stop requested; orderly shutdown, not an error for metrics
    Cancelled,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::InvalidInput => write!(f, "invalid-input"),
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::CorruptState => write!(f, "corrupt-state"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for ConvoyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvoyError::PathMismatch { path, root } => {
                write!(f, "Path {} is not under source root {}", path, root)
            }
            ConvoyError::InvalidLimits(msg) => {
                write!(f, "Invalid chunk limits: {}", msg)
            }
            ConvoyError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            ConvoyError::SourceUnreachable(path) => {
                write!(f, "Source unreachable: {}", path)
            }
            ConvoyError::InsufficientDiskSpace {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient disk space: {} bytes required, {} bytes available",
                    required, available
                )
            }
            ConvoyError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            ConvoyError::Copier(msg) => {
                write!(f, "Copier error: {}", msg)
            }
            ConvoyError::Snapshot { message, .. } => {
                write!(f, "Snapshot error: {}", message)
            }
            ConvoyError::Permission(msg) => {
                write!(f, "Permission denied: {}", msg)
            }
            ConvoyError::LockTimeout(msg) => {
                write!(f, "Lock timeout: {}", msg)
            }
            ConvoyError::CorruptState(msg) => {
                write!(f, "Corrupt state: {}", msg)
            }
            ConvoyError::Cancelled => {
                write!(f, "Operation cancelled")
            }
            ConvoyError::Notify(msg) => {
                write!(f, "Notification error: {}", msg)
            }
            ConvoyError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for ConvoyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvoyError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConvoyError {
    fn from(err: io::Error) -> Self {
        ConvoyError::Io(err)
    }
}

impl From<serde_json::Error> for ConvoyError {
    fn from(err: serde_json::Error) -> Self {
        ConvoyError::CorruptState(format!("JSON error: {}", err))
    }
}
