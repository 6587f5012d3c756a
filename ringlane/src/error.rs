//! Error types and handling for the Ringlane library

use thiserror::Error;

/// Result type alias for Ringlane operations
pub type Result<T> = std::result::Result<T, RinglaneError>;

/// Error type returned by event handlers.
///
/// Handlers are business logic supplied by the caller, so any error type
/// that can cross threads is accepted.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the Ringlane library
#[derive(Error, Debug)]
pub enum RinglaneError {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A handler failed and the exception handler escalated the failure
    #[error("Handler fault at sequence {sequence}: {source}")]
    HandlerFault {
        /// Sequence of the event being handled when the fault occurred
        sequence: i64,
        /// The error returned by the handler
        #[source]
        source: HandlerError,
    },

    /// `run` was called while a previous run of the same processor is still active
    #[error("Event processor is already running")]
    AlreadyRunning,

    /// A single-producer ring was asked for a claim while another was still
    /// uncommitted
    #[error("Another claim is still outstanding on a single-producer ring")]
    ClaimInProgress,

    /// Timeout errors
    #[error("Operation timed out")]
    Timeout,

    /// CPU affinity errors
    #[cfg(target_os = "linux")]
    #[error("CPU affinity error: {0}")]
    CpuAffinity(#[from] nix::Error),

    /// System resource errors
    #[error("System resource error: {message}")]
    SystemResource {
        /// Error message describing the system resource issue
        message: String,
    },

    /// Generic error for unexpected conditions, such as a processor thread
    /// that panicked instead of returning.
    #[error("Unexpected error: {message}")]
    Unexpected {
        /// Error message describing the unexpected condition
        message: String,
    },
}

impl RinglaneError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wrap a handler error raised while processing `sequence`
    pub fn handler_fault(sequence: i64, source: HandlerError) -> Self {
        Self::HandlerFault { sequence, source }
    }

    /// Create a new system resource error
    pub fn system_resource(message: impl Into<String>) -> Self {
        Self::SystemResource {
            message: message.into(),
        }
    }

    /// Create a new unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable
    ///
    /// A timed-out wait can simply be retried, and so can a claim once the
    /// outstanding one commits; everything else means the caller's
    /// configuration or a processor is broken.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ClaimInProgress)
    }

    /// Check if this error came out of a handler
    pub fn is_handler_fault(&self) -> bool {
        matches!(self, Self::HandlerFault { .. })
    }
}

/// Build a [`RinglaneError::InvalidConfig`] from a format string
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::RinglaneError::config(format!($($arg)*))
    };
}
