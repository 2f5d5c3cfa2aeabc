//! Error types for notify-chain.
//!
//! Misuse of the API (duplicate bindings, malformed accessors, missing
//! arguments) is reported as a `WhenError` at call time. Data problems met
//! while walking a chain are soft and come back as a `ChainResolutionFailure`.
//! Faults raised by upstream sources are carried as `SourceFault`, stored on
//! the field or cell that owns the source and re-raised on the next read.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A fault produced by an upstream stream or factory.
///
/// Cheap to clone; the same fault is stored on the owning field or cell and
/// delivered to every observer.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SourceFault {
    message: Arc<str>,
}

impl SourceFault {
    /// Creates a fault with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Wraps any displayable error.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string())
    }

    /// The fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl PartialEq for SourceFault {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

/// Why a chain walk stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// A hop produced no value.
    Undefined,
    /// A scalar was reached with names left to consume.
    NotTraversable,
    /// Reading a hop (a bound field or a cell) raised a fault.
    Fault(SourceFault),
}

/// Soft failure from synchronous chain resolution.
///
/// Resolution never panics or returns a `WhenError` for data problems; the
/// walk stops and reports where it gave up.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("chain '{chain}' could not be resolved at '{hop}': {reason}")]
pub struct ChainResolutionFailure {
    /// Full dotted chain that was being resolved.
    pub chain: String,
    /// The name whose lookup failed.
    pub hop: String,
    /// What went wrong.
    pub reason: FailureReason,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("value is undefined"),
            Self::NotTraversable => f.write_str("value is not an object"),
            Self::Fault(fault) => write!(f, "source fault: {fault}"),
        }
    }
}

/// Top-level error type for notify-chain.
#[allow(missing_docs)]
#[derive(Debug, Clone, Error)]
pub enum WhenError {
    #[error("Field '{field}' on {type_name} is already bound to a source")]
    DuplicateBinding {
        type_name: String,
        field: String,
    },

    #[error("Invalid accessor '{accessor}': {reason}")]
    InvalidAccessorSyntax {
        accessor: String,
        reason: String,
    },

    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        reason: String,
    },

    #[error("Cannot set '{field}' on {type_name}: bound properties are read-only")]
    ReadOnlyField {
        type_name: String,
        field: String,
    },

    #[error("Source fault: {0}")]
    Source(#[from] SourceFault),

    #[error("Stream closed: {path}")]
    StreamClosed {
        path: String,
    },

    #[error("Timed out after {duration_ms}ms waiting on {path}")]
    Timeout {
        path: String,
        duration_ms: u64,
    },
}

impl WhenError {
    /// Creates an `InvalidArguments` error.
    #[must_use]
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidAccessorSyntax` error.
    #[must_use]
    pub fn invalid_accessor(accessor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAccessorSyntax {
            accessor: accessor.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that indicate a programming mistake rather than
    /// a runtime condition.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::DuplicateBinding { .. }
                | Self::InvalidAccessorSyntax { .. }
                | Self::InvalidArguments { .. }
                | Self::ReadOnlyField { .. }
        )
    }

    /// Returns true if this error carries an upstream source fault.
    #[must_use]
    pub const fn is_source_fault(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// The upstream fault, if any.
    #[must_use]
    pub const fn source_fault(&self) -> Option<&SourceFault> {
        match self {
            Self::Source(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Result type alias for notify-chain operations.
pub type WhenResult<T> = Result<T, WhenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_binding_message() {
        let err = WhenError::DuplicateBinding {
            type_name: "Todo".to_string(),
            field: "title".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("title"));
        assert!(msg.contains("already bound"));
        assert!(err.is_misuse());
    }

    #[test]
    fn test_source_fault_conversion() {
        let fault = SourceFault::new("Kaplowie");
        let err: WhenError = fault.clone().into();
        assert!(err.is_source_fault());
        assert!(!err.is_misuse());
        assert_eq!(err.source_fault(), Some(&fault));
        assert!(format!("{err}").contains("Kaplowie"));
    }

    #[test]
    fn test_resolution_failure_display() {
        let failure = ChainResolutionFailure {
            chain: "blart.boop".to_string(),
            hop: "blart".to_string(),
            reason: FailureReason::Undefined,
        };
        let msg = format!("{failure}");
        assert!(msg.contains("blart.boop"));
        assert!(msg.contains("undefined"));
    }

    #[test]
    fn test_invalid_accessor_helper() {
        let err = WhenError::invalid_accessor("foo..bar", "empty segment");
        assert!(err.is_misuse());
        assert!(format!("{err}").contains("foo..bar"));
    }
}
