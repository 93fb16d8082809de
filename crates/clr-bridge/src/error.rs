//! Error Types for the Object Bridge
//!
//! This module provides the error taxonomy for every bridge operation and
//! the translation of those errors into guest-visible exceptions.
//!
//! ## Error Categories
//!
//! - Guest-side allocation and handle failures
//! - Overload resolution failures (no match, ambiguous match)
//! - Wrong-state usage of explicit overload projections
//! - Host-side invocation failures
//! - Namespace/type resolution and assembly loading failures

use std::fmt;

use smol_str::SmolStr;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The guest runtime could not allocate an instance of a type
    #[error("cannot allocate instance of '{type_name}': {reason}")]
    Allocation {
        /// Guest type the allocation was requested for
        type_name: SmolStr,
        /// Reason for failure
        reason: String,
    },

    /// No candidate signature matches an explicit type list or the supplied arguments
    #[error("{message}")]
    NoMatch {
        /// Name of the overload set
        name: SmolStr,
        /// Guest-visible description
        message: String,
    },

    /// Argument-based resolution found several equally good candidates
    #[error("ambiguous call to '{name}': {} candidates match equally well", .candidates.len())]
    AmbiguousMatch {
        /// Name of the overload set
        name: SmolStr,
        /// Rendered signatures of the tied candidates
        candidates: Vec<String>,
    },

    /// Operation invoked in the wrong state
    #[error("{message}")]
    Usage {
        /// Guest-visible description
        message: String,
    },

    /// The underlying host call threw
    #[error("{message}")]
    Invocation {
        /// Host exception type name (e.g., "System.InvalidOperationException")
        exception_type: SmolStr,
        /// Host exception message
        message: String,
    },

    /// Attribute, namespace or type resolution exhausted all strategies
    #[error("{name}")]
    NotFound {
        /// Name that could not be resolved
        name: SmolStr,
    },

    /// An assembly could not be located or loaded
    #[error("Unable to find assembly '{name}'")]
    Import {
        /// Assembly name or path
        name: SmolStr,
    },

    /// The guest type does not implement the requested operation
    #[error("'{type_name}' object does not support {operation}")]
    Unsupported {
        /// Guest type name
        type_name: SmolStr,
        /// Description of the operation
        operation: &'static str,
    },

    /// A value of the wrong shape was supplied
    #[error("{message}")]
    TypeError {
        /// Guest-visible description
        message: String,
    },

    /// Argument could not be converted to the host parameter type
    #[error("cannot convert {from_type} to {to_type}: {reason}")]
    Conversion {
        /// Guest-side value description
        from_type: SmolStr,
        /// Host parameter type name
        to_type: SmolStr,
        /// Reason for failure
        reason: String,
    },

    /// Handle refers to a deallocated or foreign guest object
    #[error("invalid handle: {context}")]
    InvalidHandle {
        /// Description of the operation that found the handle
        context: String,
    },

    /// The handle registry has no room for another record
    #[error("handle registry exhausted ({capacity} live handles)")]
    RegistryFull {
        /// Configured capacity
        capacity: usize,
    },

    /// The guest runtime has not been initialized
    #[error("guest runtime not initialized")]
    RuntimeNotInitialized,

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },
}

impl BridgeError {
    /// Create an allocation error
    pub fn allocation(type_name: impl Into<SmolStr>, reason: impl Into<String>) -> Self {
        BridgeError::Allocation {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a no-match error with a guest-visible message
    pub fn no_match(name: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        BridgeError::NoMatch {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an ambiguous match error
    pub fn ambiguous(name: impl Into<SmolStr>, candidates: Vec<String>) -> Self {
        BridgeError::AmbiguousMatch {
            name: name.into(),
            candidates,
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        BridgeError::Usage {
            message: message.into(),
        }
    }

    /// Create an invocation error from a host failure
    pub fn invocation(exception_type: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        BridgeError::Invocation {
            exception_type: exception_type.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(name: impl Into<SmolStr>) -> Self {
        BridgeError::NotFound { name: name.into() }
    }

    /// Create an import error
    pub fn import(name: impl Into<SmolStr>) -> Self {
        BridgeError::Import { name: name.into() }
    }

    /// Create an unsupported operation error
    pub fn unsupported(type_name: impl Into<SmolStr>, operation: &'static str) -> Self {
        BridgeError::Unsupported {
            type_name: type_name.into(),
            operation,
        }
    }

    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        BridgeError::TypeError {
            message: message.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(
        from_type: impl Into<SmolStr>,
        to_type: impl Into<SmolStr>,
        reason: impl Into<String>,
    ) -> Self {
        BridgeError::Conversion {
            from_type: from_type.into(),
            to_type: to_type.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid handle error
    pub fn invalid_handle(context: impl Into<String>) -> Self {
        BridgeError::InvalidHandle {
            context: context.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Check if this is an overload resolution error
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            BridgeError::NoMatch { .. } | BridgeError::AmbiguousMatch { .. }
        )
    }

    /// Check if this error may be remembered as a negative lookup result.
    ///
    /// Transient failures (loading, allocation) must be retried on the next access.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, BridgeError::NotFound { .. })
    }

    /// Check if this error came from the host runtime
    pub fn is_host_exception(&self) -> bool {
        matches!(self, BridgeError::Invocation { .. })
    }

    /// Translate into the exception raised in the guest runtime
    pub fn guest_exception(&self) -> GuestException {
        let kind = match self {
            BridgeError::Allocation { .. } | BridgeError::RegistryFull { .. } => {
                GuestExceptionKind::MemoryError
            }
            BridgeError::NoMatch { .. }
            | BridgeError::AmbiguousMatch { .. }
            | BridgeError::Usage { .. }
            | BridgeError::Unsupported { .. }
            | BridgeError::TypeError { .. }
            | BridgeError::Conversion { .. } => GuestExceptionKind::TypeError,
            BridgeError::Invocation { exception_type, .. } => {
                GuestExceptionKind::Host(exception_type.clone())
            }
            BridgeError::NotFound { .. } => GuestExceptionKind::AttributeError,
            BridgeError::Import { .. } => GuestExceptionKind::ImportError,
            BridgeError::InvalidHandle { .. }
            | BridgeError::RuntimeNotInitialized
            | BridgeError::Config { .. } => GuestExceptionKind::RuntimeError,
        };

        GuestException {
            kind,
            message: self.to_string(),
        }
    }
}

// ============================================================================
// Guest Exceptions
// ============================================================================

/// Exception class raised in the guest runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestExceptionKind {
    /// `TypeError`
    TypeError,
    /// `AttributeError`
    AttributeError,
    /// `ImportError`
    ImportError,
    /// `MemoryError`
    MemoryError,
    /// `RuntimeError`
    RuntimeError,
    /// A host exception surfaced through its wrapper class
    Host(SmolStr),
}

impl fmt::Display for GuestExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestExceptionKind::TypeError => write!(f, "TypeError"),
            GuestExceptionKind::AttributeError => write!(f, "AttributeError"),
            GuestExceptionKind::ImportError => write!(f, "ImportError"),
            GuestExceptionKind::MemoryError => write!(f, "MemoryError"),
            GuestExceptionKind::RuntimeError => write!(f, "RuntimeError"),
            GuestExceptionKind::Host(name) => write!(f, "{}", name),
        }
    }
}

/// A pending exception in the guest runtime's error indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestException {
    /// Exception class
    pub kind: GuestExceptionKind,
    /// Exception message
    pub message: String,
}

impl fmt::Display for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&BridgeError> for GuestException {
    fn from(err: &BridgeError) -> Self {
        err.guest_exception()
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Bridge diagnostic with notes and help text
#[derive(Debug, Clone)]
pub struct BridgeDiagnostic {
    /// The error
    pub error: BridgeError,
    /// Additional notes
    pub notes: Vec<String>,
    /// Help suggestion
    pub help: Option<String>,
}

impl BridgeDiagnostic {
    /// Create a new diagnostic
    pub fn new(error: BridgeError) -> Self {
        let notes = match &error {
            BridgeError::AmbiguousMatch { candidates, .. } => candidates
                .iter()
                .map(|sig| format!("candidate: {}", sig))
                .collect(),
            _ => Vec::new(),
        };
        let help = match &error {
            BridgeError::AmbiguousMatch { .. } => Some(
                "select an overload explicitly: Class.__overloads__[CLR_Type_list]".to_string(),
            ),
            _ => None,
        };

        Self { error, notes, help }
    }

    /// Add a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Add help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for BridgeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.error)?;

        for note in &self.notes {
            writeln!(f, "note: {}", note)?;
        }

        if let Some(ref help) = self.help {
            writeln!(f, "help: {}", help)?;
        }

        Ok(())
    }
}
