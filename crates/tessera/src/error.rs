//! Error types for the Tessera bindings.

use tessera_ffi::TesseraResult;
use thiserror::Error;

use crate::datatype::Datatype;

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, Error>;

fn subject_suffix(subject: &str) -> String {
    if subject.is_empty() {
        String::new()
    } else {
        format!(" '{subject}'")
    }
}

/// Errors that can occur in binding operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A native allocation returned no handle.
    #[error("allocating {what} returned no handle")]
    Allocation {
        /// The kind of object being allocated.
        what: &'static str,
    },

    /// A value or buffer kind differs from the schema's datatype.
    #[error("type mismatch on '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// The field, dimension or value involved.
        name: String,
        /// What the schema requires.
        expected: String,
        /// What was supplied.
        actual: String,
    },

    /// A native call returned a failure status.
    #[error("{operation}{}: {message}", subject_suffix(.subject))]
    Native {
        /// The operation attempted.
        operation: &'static str,
        /// The name, key or index involved, if any.
        subject: String,
        /// The native status code.
        code: i32,
        /// The engine's message, verbatim.
        message: String,
    },

    /// A key, dimension or attribute does not exist.
    #[error("{operation}{}: not found: {message}", subject_suffix(.subject))]
    NotFound {
        /// The operation attempted.
        operation: &'static str,
        /// The missing name, key or index.
        subject: String,
        /// The engine's message, verbatim.
        message: String,
    },

    /// A handle was used after it was freed.
    #[error("{what} handle used after free")]
    HandleFreed {
        /// The kind of handle.
        what: &'static str,
    },

    /// An empty buffer cannot be bound.
    #[error("cannot bind an empty {slot} buffer for '{name}'")]
    EmptyBuffer {
        /// The field name.
        name: String,
        /// Which of the field's buffers.
        slot: &'static str,
    },

    /// A required buffer was never set.
    #[error("no {slot} buffer set for '{name}'")]
    BufferNotSet {
        /// The field name.
        name: String,
        /// Which of the field's buffers.
        slot: &'static str,
    },

    /// The engine reports a length but there is no memory behind it.
    #[error("'{name}': expected length {expected} available, data unavailable")]
    DataUnavailable {
        /// The field name.
        name: String,
        /// The byte length the engine reports.
        expected: u64,
    },

    /// A read is incomplete and no buffer received a single result.
    #[error("query incomplete with no results; enlarge the buffers of {}", .fields.join(", "))]
    BuffersTooSmall {
        /// The fields whose buffers were bound.
        fields: Vec<String>,
    },

    /// The datatype has no concrete element type.
    #[error("unsupported datatype {datatype}")]
    UnsupportedDatatype {
        /// The datatype.
        datatype: Datatype,
    },

    /// An argument was rejected before reaching the engine.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl Error {
    /// Creates a type mismatch error.
    pub fn type_mismatch(
        name: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Builds the error for a failed native call.
    pub(crate) fn from_status(
        status: TesseraResult,
        operation: &'static str,
        subject: &str,
        message: String,
    ) -> Self {
        match status {
            TesseraResult::NotFound => Self::NotFound {
                operation,
                subject: subject.to_string(),
                message,
            },
            _ => Self::Native {
                operation,
                subject: subject.to_string(),
                code: status.into(),
                message,
            },
        }
    }

    /// Returns true for a missing key, dimension or attribute.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for a type mismatch.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }
}
