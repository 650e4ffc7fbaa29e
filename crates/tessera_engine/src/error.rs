//! Error types for the Tessera engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An argument was malformed or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A schema, domain, dimension or attribute is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// An array already exists at the URI.
    #[error("array already exists: {uri}")]
    ArrayExists {
        /// The array URI.
        uri: String,
    },

    /// No array exists at the URI.
    #[error("array does not exist: {uri}")]
    ArrayNotFound {
        /// The array URI.
        uri: String,
    },

    /// A dimension or attribute name is not part of the schema.
    #[error("field not found: {name}")]
    FieldNotFound {
        /// The field name.
        name: String,
    },

    /// A positional lookup was out of range.
    #[error("{what} index {index} out of bounds (count {count})")]
    IndexOutOfBounds {
        /// What was being indexed.
        what: &'static str,
        /// The requested index.
        index: u64,
        /// The number of available items.
        count: u64,
    },

    /// A range or coordinate falls outside the dimension's domain.
    #[error("out of domain bounds: {message}")]
    OutOfBounds {
        /// Description of the violation.
        message: String,
    },

    /// A query buffer is missing, misshapen or inconsistent.
    #[error("buffer error on '{name}': {message}")]
    Buffer {
        /// The field whose buffer is at fault.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The layout is not valid for this query.
    #[error("layout {layout} is not supported for {context}")]
    UnsupportedLayout {
        /// The layout name.
        layout: &'static str,
        /// The query or array kind.
        context: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The context cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a field not found error.
    pub fn field_not_found(name: impl Into<String>) -> Self {
        Self::FieldNotFound { name: name.into() }
    }

    /// Creates an out of bounds error.
    pub fn out_of_bounds(message: impl Into<String>) -> Self {
        Self::OutOfBounds {
            message: message.into(),
        }
    }

    /// Creates a buffer error.
    pub fn buffer(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Buffer {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error reports a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ArrayNotFound { .. } | Self::FieldNotFound { .. } | Self::IndexOutOfBounds { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = EngineError::buffer("a1", "offsets required for var-sized field");
        assert_eq!(
            err.to_string(),
            "buffer error on 'a1': offsets required for var-sized field"
        );

        let err = EngineError::IndexOutOfBounds {
            what: "dimension",
            index: 3,
            count: 2,
        };
        assert_eq!(err.to_string(), "dimension index 3 out of bounds (count 2)");
    }

    #[test]
    fn not_found_classification() {
        assert!(EngineError::field_not_found("x").is_not_found());
        assert!(!EngineError::Cancelled.is_not_found());
    }
}
