//! Error types for FlexDB
//!
//! One error enum covers the whole object store. We use `thiserror` for
//! automatic `Display` and `Error` trait implementations.
//!
//! I/O failures are fatal and propagate unchanged. `CorruptIndex` is
//! internal: the index loader catches it and rebuilds from storage.

use crate::identifier::Identifier;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for FlexDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for FlexDB
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key absent from storage
    #[error("Record not found: {key}")]
    NotFound {
        /// Canonical key that was looked up
        key: String,
    },

    /// Rename target already occupied
    #[error("Record already exists: {key}")]
    Conflict {
        /// Canonical key that is already taken
        key: String,
    },

    /// Data rejected by a blueprint
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Operation on an object that was already deleted
    #[error("Stale object: {0} has been deleted")]
    StaleObject(Identifier),

    /// Key that cannot be used as a storage key
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey {
        /// Raw key as given by the caller
        key: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Persisted index blob could not be decoded
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// No directory registered for the requested type
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for [`Error::NotFound`]
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Shorthand for [`Error::Conflict`]
    pub fn conflict(key: impl Into<String>) -> Self {
        Error::Conflict { key: key.into() }
    }

    /// True for [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<ValidationErrors> for Error {
    fn from(e: ValidationErrors) -> Self {
        Error::Validation(e)
    }
}

// ============================================================================
// Validation errors
// ============================================================================

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dot path of the offending field
    pub field: String,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Field errors reported by a blueprint, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Empty error list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Builder form of [`ValidationErrors::add`]
    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    /// All field errors
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Errors reported for one field
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// True when nothing was rejected
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a result: `Ok(())` when empty
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}
