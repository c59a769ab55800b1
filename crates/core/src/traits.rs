//! Collaborator traits
//!
//! The object store consumes these and never implements schema rules or
//! resource lookup itself:
//! - Blueprint: validates and normalizes record data
//! - Locator: maps stream URIs (`user://accounts`) to filesystem paths

use crate::error::Result;
use crate::record::Record;
use std::path::PathBuf;

/// Schema validation for one object type
///
/// `validate` returns the normalized record, or `Error::Validation` with
/// the offending fields. The error is passed to callers unchanged.
pub trait Blueprint: Send + Sync {
    /// Validate and normalize record data
    fn validate(&self, data: Record) -> Result<Record>;
}

/// Blueprint that accepts any data as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Blueprint for AcceptAll {
    fn validate(&self, data: Record) -> Result<Record> {
        Ok(data)
    }
}

impl<F> Blueprint for F
where
    F: Fn(Record) -> Result<Record> + Send + Sync,
{
    fn validate(&self, data: Record) -> Result<Record> {
        self(data)
    }
}

/// Resolves abstract resource URIs to filesystem paths
///
/// Storage backends only ever obtain paths through this call.
pub trait Locator: Send + Sync {
    /// Resolve a stream URI or plain path
    fn resolve(&self, uri: &str) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ValidationErrors};

    #[test]
    fn test_accept_all_passes_through() {
        let record = Record::new().with("a", 1);
        assert_eq!(AcceptAll.validate(record.clone()).unwrap(), record);
    }

    #[test]
    fn test_closure_blueprint() {
        let require_name = |data: Record| -> Result<Record> {
            if data.contains("name") {
                Ok(data)
            } else {
                Err(ValidationErrors::new().with("name", "is required").into())
            }
        };
        assert!(require_name.validate(Record::new().with("name", "x")).is_ok());
        assert!(matches!(
            require_name.validate(Record::new()),
            Err(Error::Validation(_))
        ));
    }
}
