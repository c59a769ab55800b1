//! Identifier: universal handle for referenceable entities
//!
//! An `Identifier` is an immutable `(type, id)` pair. Relationship fields
//! persist identifiers, never live objects; the object graph is rebuilt by
//! resolving identifiers through the owning context.
//!
//! ## Text form
//!
//! `type:id`, split on the first `:`. Media identifiers use the
//! [`MEDIA_TYPE`] type and an `owner_type/owner_id/filename` id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type name used for attached media files
pub const MEDIA_TYPE: &str = "media";

/// Reference to an object or an attached media file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

impl Identifier {
    /// Create an identifier
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Identifier {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Identifier for a file attached to `owner`
    pub fn media(owner: &Identifier, filename: &str) -> Self {
        Identifier::new(MEDIA_TYPE, format!("{}/{}/{}", owner.kind, owner.id, filename))
    }

    /// Declared type of the referenced entity
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Id within the type
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True for media identifiers
    pub fn is_media(&self) -> bool {
        self.kind == MEDIA_TYPE
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Error parsing the `type:id` text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdentifierError(String);

impl fmt::Display for ParseIdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identifier {:?}, expected type:id", self.0)
    }
}

impl std::error::Error for ParseIdentifierError {}

impl FromStr for Identifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Identifier::new(kind, id)),
            _ => Err(ParseIdentifierError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Identifier::new("users", "alice"), Identifier::new("users", "alice"));
        assert_ne!(Identifier::new("users", "alice"), Identifier::new("groups", "alice"));
    }

    #[test]
    fn test_display_parse() {
        let id = Identifier::new("pages", "blog:post");
        assert_eq!(id.to_string(), "pages:blog:post");
        let parsed: Identifier = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert!("users".parse::<Identifier>().is_err());
        assert!(":alice".parse::<Identifier>().is_err());
        assert!("users:".parse::<Identifier>().is_err());
    }

    #[test]
    fn test_media_identifier() {
        let owner = Identifier::new("users", "alice");
        let media = Identifier::media(&owner, "avatar.png");
        assert!(media.is_media());
        assert_eq!(media.id(), "users/alice/avatar.png");
    }
}
