//! Store configuration via `flex.toml`
//!
//! One file describes the stream roots and every object type (directory):
//! which backend stores it, where, and how its index and ACL behave.

use flexdb_core::{Error, Result};
use flexdb_storage::Formatter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file name placed in the site root.
pub const CONFIG_FILE_NAME: &str = "flex.toml";

/// Which backend stores a directory's records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One file per record
    File,
    /// One folder per record, with media
    #[default]
    Folder,
}

/// Declared relationship field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Type the identifiers point at
    #[serde(rename = "type")]
    pub kind: String,
    /// Minimum number of identifiers
    #[serde(default)]
    pub min: usize,
    /// Maximum number of identifiers (`None` = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

impl RelationshipConfig {
    /// To-many relationship without bounds
    pub fn new(kind: impl Into<String>) -> Self {
        RelationshipConfig {
            kind: kind.into(),
            min: 0,
            max: None,
        }
    }

    /// Builder-style cardinality bounds
    pub fn with_bounds(mut self, min: usize, max: Option<usize>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// True when at most one identifier is allowed
    pub fn is_to_one(&self) -> bool {
        self.max == Some(1)
    }
}

/// Configuration of one object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Backend kind
    #[serde(default)]
    pub storage: StorageKind,
    /// Stream URI (or path) of the records root
    pub path: String,
    /// Payload format
    #[serde(default)]
    pub format: Formatter,
    /// Keep key case instead of folding to lowercase
    #[serde(default)]
    pub case_sensitive: bool,
    /// Shard folder records under two-character prefixes
    #[serde(default)]
    pub prefixed: bool,
    /// Base name of the data file in folder records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
    /// Shared media location for backends without per-record media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_root: Option<String>,
    /// Record fields copied into index tags
    #[serde(default)]
    pub index_fields: Vec<String>,
    /// Dot path of the ACL map inside a record
    #[serde(default = "default_access_field")]
    pub access_field: String,
    /// Fields dropped before writing
    #[serde(default)]
    pub strip_fields: Vec<String>,
    /// Field → section relocations applied before writing
    #[serde(default)]
    pub relocate: BTreeMap<String, String>,
    /// Relationship fields by name
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipConfig>,
    /// Hydrated records kept for reuse; 0 disables the cache
    #[serde(default = "default_record_cache")]
    pub record_cache: usize,
}

/// Default number of hydrated records a directory keeps
pub const DEFAULT_RECORD_CACHE: usize = 1024;

fn default_access_field() -> String {
    "access".to_string()
}

fn default_record_cache() -> usize {
    DEFAULT_RECORD_CACHE
}

impl DirectoryConfig {
    /// Folder-backed directory at `path`
    pub fn new(path: impl Into<String>) -> Self {
        DirectoryConfig {
            storage: StorageKind::default(),
            path: path.into(),
            format: Formatter::default(),
            case_sensitive: false,
            prefixed: false,
            data_file: None,
            media_root: None,
            index_fields: Vec::new(),
            access_field: default_access_field(),
            strip_fields: Vec::new(),
            relocate: BTreeMap::new(),
            relationships: BTreeMap::new(),
            record_cache: DEFAULT_RECORD_CACHE,
        }
    }

    /// Builder-style hydrated record cache size
    pub fn with_record_cache(mut self, records: usize) -> Self {
        self.record_cache = records;
        self
    }

    /// Builder-style backend kind
    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Builder-style payload format
    pub fn with_format(mut self, format: Formatter) -> Self {
        self.format = format;
        self
    }

    /// Builder-style case policy
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Builder-style prefix sharding
    pub fn with_prefixed(mut self, prefixed: bool) -> Self {
        self.prefixed = prefixed;
        self
    }

    /// Builder-style shared media root
    pub fn with_media_root(mut self, uri: impl Into<String>) -> Self {
        self.media_root = Some(uri.into());
        self
    }

    /// Builder-style index tag fields
    pub fn with_index_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style ACL location
    pub fn with_access_field(mut self, path: impl Into<String>) -> Self {
        self.access_field = path.into();
        self
    }

    /// Builder-style field relocation
    pub fn with_relocation(mut self, field: impl Into<String>, section: impl Into<String>) -> Self {
        self.relocate.insert(field.into(), section.into());
        self
    }

    /// Builder-style relationship declaration
    pub fn with_relationship(mut self, name: impl Into<String>, rel: RelationshipConfig) -> Self {
        self.relationships.insert(name.into(), rel);
        self
    }

    /// Check for values that cannot work
    pub fn validate(&self, kind: &str) -> Result<()> {
        if kind.is_empty() || kind.contains(':') {
            return Err(Error::Config(format!("invalid type name '{}'", kind)));
        }
        if self.path.trim().is_empty() {
            return Err(Error::Config(format!("directory '{}' has an empty path", kind)));
        }
        if self.access_field.trim().is_empty() {
            return Err(Error::Config(format!(
                "directory '{}' has an empty access_field",
                kind
            )));
        }
        for (name, rel) in &self.relationships {
            if rel.kind.is_empty() {
                return Err(Error::Config(format!(
                    "relationship '{}.{}' has no target type",
                    kind, name
                )));
            }
            if let Some(max) = rel.max {
                if rel.min > max {
                    return Err(Error::Config(format!(
                        "relationship '{}.{}' has min {} > max {}",
                        kind, name, rel.min, max
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Store configuration loaded from `flex.toml`.
///
/// # Example
///
/// ```toml
/// [streams]
/// user = "/srv/site/user"
///
/// [directories.accounts]
/// storage = "folder"
/// path = "user://accounts"
/// index_fields = ["enabled", "email"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlexConfig {
    /// Stream scheme → base directory
    #[serde(default)]
    pub streams: BTreeMap<String, PathBuf>,
    /// Object type → directory configuration
    #[serde(default)]
    pub directories: BTreeMap<String, DirectoryConfig>,
}

impl FlexConfig {
    /// Builder-style stream registration
    pub fn with_stream(mut self, scheme: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        self.streams.insert(scheme.into(), base.into());
        self
    }

    /// Builder-style directory registration
    pub fn with_directory(mut self, kind: impl Into<String>, config: DirectoryConfig) -> Self {
        self.directories.insert(kind.into(), config);
        self
    }

    /// Validate every directory
    pub fn validate(&self) -> Result<()> {
        for (kind, dir) in &self.directories {
            dir.validate(kind)?;
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# FlexDB configuration
#
# Stream roots: "user://accounts" resolves to <user>/accounts
[streams]
user = "user"

# One table per object type.
#   storage       = "folder" (default, one directory per record, with media)
#                 | "file"   (one file per record, no media)
#   format        = "json" (default) | "toml"
#   index_fields  = fields copied into the index for cheap filtering
#   access_field  = dot path of the ACL map (default "access")
[directories.accounts]
storage = "folder"
path = "user://accounts"
index_fields = ["enabled", "email"]

# [directories.accounts.relationships.groups]
# type = "groups"
# min = 0
# max = 10
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: FlexConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_parses_correctly() {
        let config: FlexConfig = toml::from_str(FlexConfig::default_toml()).unwrap();
        let accounts = &config.directories["accounts"];
        assert_eq!(accounts.storage, StorageKind::Folder);
        assert_eq!(accounts.path, "user://accounts");
        assert_eq!(accounts.index_fields, vec!["enabled", "email"]);
        assert_eq!(accounts.access_field, "access");
        assert_eq!(config.streams["user"], PathBuf::from("user"));
        config.validate().unwrap();
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        FlexConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());

        let config = FlexConfig::from_file(&path).unwrap();
        assert!(config.directories.contains_key("accounts"));
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "[directories.pages]\npath = \"pages\"\nstorage = \"file\"\n").unwrap();
        FlexConfig::write_default_if_missing(&path).unwrap();

        let config = FlexConfig::from_file(&path).unwrap();
        assert_eq!(config.directories["pages"].storage, StorageKind::File);
        assert!(!config.directories.contains_key("accounts"));
    }

    #[test]
    fn from_file_with_empty_content_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();

        let config = FlexConfig::from_file(&path).unwrap();
        assert!(config.directories.is_empty());
        assert!(config.streams.is_empty());
    }

    #[test]
    fn from_file_rejects_bad_relationship() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[directories.accounts]
path = "accounts"

[directories.accounts.relationships.groups]
type = "groups"
min = 3
max = 1
"#,
        )
        .unwrap();

        let err = FlexConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("min 3 > max 1"));
    }

    #[test]
    fn from_file_missing_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = FlexConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = FlexConfig::default()
            .with_stream("user", dir.path())
            .with_directory(
                "accounts",
                DirectoryConfig::new("user://accounts")
                    .with_storage(StorageKind::File)
                    .with_format(Formatter::Toml)
                    .with_media_root("user://media")
                    .with_relocation("access", "security")
                    .with_access_field("security.access")
                    .with_relationship(
                        "groups",
                        RelationshipConfig::new("groups").with_bounds(0, Some(5)),
                    ),
            );

        config.write_to_file(&path).unwrap();
        let parsed = FlexConfig::from_file(&path).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn invalid_type_name_rejected() {
        let config = FlexConfig::default().with_directory("a:b", DirectoryConfig::new("x"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn relationship_cardinality_helpers() {
        assert!(RelationshipConfig::new("users").with_bounds(0, Some(1)).is_to_one());
        assert!(!RelationshipConfig::new("users").is_to_one());
    }
}
