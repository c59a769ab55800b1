//! Stream locator
//!
//! Maps stream URIs such as `user://accounts` to filesystem paths under a
//! registered base directory. Plain paths pass through unchanged.

use flexdb_core::{Error, Locator, Result};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

const SCHEME_SEPARATOR: &str = "://";

/// [`Locator`] backed by a scheme → base directory table
#[derive(Debug, Clone, Default)]
pub struct StreamLocator {
    streams: BTreeMap<String, PathBuf>,
}

impl StreamLocator {
    /// Locator with no streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a stream
    pub fn with_stream(mut self, scheme: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        self.add_stream(scheme, base);
        self
    }

    /// Register (or replace) a stream in place
    pub fn add_stream(&mut self, scheme: impl Into<String>, base: impl Into<PathBuf>) {
        self.streams.insert(scheme.into(), base.into());
    }

    /// Registered base directory for a scheme
    pub fn stream(&self, scheme: &str) -> Option<&Path> {
        self.streams.get(scheme).map(PathBuf::as_path)
    }
}

impl Locator for StreamLocator {
    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let Some((scheme, rest)) = uri.split_once(SCHEME_SEPARATOR) else {
            return Ok(PathBuf::from(uri));
        };

        let base = self
            .streams
            .get(scheme)
            .ok_or_else(|| Error::Config(format!("unknown stream '{}' in {}", scheme, uri)))?;

        let relative = Path::new(rest);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Config(format!("stream path escapes its root: {}", uri)));
        }

        Ok(base.join(relative))
    }
}
