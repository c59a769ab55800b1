//! FlexContext: explicit registry of object types
//!
//! The context owns the directories, the shared event bus and the locator.
//! Directories and objects only hold weak handles back into it, so dropping
//! the last context clone releases everything.

use crate::collection::FlexCollection;
use crate::config::{DirectoryConfig, FlexConfig, CONFIG_FILE_NAME};
use crate::directory::FlexDirectory;
use crate::events::EventBus;
use crate::object::FlexObject;
use crate::resolver::{CollectionLookup, RelationshipResolver};
use flexdb_core::{Error, Identifier, Locator, Result};
use flexdb_storage::{RecordStorage, StreamLocator};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

struct ContextInner {
    directories: RwLock<BTreeMap<String, Arc<FlexDirectory>>>,
    events: Arc<EventBus>,
    locator: Arc<dyn Locator>,
}

impl CollectionLookup for ContextInner {
    fn lookup_collection(&self, kind: &str) -> Option<FlexCollection> {
        self.directories.read().get(kind).map(FlexDirectory::collection)
    }
}

/// Shared handle to a set of directories
#[derive(Clone)]
pub struct FlexContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for FlexContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexContext")
            .field("types", &self.types())
            .field("events", &self.inner.events)
            .finish()
    }
}

impl FlexContext {
    /// Empty context resolving paths through `locator`
    pub fn new(locator: impl Locator + 'static) -> Self {
        FlexContext {
            inner: Arc::new(ContextInner {
                directories: RwLock::new(BTreeMap::new()),
                events: Arc::new(EventBus::new()),
                locator: Arc::new(locator),
            }),
        }
    }

    /// Context with every directory of `config`
    ///
    /// Relative stream roots are taken relative to `root`.
    pub fn from_config(config: &FlexConfig, root: &Path) -> Result<Self> {
        config.validate()?;
        let mut locator = StreamLocator::new();
        for (scheme, base) in &config.streams {
            locator.add_stream(scheme.as_str(), root.join(base));
        }
        let context = Self::new(locator);
        for (kind, directory) in &config.directories {
            context.register(kind.as_str(), directory.clone())?;
        }
        info!(target: "flexdb::context", root = %root.display(), types = config.directories.len(), "Context opened");
        Ok(context)
    }

    /// Context from `<root>/flex.toml`, writing the default file first if missing
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        FlexConfig::write_default_if_missing(&path)?;
        let config = FlexConfig::from_file(&path)?;
        Self::from_config(&config, root)
    }

    /// Open and register a directory for `kind`
    pub fn register(&self, kind: impl Into<String>, config: DirectoryConfig) -> Result<Arc<FlexDirectory>> {
        self.insert(kind.into(), config, None)
    }

    /// Register a directory over a caller-supplied backend
    pub fn register_storage(
        &self,
        kind: impl Into<String>,
        config: DirectoryConfig,
        storage: Box<dyn RecordStorage>,
    ) -> Result<Arc<FlexDirectory>> {
        self.insert(kind.into(), config, Some(storage))
    }

    fn insert(
        &self,
        kind: String,
        config: DirectoryConfig,
        storage: Option<Box<dyn RecordStorage>>,
    ) -> Result<Arc<FlexDirectory>> {
        if self.inner.directories.read().contains_key(&kind) {
            return Err(Error::InvalidOperation(format!("type '{}' is already registered", kind)));
        }
        let lookup: Weak<dyn CollectionLookup> = Arc::downgrade(&self.inner) as Weak<dyn CollectionLookup>;
        let directory = FlexDirectory::open_in(
            kind.clone(),
            config,
            storage,
            self.inner.locator.as_ref(),
            Arc::clone(&self.inner.events),
            lookup,
        )?;
        self.inner
            .directories
            .write()
            .insert(kind.clone(), Arc::clone(&directory));
        info!(target: "flexdb::context", kind = %kind, entries = directory.len(), "Directory registered");
        Ok(directory)
    }

    /// Directory for a type
    pub fn directory(&self, kind: &str) -> Result<Arc<FlexDirectory>> {
        self.inner
            .directories
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownType(kind.to_string()))
    }

    /// Collection of every record of a type
    pub fn collection(&self, kind: &str) -> Result<FlexCollection> {
        Ok(self.directory(kind)?.collection())
    }

    /// Object for an identifier
    pub fn object(&self, identifier: &Identifier) -> Result<Option<FlexObject>> {
        self.directory(identifier.kind())?.object(identifier.id())
    }

    /// Resolver over this context's types
    pub fn resolver(&self) -> RelationshipResolver {
        RelationshipResolver::from_arc(&self.inner)
    }

    /// Bus shared by every directory
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Locator used for every path
    pub fn locator(&self) -> &dyn Locator {
        self.inner.locator.as_ref()
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<String> {
        self.inner.directories.read().keys().cloned().collect()
    }

    /// Persist the index of every directory
    ///
    /// Every directory is attempted; the first error is returned.
    pub fn flush_all(&self) -> Result<()> {
        let directories: Vec<_> = self.inner.directories.read().values().cloned().collect();
        let mut first_error = None;
        for directory in directories {
            if let Err(e) = directory.flush() {
                warn!(target: "flexdb::context", kind = %directory.kind(), error = %e, "Failed to flush index");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
