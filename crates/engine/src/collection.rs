//! FlexCollection: an index-ordered view over one directory
//!
//! A collection is a scope (every key, or a key subset) over the
//! directory's index. Objects are hydrated lazily as the collection is
//! walked, and the directory keeps hydrated records so a second walk does
//! not touch storage again.
//!
//! Whole-collection computations go through [`FlexCollection::call_cached`].
//! Results are memoized under a key that includes the scope and the index
//! fingerprint and revision, so any index change makes earlier results
//! unreachable.

use crate::cache::CallSignature;
use crate::directory::FlexDirectory;
use crate::object::FlexObject;
use crate::resolver::RelationshipResolver;
use flexdb_core::{xxh3_hex, Error, IndexEntry, Result, StorageKey, Value};
use flexdb_storage::fingerprint_of;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Methods whose results may be memoized
pub const CACHED_METHODS: &[(&str, bool)] = &[
    ("authorize", true),
    ("select_authorized", true),
    ("order_by", true),
    ("find", true),
    ("timestamps", true),
    ("cache_checksum", true),
    ("render", false),
];

/// Sort direction for [`FlexCollection::order_by`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    #[default]
    Asc,
    /// Largest first
    Desc,
}

type EntryTest = Arc<dyn Fn(&IndexEntry) -> bool + Send + Sync>;
type ObjectTest = Arc<dyn Fn(&FlexObject) -> bool + Send + Sync>;

/// Filter condition
#[derive(Clone)]
pub enum Predicate {
    /// Field equals a value; answered from index tags when the field is tagged
    FieldEq(String, Value),
    /// Test on the index entry only, never hydrates
    Entry(EntryTest),
    /// Test on the hydrated object
    Object(ObjectTest),
}

impl Predicate {
    /// `field == value`
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::FieldEq(field.into(), value.into())
    }

    /// Test on index entries
    pub fn entry(test: impl Fn(&IndexEntry) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Entry(Arc::new(test))
    }

    /// Test on objects
    pub fn object(test: impl Fn(&FlexObject) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Object(Arc::new(test))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::FieldEq(field, value) => f.debug_tuple("FieldEq").field(field).field(value).finish(),
            Predicate::Entry(_) => f.write_str("Entry(..)"),
            Predicate::Object(_) => f.write_str("Object(..)"),
        }
    }
}

#[derive(Clone)]
enum Scope {
    All,
    Keys {
        keys: Arc<Vec<StorageKey>>,
        fingerprint: String,
    },
}

/// Ordered set of objects of one type
#[derive(Clone)]
pub struct FlexCollection {
    directory: Arc<FlexDirectory>,
    scope: Scope,
}

impl fmt::Debug for FlexCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexCollection")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("scope", &self.scope_fingerprint())
            .finish()
    }
}

impl FlexCollection {
    pub(crate) fn all(directory: Arc<FlexDirectory>) -> Self {
        FlexCollection {
            directory,
            scope: Scope::All,
        }
    }

    fn with_keys(directory: Arc<FlexDirectory>, keys: Vec<StorageKey>) -> Self {
        let mut seen = HashSet::new();
        let keys: Vec<StorageKey> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
        let joined = keys.iter().map(StorageKey::as_str).collect::<Vec<_>>().join("\n");
        FlexCollection {
            directory,
            scope: Scope::Keys {
                fingerprint: xxh3_hex(joined.as_bytes()),
                keys: Arc::new(keys),
            },
        }
    }

    /// Every cacheable method name
    pub fn cached_methods() -> impl Iterator<Item = &'static str> {
        CACHED_METHODS
            .iter()
            .filter(|(_, cacheable)| *cacheable)
            .map(|(name, _)| *name)
    }

    /// Whether results of `method` are memoized
    pub fn is_cacheable(method: &str) -> bool {
        CACHED_METHODS
            .iter()
            .any(|(name, cacheable)| *name == method && *cacheable)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Object type
    pub fn kind(&self) -> &str {
        self.directory.kind()
    }

    /// Owning directory
    pub fn directory(&self) -> &Arc<FlexDirectory> {
        &self.directory
    }

    /// Resolver for relationship fields of this type
    pub fn resolver(&self) -> RelationshipResolver {
        self.directory.resolver()
    }

    /// Canonical keys in index order (subset order for subsets)
    pub fn keys(&self) -> Vec<StorageKey> {
        self.directory.with_index(|index| match &self.scope {
            Scope::All => index.keys().to_vec(),
            Scope::Keys { keys, .. } => keys.iter().filter(|k| index.has(k.as_str())).cloned().collect(),
        })
    }

    /// Index entries of the members
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.directory.with_index(|index| match &self.scope {
            Scope::All => index.iter().cloned().collect(),
            Scope::Keys { keys, .. } => keys.iter().filter_map(|k| index.get(k.as_str()).cloned()).collect(),
        })
    }

    /// Number of members
    pub fn len(&self) -> usize {
        match &self.scope {
            Scope::All => self.directory.len(),
            Scope::Keys { .. } => self.keys().len(),
        }
    }

    /// True when there are no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a raw key is a member
    pub fn contains(&self, key: &str) -> bool {
        let Ok(key) = self.directory.normalizer().canonical(key) else {
            return false;
        };
        self.directory.with_index(|index| {
            index.has(key.as_str())
                && match &self.scope {
                    Scope::All => true,
                    Scope::Keys { keys, .. } => keys.contains(&key),
                }
        })
    }

    /// Member for a raw key, hydrated on demand
    pub fn get(&self, key: &str) -> Result<Option<FlexObject>> {
        let key = match self.directory.normalizer().canonical(key) {
            Ok(key) => key,
            Err(Error::InvalidKey { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if let Scope::Keys { keys, .. } = &self.scope {
            if !keys.contains(&key) {
                return Ok(None);
            }
        }
        self.directory.hydrate(&key)
    }

    /// Lazy walk over the members in index order
    ///
    /// Keys whose record vanished from storage are skipped; I/O and decode
    /// errors are yielded.
    pub fn iter(&self) -> CollectionIter {
        CollectionIter {
            directory: Arc::clone(&self.directory),
            keys: self.keys().into_iter(),
        }
    }

    /// Every member, hydrated
    pub fn objects(&self) -> Result<Vec<FlexObject>> {
        self.iter().collect()
    }

    /// Collection of the given raw keys, restricted to this collection
    pub fn subset<I, S>(&self, keys: I) -> FlexCollection
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalizer = self.directory.normalizer();
        let allowed: Option<HashSet<StorageKey>> = match &self.scope {
            Scope::All => None,
            Scope::Keys { keys, .. } => Some(keys.iter().cloned().collect()),
        };
        let keys = keys
            .into_iter()
            .filter_map(|raw| normalizer.canonical(raw.as_ref()).ok())
            .filter(|key| allowed.as_ref().map_or(true, |set| set.contains(key)))
            .collect();
        Self::with_keys(Arc::clone(&self.directory), keys)
    }

    // ========================================================================
    // Filtering and ordering
    // ========================================================================

    /// Members matching `predicate`
    ///
    /// Entry predicates and field tests on tagged fields never hydrate.
    pub fn filter(&self, predicate: &Predicate) -> Result<FlexCollection> {
        let keys = match predicate {
            Predicate::FieldEq(field, value) if self.is_tagged(field) => self.select_entries(|entry| {
                entry.tag(field).unwrap_or(&Value::Null) == value
            }),
            Predicate::FieldEq(field, value) => self.select_objects(|object| {
                object.data().get_path(field).unwrap_or(&Value::Null) == value
            })?,
            Predicate::Entry(test) => self.select_entries(|entry| test(entry)),
            Predicate::Object(test) => self.select_objects(|object| test(object))?,
        };
        Ok(Self::with_keys(Arc::clone(&self.directory), keys))
    }

    /// Members whose index entry passes `test`
    pub fn filter_entries(&self, test: impl Fn(&IndexEntry) -> bool + Send + Sync + 'static) -> Result<FlexCollection> {
        self.filter(&Predicate::entry(test))
    }

    /// Members whose object passes `test`
    pub fn filter_objects(&self, test: impl Fn(&FlexObject) -> bool + Send + Sync + 'static) -> Result<FlexCollection> {
        self.filter(&Predicate::object(test))
    }

    /// Members sorted by a field; ties keep index order
    ///
    /// `key`, `timestamp` and tagged fields sort without hydration.
    pub fn order_by(&self, field: &str, direction: Direction) -> Result<FlexCollection> {
        let args = [Value::from(field), Value::from(matches!(direction, Direction::Desc))];
        let keys: Vec<StorageKey> = self.call_cached("order_by", &args, || {
            let mut rows: Vec<(StorageKey, Option<Value>)> = if field == "key" || field == "timestamp" || self.is_tagged(field) {
                self.entries()
                    .into_iter()
                    .map(|entry| {
                        let value = match field {
                            "key" => Some(Value::from(entry.key.as_str())),
                            "timestamp" => Some(Value::Int(entry.timestamp)),
                            _ => entry.tag(field).cloned(),
                        };
                        (entry.key, value)
                    })
                    .collect()
            } else {
                self.iter()
                    .map(|object| {
                        let object = object?;
                        let value = object.data().get_path(field).cloned();
                        Ok((object_key(&object)?, value))
                    })
                    .collect::<Result<_>>()?
            };
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.1.as_ref(), b.1.as_ref());
                match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
            Ok(rows.into_iter().map(|(key, _)| key).collect())
        })?;
        Ok(Self::with_keys(Arc::clone(&self.directory), keys))
    }

    /// First member whose `field` equals `value`, ignoring case
    pub fn find(&self, value: &str, field: &str) -> Result<Option<FlexObject>> {
        let args = [Value::from(value), Value::from(field)];
        let needle = value.to_lowercase();
        let found: Option<StorageKey> = self.call_cached("find", &args, || {
            if field == "key" {
                return Ok(self.keys().into_iter().find(|k| k.as_str().to_lowercase() == needle));
            }
            if self.is_tagged(field) {
                return Ok(self.entries().into_iter().find_map(|entry| {
                    let matches = entry
                        .tag(field)
                        .and_then(Value::to_scalar_string)
                        .map_or(false, |s| s.to_lowercase() == needle);
                    matches.then_some(entry.key)
                }));
            }
            for object in self.iter() {
                let object = object?;
                let matches = object
                    .data()
                    .get_path(field)
                    .and_then(Value::to_scalar_string)
                    .map_or(false, |s| s.to_lowercase() == needle);
                if matches {
                    return Ok(Some(object_key(&object)?));
                }
            }
            Ok(None)
        })?;
        match found {
            Some(key) => self.directory.hydrate(&key),
            None => Ok(None),
        }
    }

    /// Modification timestamp of every member, in collection order
    pub fn timestamps(&self) -> Result<Vec<(StorageKey, i64)>> {
        self.call_cached("timestamps", &[], || {
            Ok(self.entries().into_iter().map(|e| (e.key, e.timestamp)).collect())
        })
    }

    /// Key identifying this collection's membership
    pub fn cache_key(&self) -> String {
        format!("{}.{}", self.kind(), self.scope_fingerprint())
    }

    /// Checksum over members and their timestamps; changes on any write
    pub fn cache_checksum(&self) -> Result<String> {
        self.call_cached("cache_checksum", &[], || {
            let entries = self.entries();
            Ok(fingerprint_of(entries.iter().map(|e| (e.key.as_str(), e.timestamp))))
        })
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Aggregate decision of every member
    ///
    /// A single denial decides (`Some(false)`) without looking further.
    /// Otherwise one grant gives `Some(true)`, and no votes at all give
    /// `None`.
    pub fn authorize(&self, action: &str, scope: Option<&str>) -> Result<Option<bool>> {
        let args = [Value::from(action), Value::from(scope)];
        self.call_cached("authorize", &args, || {
            let mut decision = None;
            for object in self.iter() {
                match object?.authorize(action, scope) {
                    Some(false) => return Ok(Some(false)),
                    Some(true) => decision = Some(true),
                    None => {}
                }
            }
            Ok(decision)
        })
    }

    /// Members that grant `scope.action`
    pub fn select_authorized(&self, action: &str, scope: Option<&str>) -> Result<FlexCollection> {
        let args = [Value::from(action), Value::from(scope)];
        let keys: Vec<StorageKey> = self.call_cached("select_authorized", &args, || {
            self.select_objects(|object| object.authorize(action, scope) == Some(true))
        })?;
        Ok(Self::with_keys(Arc::clone(&self.directory), keys))
    }

    // ========================================================================
    // Method cache
    // ========================================================================

    /// Run `compute`, memoizing the result when `method` is cacheable
    pub fn call_cached<T, F>(&self, method: &str, args: &[Value], compute: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        if !Self::is_cacheable(method) {
            debug!(target: "flexdb::collection", kind = %self.kind(), method, "Method isn't cached");
            return compute();
        }
        let (index_fingerprint, index_revision) = self
            .directory
            .with_index(|index| (index.fingerprint().to_string(), index.revision()));
        let scope = self.scope_fingerprint();
        let key = CallSignature {
            kind: self.kind(),
            method,
            args,
            scope: &scope,
            index_fingerprint: &index_fingerprint,
            index_revision,
        }
        .cache_key();
        self.directory.methods().get_or_compute(key, compute)
    }

    /// Drop memoized results after an out-of-band change to member objects
    pub fn notify_changed(&self) {
        self.directory.methods().clear();
        debug!(target: "flexdb::collection", kind = %self.kind(), "Collection cache invalidated");
    }

    fn scope_fingerprint(&self) -> String {
        match &self.scope {
            Scope::All => "all".to_string(),
            Scope::Keys { fingerprint, .. } => fingerprint.clone(),
        }
    }

    fn is_tagged(&self, field: &str) -> bool {
        self.directory
            .with_index(|index| index.tag_fields().iter().any(|f| f == field))
    }

    fn select_entries(&self, test: impl Fn(&IndexEntry) -> bool) -> Vec<StorageKey> {
        self.entries()
            .into_iter()
            .filter(|entry| test(entry))
            .map(|entry| entry.key)
            .collect()
    }

    fn select_objects(&self, test: impl Fn(&FlexObject) -> bool) -> Result<Vec<StorageKey>> {
        let mut keys = Vec::new();
        for object in self.iter() {
            let object = object?;
            if test(&object) {
                keys.push(object_key(&object)?);
            }
        }
        Ok(keys)
    }
}

impl<'a> IntoIterator for &'a FlexCollection {
    type Item = Result<FlexObject>;
    type IntoIter = CollectionIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator hydrating members one at a time
pub struct CollectionIter {
    directory: Arc<FlexDirectory>,
    keys: std::vec::IntoIter<StorageKey>,
}

impl Iterator for CollectionIter {
    type Item = Result<FlexObject>;

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            match self.directory.hydrate(&key) {
                Ok(Some(object)) => return Some(Ok(object)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}

fn object_key(object: &FlexObject) -> Result<StorageKey> {
    object
        .key()
        .cloned()
        .ok_or_else(|| Error::InvalidOperation(format!("{} has no storage key", object.id())))
}

/// Nulls first, then booleans, numbers, strings (case-insensitive), and the rest
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Int(_)) | Some(Value::Float(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Some(x), Some(y)) if rank(a) == 2 && rank(b) == 2 => {
            let (x, y) = (x.as_number().unwrap_or(0.0), y.as_number().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use flexdb_core::Map;
    use flexdb_storage::StreamLocator;
    use tempfile::TempDir;

    fn directory(tmp: &TempDir) -> Arc<FlexDirectory> {
        let locator = StreamLocator::new().with_stream("user", tmp.path());
        FlexDirectory::open(
            "accounts",
            DirectoryConfig::new("user://accounts").with_index_fields(["enabled"]),
            &locator,
        )
        .unwrap()
    }

    fn add(dir: &Arc<FlexDirectory>, key: &str, name: &str, enabled: bool, age: i64) {
        let mut data = Map::new();
        data.insert("name".into(), Value::from(name));
        data.insert("enabled".into(), Value::Bool(enabled));
        data.insert("age".into(), Value::Int(age));
        dir.update(key, data).unwrap();
    }

    fn keys(collection: &FlexCollection) -> Vec<String> {
        collection.keys().into_iter().map(StorageKey::into_string).collect()
    }

    #[test]
    fn test_iteration_follows_index_order() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        add(&dir, "zed", "Zed", true, 30);
        add(&dir, "amy", "Amy", false, 20);
        add(&dir, "kim", "Kim", true, 40);

        let collection = dir.collection();
        assert_eq!(keys(&collection), vec!["zed", "amy", "kim"]);
        let names: Vec<_> = collection
            .iter()
            .map(|o| o.unwrap().get("name").unwrap().cloned().unwrap())
            .collect();
        assert_eq!(names, vec![Value::from("Zed"), Value::from("Amy"), Value::from("Kim")]);
        assert_eq!(collection.objects().unwrap().len(), 3);
        assert!(collection.contains("AMY"));
        assert!(collection.get("nobody").unwrap().is_none());
    }

    #[test]
    fn test_filter_paths() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        add(&dir, "a", "A", true, 30);
        add(&dir, "b", "B", false, 20);
        add(&dir, "c", "C", true, 20);
        let collection = dir.collection();

        let enabled = collection.filter(&Predicate::field_eq("enabled", true)).unwrap();
        assert_eq!(keys(&enabled), vec!["a", "c"]);

        let twenty = collection.filter(&Predicate::field_eq("age", 20)).unwrap();
        assert_eq!(keys(&twenty), vec!["b", "c"]);

        let both = enabled.filter_objects(|o| o.get("age").ok().flatten() == Some(&Value::Int(20))).unwrap();
        assert_eq!(keys(&both), vec!["c"]);
        assert!(!both.contains("a"));
        assert!(both.get("a").unwrap().is_none());

        let recent = collection.filter_entries(|e| e.key.as_str() != "b").unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_order_by_and_find() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        add(&dir, "a", "bob", true, 30);
        add(&dir, "b", "Alice", false, 20);
        add(&dir, "c", "carl", true, 25);
        let collection = dir.collection();

        assert_eq!(keys(&collection.order_by("name", Direction::Asc).unwrap()), vec!["b", "a", "c"]);
        assert_eq!(keys(&collection.order_by("age", Direction::Desc).unwrap()), vec!["a", "c", "b"]);
        assert_eq!(keys(&collection.order_by("enabled", Direction::Asc).unwrap()), vec!["b", "a", "c"]);
        assert_eq!(keys(&collection.order_by("key", Direction::Desc).unwrap()), vec!["c", "b", "a"]);

        let alice = collection.find("ALICE", "name").unwrap().unwrap();
        assert_eq!(alice.key().map(StorageKey::as_str), Some("b"));
        assert!(collection.find("nobody", "name").unwrap().is_none());
    }

    #[test]
    fn test_cache_key_depends_on_scope() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        add(&dir, "a", "A", true, 1);
        add(&dir, "b", "B", true, 1);
        let all = dir.collection();
        let sub = all.subset(["b"]);
        assert_ne!(all.cache_key(), sub.cache_key());
        assert_eq!(sub.cache_key(), all.subset(["B"]).cache_key());

        let before = all.cache_checksum().unwrap();
        add(&dir, "c", "C", true, 1);
        assert_ne!(before, all.cache_checksum().unwrap());
    }

    #[test]
    fn test_uncached_method_always_runs() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        let collection = dir.collection();
        let mut runs = 0;
        for _ in 0..2 {
            collection
                .call_cached("render", &[], || {
                    runs += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(runs, 2);
        assert!(FlexCollection::is_cacheable("authorize"));
        assert!(FlexCollection::cached_methods().all(|m| m != "render"));
    }

    #[test]
    fn test_notify_changed_drops_results() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        add(&dir, "a", "A", true, 1);
        let collection = dir.collection();
        let _ = collection.timestamps().unwrap();
        assert!(!dir.methods().is_empty());
        collection.notify_changed();
        assert!(dir.methods().is_empty());
    }

    #[test]
    fn test_vanished_record_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        add(&dir, "a", "A", true, 1);
        add(&dir, "b", "B", true, 1);
        dir.clear_cache();
        std::fs::remove_dir_all(tmp.path().join("accounts").join("a")).unwrap();

        let objects = dir.collection().objects().unwrap();
        assert_eq!(objects.len(), 1);
    }
}
