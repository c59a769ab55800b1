//! Row preparation hooks
//!
//! Backends run every record through a [`RowPipeline`] before writing it.
//! A transform must be idempotent: `prepare(prepare(r)) == prepare(r)`.
//! Pipelines compose: a backend-specific pipeline usually starts with the
//! shared steps and appends its own.

use flexdb_core::{Record, Value};
use std::fmt;
use std::sync::Arc;

/// Pure transform applied to a record before it is persisted
pub trait RowTransform: Send + Sync {
    /// Return the record as it should be written
    fn prepare(&self, row: Record) -> Record;
}

impl<F> RowTransform for F
where
    F: Fn(Record) -> Record + Send + Sync,
{
    fn prepare(&self, row: Record) -> Record {
        self(row)
    }
}

/// Ordered list of transforms
#[derive(Clone, Default)]
pub struct RowPipeline {
    steps: Vec<Arc<dyn RowTransform>>,
}

impl fmt::Debug for RowPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowPipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl RowPipeline {
    /// Empty pipeline (identity)
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn then(mut self, step: impl RowTransform + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Append a shared step in place
    pub fn push(&mut self, step: Arc<dyn RowTransform>) {
        self.steps.push(step);
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True for the identity pipeline
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl RowTransform for RowPipeline {
    fn prepare(&self, row: Record) -> Record {
        self.steps.iter().fold(row, |row, step| step.prepare(row))
    }
}

/// Drops fields that only make sense in memory
#[derive(Debug, Clone)]
pub struct StripFields {
    fields: Vec<String>,
}

impl StripFields {
    /// Strip the named top-level fields
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StripFields {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl RowTransform for StripFields {
    fn prepare(&self, mut row: Record) -> Record {
        for field in &self.fields {
            row.remove(field);
        }
        row
    }
}

/// Moves a top-level field into a section of the persisted record
///
/// `RelocateField::new("access", "security")` turns `{access: {...}}` into
/// `{security: {access: {...}}}`. A section that exists but is not a map is
/// left alone together with the field.
#[derive(Debug, Clone)]
pub struct RelocateField {
    field: String,
    section: String,
}

impl RelocateField {
    /// Move `field` under `section`
    pub fn new(field: impl Into<String>, section: impl Into<String>) -> Self {
        RelocateField {
            field: field.into(),
            section: section.into(),
        }
    }

    /// Dot path where the field ends up
    pub fn target_path(&self) -> String {
        format!("{}.{}", self.section, self.field)
    }
}

impl RowTransform for RelocateField {
    fn prepare(&self, mut row: Record) -> Record {
        if self.field == self.section {
            return row;
        }
        let section_ok = row.get(&self.section).map_or(true, Value::is_object);
        if !section_ok {
            return row;
        }
        let Some(value) = row.remove(&self.field) else {
            return row;
        };

        let fields = row.fields_mut();
        let section = fields
            .entry(self.section.clone())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(map) = section.as_object_mut() {
            map.insert(self.field.clone(), value);
        }
        row
    }
}
