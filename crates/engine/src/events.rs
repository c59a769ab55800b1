//! Synchronous object events
//!
//! Listeners run in subscription order, on the caller's thread, and receive
//! a mutable [`ObjectEvent`]. Whatever they leave in the event is what the
//! caller continues with. On `before_*` events a listener returning an
//! error aborts the operation before anything is written. `after_*` and
//! `renamed` are published with [`EventBus::notify`] once the change is
//! committed; listener errors there are logged and never undo the change.

use flexdb_core::{Identifier, Map, Record, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Published before a record is validated and written; `data` is mutable
pub const BEFORE_SAVE: &str = "flex.object.before_save";
/// Published after a record and its index entry were written
pub const AFTER_SAVE: &str = "flex.object.after_save";
/// Published before a record is removed
pub const BEFORE_DELETE: &str = "flex.object.before_delete";
/// Published after a record and its index entry were removed
pub const AFTER_DELETE: &str = "flex.object.after_delete";
/// Published after a record moved to a new key
pub const RENAMED: &str = "flex.object.renamed";

/// Mutable context passed to listeners
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    /// Object the event is about
    pub identifier: Identifier,
    /// Record data; listeners may change it on `BEFORE_SAVE`
    pub data: Record,
    /// Free-form values listeners can use to talk to each other
    pub attributes: Map,
}

impl ObjectEvent {
    /// Event for an object and its data
    pub fn new(identifier: Identifier, data: Record) -> Self {
        ObjectEvent {
            identifier,
            data,
            attributes: Map::new(),
        }
    }
}

type Listener = Arc<dyn Fn(&mut ObjectEvent) -> Result<()> + Send + Sync>;

/// Named event → ordered listener list
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventBus")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventBus {
    /// Bus without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event`
    pub fn subscribe<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&mut ObjectEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Number of listeners for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Run every listener for `event` and return the (possibly changed) event
    ///
    /// Listeners may subscribe further listeners; those run from the next
    /// publish on.
    pub fn publish(&self, event: &str, mut payload: ObjectEvent) -> Result<ObjectEvent> {
        let listeners = match self.listeners.read().get(event) {
            Some(list) => list.clone(),
            None => return Ok(payload),
        };
        for listener in listeners {
            listener(&mut payload)?;
        }
        Ok(payload)
    }

    /// Run every listener for a committed change
    ///
    /// Every listener runs even when an earlier one fails; failures are
    /// logged and counted.
    pub fn notify(&self, event: &str, mut payload: ObjectEvent) -> usize {
        let listeners = match self.listeners.read().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };
        let mut failed = 0;
        for listener in listeners {
            if let Err(e) = listener(&mut payload) {
                warn!(target: "flexdb::object", event, id = %payload.identifier, error = %e, "Listener failed after commit");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexdb_core::{Error, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> ObjectEvent {
        ObjectEvent::new(Identifier::new("accounts", "alice"), Record::new().with("name", "alice"))
    }

    #[test]
    fn test_publish_without_listeners_returns_payload() {
        let bus = EventBus::new();
        let out = bus.publish(BEFORE_SAVE, event()).unwrap();
        assert_eq!(out.data.get("name"), Some(&Value::from("alice")));
    }

    #[test]
    fn test_listeners_mutate_in_order() {
        let bus = EventBus::new();
        bus.subscribe(BEFORE_SAVE, |e: &mut ObjectEvent| {
            e.data.insert("name", "Alice");
            Ok(())
        });
        bus.subscribe(BEFORE_SAVE, |e: &mut ObjectEvent| {
            let name = e.data.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            e.data.insert("display", format!("{} (edited)", name));
            Ok(())
        });
        assert_eq!(bus.listener_count(BEFORE_SAVE), 2);

        let out = bus.publish(BEFORE_SAVE, event()).unwrap();
        assert_eq!(out.data.get("display"), Some(&Value::from("Alice (edited)")));
    }

    #[test]
    fn test_listener_error_stops_chain() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(BEFORE_DELETE, |_e: &mut ObjectEvent| {
            Err(Error::InvalidOperation("locked".into()))
        });
        let seen = calls.clone();
        bus.subscribe(BEFORE_DELETE, move |_e: &mut ObjectEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.publish(BEFORE_DELETE, event()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_events_are_independent() {
        let bus = EventBus::new();
        bus.subscribe(AFTER_SAVE, |_e: &mut ObjectEvent| Err(Error::InvalidOperation("x".into())));
        assert!(bus.publish(AFTER_DELETE, event()).is_ok());
        assert_eq!(bus.listener_count(RENAMED), 0);
    }

    #[test]
    fn test_notify_runs_every_listener() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(AFTER_SAVE, |_e: &mut ObjectEvent| Err(Error::InvalidOperation("mailer down".into())));
        let seen = calls.clone();
        bus.subscribe(AFTER_SAVE, move |_e: &mut ObjectEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.notify(AFTER_SAVE, event()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.notify(RENAMED, event()), 0);
    }
}
