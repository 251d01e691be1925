//! Key/value storage interface and backends.
//!
//! Keys are slash-delimited paths with exactly two segments below the
//! root: `/entities/<id>` and `/groups/<name>`. Other prefixes are
//! reserved; mutating them emits no event and logs at warn. Values are
//! opaque record bytes; backends are forbidden from interpreting them.
//!
//! Each mutation fires an event `{primary_key, kind}` on the store's
//! registered sink, synchronously on the mutating thread, before
//! `put`/`delete` returns and after the backend has released its internal
//! locks (so a sink may read back through the same store).
//!
//! Backends register themselves in a process-wide first-writer-wins
//! table and are selected by the `db.backend` config value.

mod filesystem;
mod memory;
mod sqlite;

use std::sync::{Arc, RwLock};

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};
use crate::registry::Registry;

/// Prefix for entity records.
pub const ENTITY_PREFIX: &str = "/entities/";

/// Prefix for group records.
pub const GROUP_PREFIX: &str = "/groups/";

/// Storage key for the entity record of `id`.
#[must_use]
pub fn entity_key(id: &str) -> String {
    format!("{ENTITY_PREFIX}{id}")
}

/// Storage key for the group record of `name`.
#[must_use]
pub fn group_key(name: &str) -> String {
    format!("{GROUP_PREFIX}{name}")
}

/// What a mutation event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    EntityUpdate,
    EntityDestroy,
    GroupUpdate,
    GroupDestroy,
}

/// A mutation notification delivered to the store's sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
    /// Last path segment of the mutated key.
    pub primary_key: String,
    /// Kind of mutation.
    pub kind: EventKind,
}

/// Sink invoked synchronously for every reserved-prefix mutation.
pub type EventSink = Box<dyn Fn(KvEvent) + Send + Sync>;

/// Optional store capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCapability {
    /// The store is intended to accept writes.
    Mutable,
}

/// The storage interface required by the tree.
pub trait KvStore: Send + Sync {
    /// Atomically overwrites `key` with `value` and fires an update event.
    ///
    /// # Errors
    ///
    /// Reports only genuine I/O failures, or [`Error::PathEscape`] for a
    /// key that would leave the storage root.
    fn put(&self, ctx: &OpContext, key: &str, value: &[u8]) -> Result<()>;

    /// Fetches the value stored at `key`.
    ///
    /// # Errors
    ///
    /// [`Error::NoValue`] when the key is absent; I/O failures otherwise.
    fn get(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>>;

    /// Removes `key`, firing a delete event if it existed. Idempotent:
    /// deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Reports only genuine I/O failures or [`Error::PathEscape`].
    fn delete(&self, ctx: &OpContext, key: &str) -> Result<()>;

    /// Enumerates keys matching `glob`, where `*` and `?` match within a
    /// single path segment.
    ///
    /// # Errors
    ///
    /// Reports only genuine I/O failures.
    fn keys(&self, ctx: &OpContext, glob: &str) -> Result<Vec<String>>;

    /// Advertised capabilities. Callers may reject a store lacking
    /// [`StoreCapability::Mutable`] before attempting writes.
    fn capabilities(&self) -> Vec<StoreCapability>;

    /// Registers the single event sink for this store instance,
    /// replacing any prior sink.
    fn set_event_sink(&self, sink: EventSink);

    /// Flushes and releases the store.
    ///
    /// # Errors
    ///
    /// Reports flush failures.
    fn close(&self) -> Result<()>;
}

/// Factory signature for registered KV backends.
pub type StoreFactory = fn(&ServerConfig) -> Result<Arc<dyn KvStore>>;

/// Process-wide KV backend table.
pub static STORES: Registry<StoreFactory> = Registry::new();

/// Instantiates the backend selected by `db.backend`.
///
/// # Errors
///
/// Returns [`Error::Internal`] for an unregistered backend name, or the
/// factory's own error.
pub fn from_config(config: &ServerConfig) -> Result<Arc<dyn KvStore>> {
    let factory = STORES.get(&config.db.backend).ok_or_else(|| {
        Error::internal(format!("unknown db backend {:?}", config.db.backend))
    })?;
    factory(config)
}

/// Rejects keys that would escape the storage root.
///
/// # Errors
///
/// [`Error::PathEscape`] for relative keys, `..` segments, or empty
/// segments.
pub fn validate_key(key: &str) -> Result<()> {
    if !key.starts_with('/') {
        return Err(Error::PathEscape);
    }
    for segment in key[1..].split('/') {
        if segment.is_empty() || segment == ".." || segment == "." {
            return Err(Error::PathEscape);
        }
    }
    Ok(())
}

/// Shell-style glob over full keys; `*` and `?` never cross a `/`.
#[must_use]
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    // The pattern above is generated from escaped literals and two fixed
    // classes, so compilation cannot fail on well-formed input.
    regex::Regex::new(&regex).map_or(false, |re| re.is_match(key))
}

/// Sink holder shared by all backends.
///
/// Classification happens here so each backend only reports "this key was
/// put/deleted". Mutations outside the reserved prefixes emit no event
/// and log at warn.
#[derive(Default)]
pub struct EventDispatcher {
    sink: RwLock<Option<EventSink>>,
}

impl EventDispatcher {
    /// Replaces the registered sink.
    pub fn set_sink(&self, sink: EventSink) {
        let mut guard = match self.sink.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(sink);
    }

    /// Fires the update event for `key`, if it classifies.
    pub fn notify_put(&self, key: &str) {
        self.notify(key, false);
    }

    /// Fires the delete event for `key`, if it classifies.
    pub fn notify_delete(&self, key: &str) {
        self.notify(key, true);
    }

    fn notify(&self, key: &str, deleted: bool) {
        let Some(event) = classify(key, deleted) else {
            tracing::warn!(key, "mutation outside reserved prefixes emits no event");
            return;
        };
        let guard = match self.sink.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sink) = guard.as_ref() {
            sink(event);
        }
    }
}

fn classify(key: &str, deleted: bool) -> Option<KvEvent> {
    if let Some(id) = key.strip_prefix(ENTITY_PREFIX) {
        if !id.is_empty() && !id.contains('/') {
            return Some(KvEvent {
                primary_key: id.to_string(),
                kind: if deleted {
                    EventKind::EntityDestroy
                } else {
                    EventKind::EntityUpdate
                },
            });
        }
    }
    if let Some(name) = key.strip_prefix(GROUP_PREFIX) {
        if !name.is_empty() && !name.contains('/') {
            return Some(KvEvent {
                primary_key: name.to_string(),
                kind: if deleted {
                    EventKind::GroupDestroy
                } else {
                    EventKind::GroupUpdate
                },
            });
        }
    }
    None
}

/// Registers the built-in KV backends. First writer wins, so calling
/// this more than once is harmless.
pub fn register_builtin() {
    STORES.register("memory", MemoryStore::factory);
    STORES.register("filesystem", FilesystemStore::factory);
    STORES.register("sqlite", SqliteStore::factory);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn key_helpers_compose_reserved_prefixes() {
        assert_eq!(entity_key("alice"), "/entities/alice");
        assert_eq!(group_key("ops"), "/groups/ops");
    }

    #[test]
    fn validate_key_rejects_escapes() {
        assert_eq!(validate_key("entities/x"), Err(Error::PathEscape));
        assert_eq!(validate_key("/entities/../x"), Err(Error::PathEscape));
        assert_eq!(validate_key("/entities//x"), Err(Error::PathEscape));
        assert_eq!(validate_key("/entities/./x"), Err(Error::PathEscape));
        assert!(validate_key("/entities/alice").is_ok());
        assert!(validate_key("/.mutable").is_ok());
    }

    #[test]
    fn glob_matches_single_segments_only() {
        assert!(glob_match("/entities/*", "/entities/alice"));
        assert!(!glob_match("/entities/*", "/groups/ops"));
        assert!(!glob_match("/*", "/entities/alice"));
        assert!(glob_match("/entities/a?ice", "/entities/alice"));
        assert!(!glob_match("/entities/a?ice", "/entities/ice"));
        assert!(glob_match("/entities/alice", "/entities/alice"));
    }

    #[test]
    fn classify_reserved_prefixes() {
        assert_eq!(
            classify("/entities/alice", false),
            Some(KvEvent {
                primary_key: "alice".to_string(),
                kind: EventKind::EntityUpdate,
            })
        );
        assert_eq!(
            classify("/groups/ops", true),
            Some(KvEvent {
                primary_key: "ops".to_string(),
                kind: EventKind::GroupDestroy,
            })
        );
        assert_eq!(classify("/.mutable", false), None);
        assert_eq!(classify("/entities/a/b", false), None);
    }

    #[test]
    fn dispatcher_delivers_to_registered_sink() {
        let dispatcher = EventDispatcher::default();
        let seen: Arc<Mutex<Vec<KvEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        dispatcher.set_sink(Box::new(move |event| {
            sink_seen.lock().unwrap().push(event);
        }));

        dispatcher.notify_put("/entities/alice");
        dispatcher.notify_delete("/groups/ops");
        dispatcher.notify_put("/other/thing");

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::EntityUpdate);
        assert_eq!(events[1].kind, EventKind::GroupDestroy);
    }
}
