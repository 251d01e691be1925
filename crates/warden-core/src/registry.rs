//! Process-wide backend registries.
//!
//! Crypto, token, key provider, and KV backends self-register at process
//! start into one of these tables. Registration is append-only with
//! first-writer-wins semantics; lookups take a read lock only. A config
//! selector string picks a backend at boot; there is no implicit
//! last-registered-wins at request time.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// A named table of backend factories.
///
/// `F` is a factory value, normally a `fn` pointer, so entries are `Copy`
/// and lookups hand out the factory itself.
pub struct Registry<F> {
    inner: OnceLock<RwLock<HashMap<String, F>>>,
}

impl<F: Clone> Registry<F> {
    /// Creates an empty registry, usable in `static` position.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    fn table(&self) -> &RwLock<HashMap<String, F>> {
        self.inner.get_or_init(|| RwLock::new(HashMap::new()))
    }

    /// Registers a factory under `name`.
    ///
    /// Returns `false` (and leaves the table unchanged) when the name is
    /// already taken: first writer wins.
    pub fn register(&self, name: &str, factory: F) -> bool {
        let mut table = match self.table().write() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        if table.contains_key(name) {
            tracing::warn!(backend = name, "duplicate backend registration ignored");
            return false;
        }
        table.insert(name.to_string(), factory);
        true
    }

    /// Looks up the factory registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<F> {
        let table = match self.table().read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.get(name).cloned()
    }

    /// Returns the registered backend names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let table = match self.table().read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = table.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<F: Clone> Default for Registry<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.register("memory", 1));
        assert!(!registry.register("memory", 2));
        assert_eq!(registry.get("memory"), Some(1));
    }

    #[test]
    fn missing_name_is_none() {
        let registry: Registry<u32> = Registry::new();
        assert_eq!(registry.get("nope"), None);
    }

    #[test]
    fn names_are_sorted() {
        let registry: Registry<u32> = Registry::new();
        registry.register("sqlite", 1);
        registry.register("filesystem", 2);
        registry.register("memory", 3);
        assert_eq!(registry.names(), vec!["filesystem", "memory", "sqlite"]);
    }
}
