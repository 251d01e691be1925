//! In-memory KV backend.
//!
//! The default backend for tests and ephemeral deployments. Always
//! advertises `Mutable`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{
    EventDispatcher, EventSink, KvStore, StoreCapability, glob_match, validate_key,
};
use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};

/// HashMap-backed store.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
    events: EventDispatcher,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered factory for the `memory` backend.
    ///
    /// # Errors
    ///
    /// Infallible; the signature matches the registry.
    pub fn factory(_config: &ServerConfig) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(Self::new()))
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .read()
            .map_err(|_| Error::internal("memory store lock poisoned"))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .write()
            .map_err(|_| Error::internal("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn put(&self, ctx: &OpContext, key: &str, value: &[u8]) -> Result<()> {
        ctx.check()?;
        validate_key(key)?;
        {
            let mut data = self.lock_write()?;
            data.insert(key.to_string(), value.to_vec());
        }
        // Sink runs after the lock is released so it may read back.
        self.events.notify_put(key);
        Ok(())
    }

    fn get(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>> {
        ctx.check()?;
        validate_key(key)?;
        let data = self.lock_read()?;
        data.get(key).cloned().ok_or(Error::NoValue)
    }

    fn delete(&self, ctx: &OpContext, key: &str) -> Result<()> {
        ctx.check()?;
        validate_key(key)?;
        let existed = {
            let mut data = self.lock_write()?;
            data.remove(key).is_some()
        };
        if existed {
            self.events.notify_delete(key);
        }
        Ok(())
    }

    fn keys(&self, ctx: &OpContext, glob: &str) -> Result<Vec<String>> {
        ctx.check()?;
        let data = self.lock_read()?;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|k| glob_match(glob, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn capabilities(&self) -> Vec<StoreCapability> {
        vec![StoreCapability::Mutable]
    }

    fn set_event_sink(&self, sink: EventSink) {
        self.events.set_sink(sink);
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
