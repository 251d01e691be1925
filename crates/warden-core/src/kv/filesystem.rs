//! Filesystem KV backend.
//!
//! One file per key beneath the data root: `/entities/<id>` maps to
//! `<root>/entities/<id>`. Writes go through a temp file and rename so a
//! crash never leaves a torn record. A `.mutable` marker file at the root
//! gates the `Mutable` capability; the marker is created only when this
//! process initializes a brand-new root. An `fs2` advisory lock on
//! `<root>/.lock` keeps two processes from sharing the root.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;

use super::{
    EventDispatcher, EventSink, KvStore, StoreCapability, glob_match, validate_key,
};
use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};

const MUTABLE_MARKER: &str = ".mutable";
const LOCK_FILE: &str = ".lock";

/// File-per-key store rooted at a data directory.
pub struct FilesystemStore {
    root: PathBuf,
    lock: File,
    mutable: bool,
    events: EventDispatcher,
}

impl FilesystemStore {
    /// Opens (initializing if absent) the store at `root`.
    ///
    /// A brand-new root receives the `.mutable` marker; an existing root
    /// is taken as provisioned and its marker state is respected.
    ///
    /// # Errors
    ///
    /// Fails when the root cannot be created or another process holds
    /// the root lock.
    pub fn open(root: &Path) -> Result<Self> {
        let fresh = !root.exists();
        fs::create_dir_all(root)
            .map_err(|e| Error::internal(format!("cannot create storage root: {e}")))?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(LOCK_FILE))
            .map_err(|e| Error::internal(format!("cannot open storage lock: {e}")))?;
        lock.try_lock_exclusive()
            .map_err(|_| Error::internal("storage root is locked by another process"))?;

        if fresh {
            fs::write(root.join(MUTABLE_MARKER), b"")
                .map_err(|e| Error::internal(format!("cannot mark fresh root mutable: {e}")))?;
            tracing::info!(root = %root.display(), "initialized fresh storage root");
        }
        let mutable = root.join(MUTABLE_MARKER).exists();
        if !mutable {
            tracing::warn!(root = %root.display(), "storage root lacks .mutable marker");
        }

        Ok(Self {
            root: root.to_path_buf(),
            lock,
            mutable,
            events: EventDispatcher::default(),
        })
    }

    /// Registered factory for the `filesystem` backend.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::open`] failures.
    pub fn factory(config: &ServerConfig) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(Self::open(&config.core.home)?))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(&key[1..]))
    }
}

impl KvStore for FilesystemStore {
    fn put(&self, ctx: &OpContext, key: &str, value: &[u8]) -> Result<()> {
        ctx.check()?;
        let path = self.key_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::internal("key has no parent directory"))?;
        fs::create_dir_all(parent)
            .map_err(|e| Error::internal(format!("cannot create key directory: {e}")))?;

        // Temp-then-rename keeps the record whole across a crash.
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(Error::PathEscape)?;
        let tmp = parent.join(format!(".tmp-{file_name}"));
        {
            let mut out = File::create(&tmp)
                .map_err(|e| Error::internal(format!("cannot create temp record: {e}")))?;
            out.write_all(value)
                .map_err(|e| Error::internal(format!("cannot write record: {e}")))?;
            out.sync_all()
                .map_err(|e| Error::internal(format!("cannot sync record: {e}")))?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| Error::internal(format!("cannot commit record: {e}")))?;

        self.events.notify_put(key);
        Ok(())
    }

    fn get(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>> {
        ctx.check()?;
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NoValue),
            Err(e) => Err(Error::internal(format!("cannot read record: {e}"))),
        }
    }

    fn delete(&self, ctx: &OpContext, key: &str) -> Result<()> {
        ctx.check()?;
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.events.notify_delete(key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal(format!("cannot delete record: {e}"))),
        }
    }

    fn keys(&self, ctx: &OpContext, glob: &str) -> Result<Vec<String>> {
        ctx.check()?;
        let mut keys = Vec::new();
        collect_keys(&self.root, "", &mut keys)?;
        keys.retain(|k| glob_match(glob, k));
        keys.sort();
        Ok(keys)
    }

    fn capabilities(&self) -> Vec<StoreCapability> {
        if self.mutable {
            vec![StoreCapability::Mutable]
        } else {
            Vec::new()
        }
    }

    fn set_event_sink(&self, sink: EventSink) {
        self.events.set_sink(sink);
    }

    fn close(&self) -> Result<()> {
        FileExt::unlock(&self.lock)
            .map_err(|e| Error::internal(format!("cannot release storage lock: {e}")))
    }
}

fn collect_keys(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::internal(format!("cannot list storage root: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::internal(format!("cannot list key: {e}")))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        // Markers, locks, and in-flight temp files never surface as keys.
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let key = format!("{prefix}/{name}");
        if path.is_dir() {
            collect_keys(&path, &key, out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_root_is_mutable_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let store = FilesystemStore::open(&root).unwrap();
        let ctx = OpContext::background();

        assert_eq!(store.capabilities(), vec![StoreCapability::Mutable]);

        store.put(&ctx, "/entities/alice", b"record").unwrap();
        assert_eq!(store.get(&ctx, "/entities/alice").unwrap(), b"record");

        store.put(&ctx, "/entities/alice", b"updated").unwrap();
        assert_eq!(store.get(&ctx, "/entities/alice").unwrap(), b"updated");

        store.delete(&ctx, "/entities/alice").unwrap();
        assert_eq!(store.get(&ctx, "/entities/alice"), Err(Error::NoValue));
        store.close().unwrap();
    }

    #[test]
    fn missing_marker_drops_mutable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        {
            let store = FilesystemStore::open(&root).unwrap();
            store.close().unwrap();
        }
        fs::remove_file(root.join(MUTABLE_MARKER)).unwrap();
        let store = FilesystemStore::open(&root).unwrap();
        assert!(store.capabilities().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn keys_skip_internal_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let store = FilesystemStore::open(&root).unwrap();
        let ctx = OpContext::background();

        store.put(&ctx, "/entities/alice", b"a").unwrap();
        store.put(&ctx, "/groups/ops", b"g").unwrap();

        assert_eq!(
            store.keys(&ctx, "/entities/*").unwrap(),
            vec!["/entities/alice"]
        );
        // The lock and marker files never appear, under any glob.
        let all_entities = store.keys(&ctx, "/*").unwrap();
        assert!(all_entities.is_empty());
        store.close().unwrap();
    }

    #[test]
    fn path_escape_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let store = FilesystemStore::open(&root).unwrap();
        let ctx = OpContext::background();

        assert_eq!(
            store.put(&ctx, "/entities/../../etc/passwd", b"x"),
            Err(Error::PathEscape)
        );
        store.close().unwrap();
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let store = FilesystemStore::open(&root).unwrap();
        let ctx = OpContext::background();
        assert!(store.delete(&ctx, "/entities/ghost").is_ok());
        store.close().unwrap();
    }
}
