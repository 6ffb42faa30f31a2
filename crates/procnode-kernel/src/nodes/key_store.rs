//! Key-store node: a directory of dynamically named files over a map.
//!
//! Every key is a file directly under the node's directory. Keys are not
//! declared up front; a write session on a new name creates the key when it
//! closes. Plugins use this for arbitrary state they want visible (and
//! editable) from outside the process.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::error::{ProcError, ProcResult};
use crate::node::{ancestor_children, NodeDir, ProcNode, Session};
use crate::path;
use crate::types::{NodeKind, OpenFlags};

/// Serves one file per key from an in-memory map.
#[derive(Debug)]
pub struct KeyStoreNode {
    dir: NodeDir,
    entries: RwLock<HashMap<String, Vec<u8>>>,
    session: Mutex<Option<KeySession>>,
}

#[derive(Debug)]
struct KeySession {
    key: String,
    inner: Session,
}

impl KeyStoreNode {
    /// Create an empty store rooted at `dir`.
    pub fn new(dir: impl Into<NodeDir>) -> Self {
        Self {
            dir: dir.into(),
            entries: RwLock::new(HashMap::new()),
            session: Mutex::new(None),
        }
    }

    /// Key addressed by `path`, if `path` is a valid key file of this store.
    fn key_for(&self, path: &str) -> Option<String> {
        let path = path::clean(path);
        let parent = path::parent(&path)?;
        if parent != self.dir.resolve() {
            return None;
        }
        path::file_name(&path)
            .filter(|name| path::is_valid_name(name))
            .map(str::to_string)
    }

    fn require_key(&self, path: &str) -> ProcResult<String> {
        self.key_for(path).ok_or_else(|| ProcError::not_found(path))
    }

    // ========================================================================
    // Publisher access
    // ========================================================================

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    /// Set `key` directly, bypassing sessions.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> ProcResult<()> {
        let key = key.into();
        if !path::is_valid_name(&key) {
            return Err(ProcError::invalid_path(key));
        }
        self.entries.write().insert(key, value.into());
        Ok(())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.write().remove(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ProcNode for KeyStoreNode {
    fn kind(&self) -> NodeKind {
        NodeKind::KeyStore
    }

    fn directory(&self) -> String {
        self.dir.resolve()
    }

    fn matches_any_directory(&self, path: &str) -> bool {
        path::is_ancestor_or_self(&path::clean(path), &self.dir.resolve())
    }

    fn matches_file(&self, path: &str) -> bool {
        self.key_for(path).is_some()
    }

    fn direct_children(&self, path: &str) -> Vec<String> {
        let path = path::clean(path);
        let dir = self.dir.resolve();
        if path == dir {
            return self.keys();
        }
        ancestor_children(&path, &dir)
    }

    fn is_writable(&self, path: &str) -> bool {
        self.matches_file(path)
    }

    /// Unknown keys are NotFound so "exists but empty" stays distinct from
    /// "never written".
    fn size_for(&self, path: &str) -> ProcResult<u64> {
        let key = self.require_key(path)?;
        self.entries
            .read()
            .get(&key)
            .map(|value| value.len() as u64)
            .ok_or_else(|| ProcError::not_found(path))
    }

    fn set_size(&self, path: &str, size: u64) -> ProcResult<()> {
        let key = self.require_key(path)?;
        {
            let mut session = self.session.lock();
            if let Some(s) = session
                .as_mut()
                .filter(|s| s.key == key && s.inner.flags.write)
            {
                return s.inner.truncate(size);
            }
        }

        let mut entries = self.entries.write();
        let value = entries
            .get_mut(&key)
            .ok_or_else(|| ProcError::not_found(path))?;
        if size > value.len() as u64 {
            return Err(ProcError::unsupported(format!(
                "growing {path} to {size} bytes"
            )));
        }
        value.truncate(size as usize);
        Ok(())
    }

    fn open(&self, path: &str, flags: OpenFlags) -> ProcResult<()> {
        let key = self.require_key(path)?;
        if !flags.read && !flags.write {
            return Err(ProcError::access_conflict("no access mode requested"));
        }

        let mut session = self.session.lock();
        if let Some(open) = session.as_ref() {
            return Err(ProcError::access_conflict(format!(
                "key store busy with {}",
                open.inner.path
            )));
        }

        let snapshot = if flags.read {
            match self.entries.read().get(&key) {
                Some(value) => value.clone(),
                None if flags.write => Vec::new(),
                None => return Err(ProcError::not_found(path)),
            }
        } else {
            Vec::new()
        };

        let file_path = path::join(&self.dir.resolve(), &key);
        tracing::debug!(path = %file_path, flags = %flags, "key-store session opened");
        *session = Some(KeySession {
            key,
            inner: Session::new(file_path, flags, snapshot),
        });
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> ProcResult<usize> {
        let session = self.session.lock();
        session
            .as_ref()
            .ok_or(ProcError::NoOpenSession)?
            .inner
            .read_at(offset, buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> ProcResult<usize> {
        let mut session = self.session.lock();
        session
            .as_mut()
            .ok_or(ProcError::NoOpenSession)?
            .inner
            .write_at(offset, data)
    }

    /// Write sessions always leave the key behind, even with no writes.
    fn close(&self) -> ProcResult<()> {
        let mut guard = self.session.lock();
        let closed = guard.take().ok_or(ProcError::NoOpenSession)?;
        if closed.inner.flags.write {
            let mut entries = self.entries.write();
            if closed.inner.dirty {
                entries.insert(closed.key.clone(), closed.inner.pending);
            } else {
                entries.entry(closed.key.clone()).or_default();
            }
        }
        tracing::debug!(key = %closed.key, "key-store session closed");
        Ok(())
    }
}
