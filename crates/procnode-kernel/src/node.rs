//! The node contract and the pieces the built-in node kinds share.
//!
//! A node owns one subtree of the namespace. It answers path questions
//! (`matches_any_directory`, `matches_file`, `direct_children`), reports sizes,
//! and runs at most one open-to-close session at a time.

use std::fmt;
use std::sync::Arc;

use crate::config::MAX_PENDING_BYTES;
use crate::error::{ProcError, ProcResult};
use crate::path;
use crate::types::{NodeKind, OpenFlags};

/// Produces a file's current content on demand.
///
/// May be called from whichever thread the external caller uses, concurrently
/// with the publisher mutating whatever it reads.
pub type Provider = Arc<dyn Fn() -> anyhow::Result<Vec<u8>> + Send + Sync>;

/// Receives a file's full written content when a write session closes.
pub type Sink = Arc<dyn Fn(Vec<u8>) -> anyhow::Result<()> + Send + Sync>;

/// Capability every backing object implements.
///
/// Paths passed in are expected to be normalized (see [`crate::path`]); the
/// built-in nodes clean them again so a trailing `/` is harmless.
pub trait ProcNode: Send + Sync + fmt::Debug {
    /// Which node kind this is.
    fn kind(&self) -> NodeKind;

    /// The directory this node serves, as currently resolved.
    fn directory(&self) -> String;

    /// True if `path` is this node's directory or one of its ancestors.
    fn matches_any_directory(&self, path: &str) -> bool;

    /// True if `path` is exactly a file this node serves.
    fn matches_file(&self, path: &str) -> bool;

    /// Immediate child names of `path`; empty if this node doesn't cover it.
    fn direct_children(&self, path: &str) -> Vec<String>;

    /// Whether `path` accepts writes.
    fn is_writable(&self, path: &str) -> bool;

    /// Byte length a read of `path` would see now. Needs no session.
    fn size_for(&self, path: &str) -> ProcResult<u64>;

    /// Truncate `path` (or the open write session on it) to `size`.
    fn set_size(&self, path: &str, size: u64) -> ProcResult<()>;

    /// Begin a session on `path`.
    fn open(&self, path: &str, flags: OpenFlags) -> ProcResult<()>;

    /// Copy up to `buf.len()` bytes from the session snapshot at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> ProcResult<usize>;

    /// Place `data` into the session's pending buffer at `offset`.
    fn write(&self, offset: u64, data: &[u8]) -> ProcResult<usize>;

    /// End the session, committing pending writes.
    fn close(&self) -> ProcResult<()>;

    /// Block until the content changes, then read from the new snapshot.
    fn long_poll(&self, offset: u64, buf: &mut [u8]) -> ProcResult<usize> {
        let _ = (offset, buf);
        Err(ProcError::unsupported("long-poll read"))
    }
}

/// Where a node lives. Either fixed, or recomputed on every query so a node
/// can follow something that moves (the frontmost window, the active project).
#[derive(Clone)]
pub enum NodeDir {
    Fixed(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl NodeDir {
    /// A directory computed by `f` each time it is needed.
    pub fn dynamic(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        NodeDir::Dynamic(Arc::new(f))
    }

    /// The current directory, normalized.
    pub fn resolve(&self) -> String {
        match self {
            NodeDir::Fixed(dir) => path::clean(dir),
            NodeDir::Dynamic(f) => path::clean(&f()),
        }
    }
}

impl fmt::Debug for NodeDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeDir::Fixed(dir) => f.debug_tuple("Fixed").field(dir).finish(),
            NodeDir::Dynamic(_) => f.debug_tuple("Dynamic").field(&"<fn>").finish(),
        }
    }
}

impl From<&str> for NodeDir {
    fn from(dir: &str) -> Self {
        NodeDir::Fixed(dir.to_string())
    }
}

impl From<String> for NodeDir {
    fn from(dir: String) -> Self {
        NodeDir::Fixed(dir)
    }
}

/// Location of a node that serves exactly one file.
#[derive(Debug, Clone)]
pub(crate) struct FileLocation {
    dir: NodeDir,
    name: String,
}

impl FileLocation {
    /// `name` must be a single path component.
    pub(crate) fn new(dir: NodeDir, name: String) -> ProcResult<Self> {
        if !path::is_valid_name(&name) {
            return Err(ProcError::invalid_path(name));
        }
        Ok(Self { dir, name })
    }

    pub(crate) fn directory(&self) -> String {
        self.dir.resolve()
    }

    pub(crate) fn file_path(&self) -> String {
        path::join(&self.dir.resolve(), &self.name)
    }

    pub(crate) fn matches_any_directory(&self, path: &str) -> bool {
        path::is_ancestor_or_self(&path::clean(path), &self.dir.resolve())
    }

    pub(crate) fn matches_file(&self, path: &str) -> bool {
        path::clean(path) == self.file_path()
    }

    pub(crate) fn direct_children(&self, path: &str) -> Vec<String> {
        let path = path::clean(path);
        let dir = self.dir.resolve();
        if path == dir {
            return vec![self.name.clone()];
        }
        path::next_component(&path, &dir)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    }

    /// NotFound unless `path` is this file.
    pub(crate) fn check(&self, path: &str) -> ProcResult<()> {
        if self.matches_file(path) {
            Ok(())
        } else {
            Err(ProcError::not_found(path))
        }
    }
}

/// Children of `path` for a node whose files all sit directly in `dir`.
pub(crate) fn ancestor_children(path: &str, dir: &str) -> Vec<String> {
    path::next_component(path, dir)
        .map(|name| vec![name.to_string()])
        .unwrap_or_default()
}

/// State for one open-to-close lifecycle.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) path: String,
    pub(crate) flags: OpenFlags,
    /// Content captured at open for reads.
    pub(crate) snapshot: Vec<u8>,
    /// Bytes accumulated by writes, committed on close.
    pub(crate) pending: Vec<u8>,
    /// Set once a write or truncate touched `pending`.
    pub(crate) dirty: bool,
}

impl Session {
    pub(crate) fn new(path: String, flags: OpenFlags, snapshot: Vec<u8>) -> Self {
        Self {
            path,
            flags,
            snapshot,
            pending: Vec::new(),
            dirty: false,
        }
    }

    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> ProcResult<usize> {
        if !self.flags.read {
            return Err(ProcError::access_conflict(format!(
                "{} not opened for reading",
                self.path
            )));
        }
        Ok(copy_from(&self.snapshot, offset, buf))
    }

    pub(crate) fn write_at(&mut self, offset: u64, data: &[u8]) -> ProcResult<usize> {
        if !self.flags.write {
            return Err(ProcError::access_conflict(format!(
                "{} not opened for writing",
                self.path
            )));
        }
        let too_large = ProcError::TooLarge {
            limit: MAX_PENDING_BYTES,
        };
        let end = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(data.len()))
            .filter(|end| *end <= MAX_PENDING_BYTES)
            .ok_or(too_large)?;
        let start = end - data.len();
        if self.pending.len() < end {
            self.pending.resize(end, 0);
        }
        self.pending[start..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    /// Shrink the pending buffer. Growing is not supported.
    pub(crate) fn truncate(&mut self, size: u64) -> ProcResult<()> {
        if size > self.pending.len() as u64 {
            return Err(ProcError::unsupported(format!(
                "growing {} to {size} bytes",
                self.path
            )));
        }
        self.pending.truncate(size as usize);
        self.dirty = true;
        Ok(())
    }
}

/// Copy the slice of `content` starting at `offset` into `buf`.
///
/// An offset at or past the end yields 0 bytes.
pub(crate) fn copy_from(content: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= content.len() {
        return 0;
    }
    let n = buf.len().min(content.len() - start);
    buf[..n].copy_from_slice(&content[start..start + n]);
    n
}

/// Run a provider, turning its failure into a backing error.
pub(crate) fn provide(provider: &Provider) -> ProcResult<Vec<u8>> {
    provider().map_err(ProcError::backing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_bounds() {
        let mut buf = [0u8; 4];
        assert_eq!(copy_from(b"hello", 0, &mut buf), 4);
        assert_eq!(&buf, b"hell");
        assert_eq!(copy_from(b"hello", 3, &mut buf), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(copy_from(b"hello", 5, &mut buf), 0);
        assert_eq!(copy_from(b"hello", u64::MAX, &mut buf), 0);
    }

    #[test]
    fn test_session_write_fills_gap() {
        let mut session = Session::new("/f".into(), OpenFlags::write(), Vec::new());
        session.write_at(2, b"xy").unwrap();
        assert_eq!(session.pending, b"\0\0xy");
        session.write_at(0, b"ab").unwrap();
        assert_eq!(session.pending, b"abxy");
        assert!(session.dirty);
    }

    #[test]
    fn test_session_write_far_past_end_is_too_large() {
        let mut session = Session::new("/f".into(), OpenFlags::write(), Vec::new());
        for offset in [u64::MAX, u64::MAX - 1, MAX_PENDING_BYTES as u64] {
            assert!(matches!(
                session.write_at(offset, b"ab"),
                Err(ProcError::TooLarge { limit: MAX_PENDING_BYTES })
            ));
        }
        assert!(session.pending.is_empty());
        assert!(!session.dirty);
    }

    #[test]
    fn test_session_modes_enforced() {
        let mut session = Session::new("/f".into(), OpenFlags::read(), b"abc".to_vec());
        assert!(matches!(
            session.write_at(0, b"x"),
            Err(ProcError::AccessConflict(_))
        ));
        let session = Session::new("/f".into(), OpenFlags::write(), Vec::new());
        let mut buf = [0u8; 2];
        assert!(matches!(
            session.read_at(0, &mut buf),
            Err(ProcError::AccessConflict(_))
        ));
    }

    #[test]
    fn test_session_truncate_shrinks_only() {
        let mut session = Session::new("/f".into(), OpenFlags::write(), Vec::new());
        session.write_at(0, b"abcdef").unwrap();
        session.truncate(3).unwrap();
        assert_eq!(session.pending, b"abc");
        assert!(matches!(session.truncate(10), Err(ProcError::Unsupported(_))));
    }

    #[test]
    fn test_file_location_predicates() {
        let loc = FileLocation::new("/app/settings".into(), "font".into()).unwrap();
        assert!(loc.matches_file("/app/settings/font"));
        assert!(!loc.matches_file("/app/settings"));
        assert!(loc.matches_any_directory("/"));
        assert!(loc.matches_any_directory("/app"));
        assert!(loc.matches_any_directory("/app/settings/"));
        assert!(!loc.matches_any_directory("/app/settings/font"));
        assert_eq!(loc.direct_children("/"), vec!["app"]);
        assert_eq!(loc.direct_children("/app/settings"), vec!["font"]);
        assert!(loc.direct_children("/plugins").is_empty());
    }

    #[test]
    fn test_file_location_rejects_bad_names() {
        for name in ["", ".", "..", "sub/file", "a\0b"] {
            assert!(
                matches!(
                    FileLocation::new("/app".into(), name.into()),
                    Err(ProcError::InvalidPath(_))
                ),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn test_dynamic_dir_is_reevaluated() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let dir = NodeDir::dynamic(move || format!("/windows/{}/", c.load(Ordering::SeqCst)));
        assert_eq!(dir.resolve(), "/windows/0");
        counter.store(3, Ordering::SeqCst);
        assert_eq!(dir.resolve(), "/windows/3");
    }
}
