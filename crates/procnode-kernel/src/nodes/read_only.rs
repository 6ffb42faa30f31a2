//! Read-only node: one file whose content comes from a provider.
//!
//! The provider runs once per open and the result is kept for the session, so
//! every open sees a fresh value. Use it for "current value" files.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProcError, ProcResult};
use crate::node::{provide, FileLocation, NodeDir, ProcNode, Provider, Session};
use crate::types::{NodeKind, OpenFlags};

/// Serves a single read-only file.
pub struct ReadOnlyNode {
    location: FileLocation,
    provider: Provider,
    session: Mutex<Option<Session>>,
}

impl fmt::Debug for ReadOnlyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyNode")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ReadOnlyNode {
    /// Create a node serving `dir/name` with bytes from `provider`.
    ///
    /// Fails with `InvalidPath` unless `name` is a single path component.
    pub fn new(
        dir: impl Into<NodeDir>,
        name: impl Into<String>,
        provider: impl Fn() -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    ) -> ProcResult<Self> {
        Ok(Self {
            location: FileLocation::new(dir.into(), name.into())?,
            provider: Arc::new(provider),
            session: Mutex::new(None),
        })
    }

    /// Create a node whose provider produces text and cannot fail.
    pub fn from_text(
        dir: impl Into<NodeDir>,
        name: impl Into<String>,
        text: impl Fn() -> String + Send + Sync + 'static,
    ) -> ProcResult<Self> {
        Self::new(dir, name, move || Ok(text().into_bytes()))
    }

    /// Full path of the served file.
    pub fn file_path(&self) -> String {
        self.location.file_path()
    }
}

impl ProcNode for ReadOnlyNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ReadOnly
    }

    fn directory(&self) -> String {
        self.location.directory()
    }

    fn matches_any_directory(&self, path: &str) -> bool {
        self.location.matches_any_directory(path)
    }

    fn matches_file(&self, path: &str) -> bool {
        self.location.matches_file(path)
    }

    fn direct_children(&self, path: &str) -> Vec<String> {
        self.location.direct_children(path)
    }

    fn is_writable(&self, _path: &str) -> bool {
        false
    }

    fn size_for(&self, path: &str) -> ProcResult<u64> {
        self.location.check(path)?;
        Ok(provide(&self.provider)?.len() as u64)
    }

    fn set_size(&self, path: &str, _size: u64) -> ProcResult<()> {
        self.location.check(path)?;
        Err(ProcError::unsupported(format!("{path} is read-only")))
    }

    fn open(&self, path: &str, flags: OpenFlags) -> ProcResult<()> {
        self.location.check(path)?;
        if flags.write {
            return Err(ProcError::access_conflict(format!(
                "{path} is read-only"
            )));
        }
        if !flags.read {
            return Err(ProcError::access_conflict("no access mode requested"));
        }

        let mut session = self.session.lock();
        if session.is_some() {
            return Err(ProcError::access_conflict(format!(
                "{path} already has an open session"
            )));
        }
        let snapshot = provide(&self.provider)?;
        tracing::debug!(path = %path, size = snapshot.len(), "read-only session opened");
        *session = Some(Session::new(self.location.file_path(), flags, snapshot));
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> ProcResult<usize> {
        let session = self.session.lock();
        session
            .as_ref()
            .ok_or(ProcError::NoOpenSession)?
            .read_at(offset, buf)
    }

    fn write(&self, _offset: u64, _data: &[u8]) -> ProcResult<usize> {
        Err(ProcError::unsupported(format!(
            "{} is read-only",
            self.location.file_path()
        )))
    }

    fn close(&self) -> ProcResult<()> {
        let closed = self.session.lock().take().ok_or(ProcError::NoOpenSession)?;
        tracing::debug!(path = %closed.path, "read-only session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counter_node() -> (ReadOnlyNode, Arc<AtomicU64>) {
        let value = Arc::new(AtomicU64::new(1));
        let v = value.clone();
        let node = ReadOnlyNode::from_text("/app", "count", move || {
            v.load(Ordering::SeqCst).to_string()
        })
        .unwrap();
        (node, value)
    }

    fn read_all(node: &ReadOnlyNode) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = node.read(out.len() as u64, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_file_implies_parent_directory() {
        let (node, _) = counter_node();
        let file = "/app/count";
        assert!(node.matches_file(file));
        assert!(node.matches_any_directory(crate::path::parent(file).unwrap()));
    }

    #[test]
    fn test_size_matches_full_read() {
        let node = ReadOnlyNode::from_text("/app", "version", || "0.3.1\n".to_string()).unwrap();
        let size = node.size_for("/app/version").unwrap();
        node.open("/app/version", OpenFlags::read()).unwrap();
        let content = read_all(&node);
        node.close().unwrap();
        assert_eq!(size, content.len() as u64);
        assert_eq!(content, b"0.3.1\n");
    }

    #[test]
    fn test_snapshot_fixed_for_session_fresh_per_open() {
        let (node, value) = counter_node();
        node.open("/app/count", OpenFlags::read()).unwrap();
        value.store(42, Ordering::SeqCst);
        assert_eq!(read_all(&node), b"1");
        node.close().unwrap();

        node.open("/app/count", OpenFlags::read()).unwrap();
        assert_eq!(read_all(&node), b"42");
        node.close().unwrap();
    }

    #[test]
    fn test_write_family_rejected() {
        let (node, _) = counter_node();
        assert!(matches!(
            node.open("/app/count", OpenFlags::read_write()),
            Err(ProcError::AccessConflict(_))
        ));
        assert!(matches!(
            node.write(0, b"x"),
            Err(ProcError::Unsupported(_))
        ));
        assert!(matches!(
            node.set_size("/app/count", 0),
            Err(ProcError::Unsupported(_))
        ));
    }

    #[test]
    fn test_session_discipline() {
        let (node, _) = counter_node();
        let mut buf = [0u8; 8];
        assert!(matches!(node.read(0, &mut buf), Err(ProcError::NoOpenSession)));

        node.open("/app/count", OpenFlags::read()).unwrap();
        assert!(matches!(
            node.open("/app/count", OpenFlags::read()),
            Err(ProcError::AccessConflict(_))
        ));
        node.close().unwrap();
        assert!(matches!(node.close(), Err(ProcError::NoOpenSession)));
    }

    #[test]
    fn test_unknown_path_not_found() {
        let (node, _) = counter_node();
        assert!(matches!(node.size_for("/app/other"), Err(ProcError::NotFound(_))));
        assert!(matches!(
            node.open("/app/other", OpenFlags::read()),
            Err(ProcError::NotFound(_))
        ));
    }

    #[test]
    fn test_provider_failure_surfaces_as_backing() {
        let node = ReadOnlyNode::new("/app", "broken", || anyhow::bail!("no window")).unwrap();
        assert!(matches!(node.size_for("/app/broken"), Err(ProcError::Backing(_))));
        assert!(matches!(
            node.open("/app/broken", OpenFlags::read()),
            Err(ProcError::Backing(_))
        ));
        // failed open leaves no session behind
        assert!(matches!(node.close(), Err(ProcError::NoOpenSession)));
    }

    #[test]
    fn test_read_past_end_is_eof() {
        let node = ReadOnlyNode::from_text("/app", "v", || "abc".to_string()).unwrap();
        node.open("/app/v", OpenFlags::read()).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(node.read(3, &mut buf).unwrap(), 0);
        assert_eq!(node.read(100, &mut buf).unwrap(), 0);
        assert_eq!(node.read(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
        node.close().unwrap();
    }

    #[test]
    fn test_name_must_be_one_component() {
        for name in ["sub/file", "", ".."] {
            assert!(matches!(
                ReadOnlyNode::from_text("/app", name, String::new),
                Err(ProcError::InvalidPath(_))
            ));
        }
    }
}
