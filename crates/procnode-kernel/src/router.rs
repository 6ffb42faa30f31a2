//! Router: turns a set of registered nodes into one namespace.
//!
//! The router answers the operation set an external filesystem adapter needs
//! (exists, list, stat, truncate, open, read, write, close) by asking every
//! registered node whether it claims the path:
//!
//! - file operations go to the first-registered node whose `matches_file`
//!   accepts the path
//! - a directory exists if any node's `matches_any_directory` accepts it, and
//!   its listing merges every node's `direct_children`
//!
//! Open sessions are tracked by [`FileHandle`]. No router lock is held while a
//! node runs, so a long-poll read parks only its own caller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::{OverlapPolicy, ProcConfig};
use crate::error::{ProcError, ProcResult};
use crate::node::ProcNode;
use crate::path;
use crate::types::{DirEntry, FileAttr, FileHandle, FileType, NodeId, NodeKind, OpenFlags};

/// Largest buffer the router hands a node in one call, and the chunk size
/// `read_all` and `long_poll_all` read with.
pub const READ_CHUNK: u32 = 64 * 1024;

/// Information about a registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Directory the node currently resolves to.
    pub directory: String,
}

struct Registration {
    id: NodeId,
    node: Arc<dyn ProcNode>,
}

struct OpenHandle {
    node_id: NodeId,
    node: Arc<dyn ProcNode>,
    path: String,
}

/// Dispatches path operations to registered nodes.
pub struct ProcRouter {
    config: ProcConfig,
    /// Registration order is the tie-break for overlapping claims.
    nodes: RwLock<Vec<Registration>>,
    handles: DashMap<u64, OpenHandle>,
    next_node: AtomicU64,
    next_handle: AtomicU64,
}

impl fmt::Debug for ProcRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcRouter")
            .field("nodes", &self.nodes.read().len())
            .field("open_handles", &self.handles.len())
            .finish()
    }
}

impl Default for ProcRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcRouter {
    /// Create an empty router with default configuration.
    pub fn new() -> Self {
        Self::with_config(ProcConfig::default())
    }

    /// Create an empty router.
    pub fn with_config(config: ProcConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(Vec::new()),
            handles: DashMap::new(),
            next_node: AtomicU64::new(1),
            next_handle: AtomicU64::new(1),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ProcConfig {
        &self.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Add a node to the namespace.
    pub fn register(&self, node: Arc<dyn ProcNode>) -> NodeId {
        let id = NodeId(self.next_node.fetch_add(1, Ordering::Relaxed));
        tracing::info!(node = %id, kind = %node.kind(), dir = %node.directory(), "registered node");
        self.nodes.write().push(Registration { id, node });
        id
    }

    /// Remove a node and its subtree. Sessions still open on it are closed,
    /// committing whatever they had written.
    ///
    /// Returns `true` if a node was removed.
    pub fn unregister(&self, id: NodeId) -> bool {
        let removed = {
            let mut nodes = self.nodes.write();
            let before = nodes.len();
            nodes.retain(|r| r.id != id);
            nodes.len() != before
        };
        if !removed {
            return false;
        }

        let stale: Vec<u64> = self
            .handles
            .iter()
            .filter(|h| h.value().node_id == id)
            .map(|h| *h.key())
            .collect();
        for key in stale {
            if let Some((_, handle)) = self.handles.remove(&key) {
                if let Err(e) = handle.node.close() {
                    tracing::warn!(path = %handle.path, error = %e, "close on unregister failed");
                }
            }
        }
        tracing::info!(node = %id, "unregistered node");
        true
    }

    /// All registered nodes in registration order.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .read()
            .iter()
            .map(|r| NodeInfo {
                id: r.id,
                kind: r.node.kind(),
                directory: r.node.directory(),
            })
            .collect()
    }

    /// The node that owns file `path` (already normalized).
    fn file_owner(&self, path: &str) -> Option<(NodeId, Arc<dyn ProcNode>)> {
        let nodes = self.nodes.read();
        let mut claims = nodes.iter().filter(|r| r.node.matches_file(path));
        let first = claims.next()?;
        let others = claims.count();
        if others > 0 && self.config.overlap == OverlapPolicy::Warn {
            tracing::warn!(
                path = %path,
                winner = %first.id,
                others,
                "multiple nodes claim file; using first registered"
            );
        }
        Some((first.id, Arc::clone(&first.node)))
    }

    fn require_owner(&self, path: &str) -> ProcResult<(NodeId, Arc<dyn ProcNode>)> {
        self.file_owner(path)
            .ok_or_else(|| ProcError::not_found(path))
    }

    fn handle_node(&self, handle: FileHandle) -> ProcResult<Arc<dyn ProcNode>> {
        self.handles
            .get(&handle.0)
            .map(|h| Arc::clone(&h.node))
            .ok_or(ProcError::NoOpenSession)
    }

    // ========================================================================
    // Namespace queries
    // ========================================================================

    /// True if `path` is a file or directory.
    pub fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    /// True if `path` is a directory. The root always is.
    pub fn is_dir(&self, path: &str) -> bool {
        let Ok(path) = path::normalize(path) else {
            return false;
        };
        path == "/"
            || self
                .nodes
                .read()
                .iter()
                .any(|r| r.node.matches_any_directory(&path))
    }

    /// Merged listing of `path` from every node that covers it. A name any
    /// node serves as a file is listed as a file, matching `stat`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn list_dir(&self, path: &str) -> ProcResult<Vec<DirEntry>> {
        let path = path::normalize(path)?;
        let nodes: Vec<Arc<dyn ProcNode>> = self
            .nodes
            .read()
            .iter()
            .filter(|r| r.node.matches_any_directory(&path))
            .map(|r| Arc::clone(&r.node))
            .collect();
        if nodes.is_empty() && path != "/" {
            return Err(ProcError::not_found(path));
        }

        let mut merged: BTreeMap<String, FileType> = BTreeMap::new();
        for node in &nodes {
            for name in node.direct_children(&path) {
                let child = path::join(&path, &name);
                let kind = if node.matches_file(&child) {
                    FileType::File
                } else {
                    FileType::Directory
                };
                merged
                    .entry(name)
                    .and_modify(|existing| {
                        if kind.is_file() {
                            *existing = FileType::File;
                        }
                    })
                    .or_insert(kind);
            }
        }

        Ok(merged
            .into_iter()
            .map(|(name, kind)| DirEntry::new(name, kind))
            .collect())
    }

    /// Attributes of `path`. A path claimed as a file is a file even if some
    /// other node also uses it as a directory.
    pub fn stat(&self, path: &str) -> ProcResult<FileAttr> {
        let path = path::normalize(path)?;
        if let Some((_, node)) = self.file_owner(&path) {
            let size = node.size_for(&path)?;
            return Ok(FileAttr::file(size, node.is_writable(&path)));
        }
        if self.is_dir(&path) {
            return Ok(FileAttr::directory());
        }
        Err(ProcError::not_found(path))
    }

    /// Resize `path`; see each node kind for what sizes it accepts.
    pub fn truncate(&self, path: &str, size: u64) -> ProcResult<()> {
        let path = path::normalize(path)?;
        let (_, node) = self.require_owner(&path)?;
        node.set_size(&path, size)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open `path`, returning a handle for the session.
    #[tracing::instrument(level = "debug", skip(self, flags), fields(flags = %flags))]
    pub fn open(&self, path: &str, flags: OpenFlags) -> ProcResult<FileHandle> {
        let path = path::normalize(path)?;
        let (node_id, node) = self.require_owner(&path)?;
        node.open(&path, flags)?;

        let handle = FileHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.insert(
            handle.0,
            OpenHandle {
                node_id,
                node,
                path: path.clone(),
            },
        );

        // An unregister that ran during `node.open` scanned the handles
        // before this insert; undo the open ourselves.
        if !self.nodes.read().iter().any(|r| r.id == node_id) {
            if let Some((_, open)) = self.handles.remove(&handle.0) {
                if let Err(e) = open.node.close() {
                    tracing::warn!(path = %path, error = %e, "close after lost open failed");
                }
            }
            tracing::debug!(path = %path, node = %node_id, "node unregistered during open");
            return Err(ProcError::not_found(path));
        }
        Ok(handle)
    }

    /// Read up to `size` bytes at `offset`. An empty result at or past the
    /// end of the snapshot is end-of-file.
    pub fn read(&self, handle: FileHandle, offset: u64, size: u32) -> ProcResult<Vec<u8>> {
        let node = self.handle_node(handle)?;
        read_bounded(node.as_ref(), offset, size, Vec::new())
    }

    /// Block until the node publishes a new value, then read from it.
    ///
    /// Closing `handle` from another thread cancels the wait with
    /// `NoOpenSession`.
    pub fn long_poll(&self, handle: FileHandle, offset: u64, size: u32) -> ProcResult<Vec<u8>> {
        let node = self.handle_node(handle)?;
        let mut first = vec![0u8; size.min(READ_CHUNK) as usize];
        let n = node.long_poll(offset, &mut first)?;
        let more = n == first.len() && n < size as usize;
        first.truncate(n);
        if !more {
            return Ok(first);
        }
        read_bounded(node.as_ref(), offset, size, first)
    }

    /// Write `data` at `offset` into the session's pending buffer.
    pub fn write(&self, handle: FileHandle, offset: u64, data: &[u8]) -> ProcResult<u32> {
        let node = self.handle_node(handle)?;
        let limit = self.config.max_write_bytes;
        let end = offset.saturating_add(data.len() as u64);
        if end > limit as u64 {
            return Err(ProcError::TooLarge { limit });
        }
        let n = node.write(offset, data)?;
        Ok(n as u32)
    }

    /// End the session, committing pending writes. A second close of the
    /// same handle fails with `NoOpenSession`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&self, handle: FileHandle) -> ProcResult<()> {
        let (_, open) = self
            .handles
            .remove(&handle.0)
            .ok_or(ProcError::NoOpenSession)?;
        open.node.close()
    }

    // ========================================================================
    // Convenience
    // ========================================================================

    /// Open, read everything, close.
    pub fn read_all(&self, path: &str) -> ProcResult<Vec<u8>> {
        let handle = self.open(path, OpenFlags::read())?;
        let result = self.drain(handle, Vec::new());
        let closed = self.close(handle);
        let data = result?;
        closed?;
        Ok(data)
    }

    /// Wait for the next published value on `handle` and return all of it.
    /// The handle stays open.
    pub fn long_poll_all(&self, handle: FileHandle) -> ProcResult<Vec<u8>> {
        let data = self.long_poll(handle, 0, READ_CHUNK)?;
        if data.len() < READ_CHUNK as usize {
            return Ok(data);
        }
        self.drain(handle, data)
    }

    fn drain(&self, handle: FileHandle, mut data: Vec<u8>) -> ProcResult<Vec<u8>> {
        loop {
            let chunk = self.read(handle, data.len() as u64, READ_CHUNK)?;
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
    }

    /// Open for write, write `data` at 0, close (which commits).
    pub fn write_all(&self, path: &str, data: &[u8]) -> ProcResult<u32> {
        let handle = self.open(path, OpenFlags::write())?;
        let written = self.write(handle, 0, data);
        let closed = self.close(handle);
        let written = written?;
        closed?;
        Ok(written)
    }
}

/// Read up to `size` bytes at `offset` onto `data`, which already holds the
/// first part. The buffer grows only as the node returns bytes.
fn read_bounded(
    node: &dyn ProcNode,
    offset: u64,
    size: u32,
    mut data: Vec<u8>,
) -> ProcResult<Vec<u8>> {
    let want = size as usize;
    let mut chunk = vec![0u8; want.saturating_sub(data.len()).min(READ_CHUNK as usize)];
    loop {
        let limit = want.saturating_sub(data.len()).min(chunk.len());
        let n = node.read(offset.saturating_add(data.len() as u64), &mut chunk[..limit])?;
        data.extend_from_slice(&chunk[..n]);
        if n == 0 || data.len() >= want {
            return Ok(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{KeyStoreNode, ReadOnlyNode, ReadWriteNode};
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    fn memory_rw(dir: &str, name: &str, initial: &str) -> Arc<ReadWriteNode> {
        let cell = Arc::new(Mutex::new(initial.as_bytes().to_vec()));
        let r = cell.clone();
        Arc::new(ReadWriteNode::new(
            dir,
            name,
            move || Ok(r.lock().clone()),
            move |bytes| {
                *cell.lock() = bytes;
                Ok(())
            },
        )
        .unwrap())
    }

    fn sample_router() -> ProcRouter {
        let router = ProcRouter::new();
        let version = ReadOnlyNode::from_text("/app", "version", || "1.0\n".to_string());
        router.register(Arc::new(version.unwrap()));
        router.register(memory_rw("/app/settings", "theme", "dark"));
        router.register(Arc::new(KeyStoreNode::new("/plugins/git")));
        router
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_root_listing_merges_nodes() {
        let router = sample_router();
        let root = router.list_dir("/").unwrap();
        assert_eq!(names(&root), vec!["app", "plugins"]);
        assert!(root.iter().all(|e| e.kind.is_dir()));

        let app = router.list_dir("/app").unwrap();
        assert_eq!(names(&app), vec!["settings", "version"]);
        assert_eq!(app[0].kind, FileType::Directory);
        assert_eq!(app[1].kind, FileType::File);
    }

    #[test]
    fn test_empty_router_has_root_only() {
        let router = ProcRouter::new();
        assert!(router.is_dir("/"));
        assert!(router.list_dir("/").unwrap().is_empty());
        assert!(matches!(router.list_dir("/app"), Err(ProcError::NotFound(_))));
    }

    #[test]
    fn test_stat() {
        let router = sample_router();
        assert_eq!(router.stat("/app/version").unwrap(), FileAttr::file(4, false));
        assert_eq!(router.stat("/app/settings/theme").unwrap(), FileAttr::file(4, true));
        assert!(router.stat("/app/settings").unwrap().is_dir());
        assert!(router.stat("/plugins/git").unwrap().is_dir());
        assert!(matches!(router.stat("/app/nothing"), Err(ProcError::NotFound(_))));
        assert!(matches!(router.stat("/plugins/git/unset"), Err(ProcError::NotFound(_))));
        assert!(router.exists("/app/"));
        assert!(!router.exists("/nope"));
    }

    #[test]
    fn test_read_write_through_handles() {
        let router = sample_router();
        assert_eq!(router.read_all("/app/version").unwrap(), b"1.0\n");

        router.write_all("/app/settings/theme", b"light").unwrap();
        assert_eq!(router.read_all("/app/settings/theme").unwrap(), b"light");

        router.write_all("/plugins/git/branch", b"main").unwrap();
        assert_eq!(names(&router.list_dir("/plugins/git").unwrap()), vec!["branch"]);
        assert_eq!(router.read_all("/plugins/git/branch").unwrap(), b"main");
    }

    #[test]
    fn test_partial_reads() {
        let router = sample_router();
        let fh = router.open("/app/version", OpenFlags::read()).unwrap();
        assert_eq!(router.read(fh, 0, 2).unwrap(), b"1.");
        assert_eq!(router.read(fh, 2, 100).unwrap(), b"0\n");
        assert!(router.read(fh, 4, 100).unwrap().is_empty());
        assert!(router.read(fh, 400, 100).unwrap().is_empty());
        router.close(fh).unwrap();
    }

    #[test]
    fn test_handle_discipline() {
        let router = sample_router();
        let fh = router.open("/app/version", OpenFlags::read()).unwrap();
        assert!(matches!(
            router.open("/app/version", OpenFlags::read()),
            Err(ProcError::AccessConflict(_))
        ));
        router.close(fh).unwrap();
        assert!(matches!(router.close(fh), Err(ProcError::NoOpenSession)));
        assert!(matches!(router.read(fh, 0, 1), Err(ProcError::NoOpenSession)));
    }

    #[test]
    fn test_first_registered_wins() {
        let router = ProcRouter::new();
        let first = ReadOnlyNode::from_text("/dup", "f", || "first".into()).unwrap();
        let second = ReadOnlyNode::from_text("/dup", "f", || "second".into()).unwrap();
        router.register(Arc::new(first));
        router.register(Arc::new(second));
        assert_eq!(router.read_all("/dup/f").unwrap(), b"first");
        assert_eq!(names(&router.list_dir("/dup").unwrap()), vec!["f"]);
    }

    #[test]
    fn test_unregister_removes_subtree_and_handles() {
        let router = ProcRouter::new();
        let id = router.register(Arc::new(KeyStoreNode::new("/state")));
        let fh = router.open("/state/k", OpenFlags::write()).unwrap();
        router.write(fh, 0, b"v").unwrap();

        assert!(router.unregister(id));
        assert!(!router.unregister(id));
        assert!(!router.exists("/state"));
        assert!(matches!(router.write(fh, 0, b"x"), Err(ProcError::NoOpenSession)));
        assert!(router.nodes().is_empty());
    }

    #[test]
    fn test_write_limit() {
        let router = ProcRouter::with_config(ProcConfig {
            max_write_bytes: 4,
            ..ProcConfig::default()
        });
        router.register(Arc::new(KeyStoreNode::new("/s")));
        let fh = router.open("/s/k", OpenFlags::write()).unwrap();
        router.write(fh, 0, b"abcd").unwrap();
        assert!(matches!(
            router.write(fh, 2, b"cde"),
            Err(ProcError::TooLarge { limit: 4 })
        ));
        router.close(fh).unwrap();
    }

    #[test]
    fn test_invalid_path_rejected() {
        let router = sample_router();
        assert!(matches!(
            router.open("/app/../etc/passwd", OpenFlags::read()),
            Err(ProcError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_truncate_routes_to_owner() {
        let router = sample_router();
        router.truncate("/app/settings/theme", 0).unwrap();
        assert!(router.read_all("/app/settings/theme").unwrap().is_empty());
        assert!(matches!(
            router.truncate("/app/version", 0),
            Err(ProcError::Unsupported(_))
        ));
    }

    #[test]
    fn test_long_poll_through_router_and_cancel() {
        let router = Arc::new(ProcRouter::new());
        let node = memory_rw("/events", "tick", "0");
        router.register(node.clone());

        let fh = router.open("/events/tick", OpenFlags::read()).unwrap();
        let r = router.clone();
        let waiter = thread::spawn(move || r.long_poll(fh, 0, 16));
        thread::sleep(Duration::from_millis(50));
        router.close(fh).unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(ProcError::NoOpenSession)));
    }

    #[test]
    fn test_nodes_listing() {
        let router = sample_router();
        let infos = router.nodes();
        let kinds: Vec<NodeKind> = infos.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![NodeKind::ReadOnly, NodeKind::ReadWrite, NodeKind::KeyStore]
        );
        assert_eq!(infos[2].directory, "/plugins/git");
    }

    #[test]
    fn test_unregister_during_open_loses_the_open() {
        let router = Arc::new(ProcRouter::new());
        let own_id: Arc<Mutex<Option<NodeId>>> = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&router);
        let id_cell = own_id.clone();
        // The provider runs inside `open`, after dispatch and before the
        // handle is recorded.
        let node = ReadOnlyNode::new("/app", "racy", move || {
            if let (Some(router), Some(id)) = (weak.upgrade(), *id_cell.lock()) {
                router.unregister(id);
            }
            Ok(b"x".to_vec())
        })
        .unwrap();
        let node = Arc::new(node);
        *own_id.lock() = Some(router.register(node.clone()));

        assert!(matches!(
            router.open("/app/racy", OpenFlags::read()),
            Err(ProcError::NotFound(_))
        ));
        assert!(router.handles.is_empty());
        assert!(router.nodes().is_empty());
        assert!(matches!(node.close(), Err(ProcError::NoOpenSession)));
    }

    #[test]
    fn test_read_size_caps_result() {
        let big = vec![b'z'; 3 * READ_CHUNK as usize + 17];
        let content = big.clone();
        let router = ProcRouter::new();
        router.register(Arc::new(
            ReadOnlyNode::new("/app", "big", move || Ok(content.clone())).unwrap(),
        ));
        router.register(Arc::new(
            ReadOnlyNode::from_text("/app", "small", || "1.0\n".to_string()).unwrap(),
        ));

        let fh = router.open("/app/small", OpenFlags::read()).unwrap();
        assert_eq!(router.read(fh, 0, u32::MAX).unwrap(), b"1.0\n");
        assert_eq!(router.read(fh, 1, 2).unwrap(), b".0");
        router.close(fh).unwrap();

        let fh = router.open("/app/big", OpenFlags::read()).unwrap();
        let want = 2 * READ_CHUNK + 5;
        assert_eq!(router.read(fh, 3, want).unwrap(), &big[3..3 + want as usize]);
        assert_eq!(router.read(fh, 0, u32::MAX).unwrap(), big);
        router.close(fh).unwrap();
    }

    #[test]
    fn test_long_poll_returns_values_larger_than_a_chunk() {
        let cell = Arc::new(Mutex::new(b"0".to_vec()));
        let r = cell.clone();
        let node = Arc::new(
            ReadWriteNode::new("/events", "blob", move || Ok(r.lock().clone()), |_| Ok(()))
                .unwrap(),
        );
        let router = Arc::new(ProcRouter::new());
        router.register(node.clone());

        let fh = router.open("/events/blob", OpenFlags::read()).unwrap();
        let poller = router.clone();
        let waiter = thread::spawn(move || poller.long_poll_all(fh));
        thread::sleep(Duration::from_millis(50));

        let blob = vec![7u8; READ_CHUNK as usize * 2 + 1];
        *cell.lock() = blob.clone();
        assert!(node.notify_if_changed().unwrap());
        assert_eq!(waiter.join().unwrap().unwrap(), blob);
        router.close(fh).unwrap();
    }
}
