//! Read-write node: one file read through a provider, written through a sink.
//!
//! Writes accumulate in the session and reach the sink in one piece when the
//! session closes, because the backing state is usually a whole-value replace.
//!
//! The node is also a change channel. A reader can park in
//! [`ProcNode::long_poll`] until the publisher calls
//! [`ReadWriteNode::notify_if_changed`] with a value different from the one
//! the reader last saw. Closing the session from another thread cancels the
//! wait.
//!
//! Lock order is `session` then `published`. A long-poll waiter holds only
//! `published` while parked.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{ProcError, ProcResult};
use crate::node::{provide, FileLocation, NodeDir, ProcNode, Provider, Session, Sink};
use crate::types::{NodeKind, OpenFlags};

/// Serves a single read-write file with change notification.
pub struct ReadWriteNode {
    location: FileLocation,
    provider: Provider,
    sink: Sink,
    session: Mutex<Option<RwSession>>,
    published: Mutex<Published>,
    changed: Condvar,
    next_session: AtomicU64,
}

#[derive(Debug)]
struct RwSession {
    id: u64,
    inner: Session,
    /// Generation of `published` this session's snapshot corresponds to.
    observed: u64,
}

#[derive(Debug, Default)]
struct Published {
    /// Last value handed to a reader or produced by a notification.
    last: Option<Vec<u8>>,
    /// Bumped every time `last` changes through a notification.
    generation: u64,
    /// Session that may be parked in long-poll; cleared on close.
    live: Option<u64>,
}

impl fmt::Debug for ReadWriteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteNode")
            .field("location", &self.location)
            .field("generation", &self.published.lock().generation)
            .finish_non_exhaustive()
    }
}

impl ReadWriteNode {
    /// Create a node serving `dir/name`, reading from `provider` and
    /// committing writes to `sink`.
    pub fn new(
        dir: impl Into<NodeDir>,
        name: impl Into<String>,
        provider: impl Fn() -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
        sink: impl Fn(Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ProcResult<Self> {
        Ok(Self {
            location: FileLocation::new(dir.into(), name.into())?,
            provider: Arc::new(provider),
            sink: Arc::new(sink),
            session: Mutex::new(None),
            published: Mutex::new(Published::default()),
            changed: Condvar::new(),
            next_session: AtomicU64::new(1),
        })
    }

    /// Create a node over text. Written bytes must be UTF-8.
    pub fn from_text(
        dir: impl Into<NodeDir>,
        name: impl Into<String>,
        read: impl Fn() -> String + Send + Sync + 'static,
        write: impl Fn(String) + Send + Sync + 'static,
    ) -> ProcResult<Self> {
        Self::new(
            dir,
            name,
            move || Ok(read().into_bytes()),
            move |bytes| {
                write(String::from_utf8(bytes)?);
                Ok(())
            },
        )
    }

    /// Full path of the served file.
    pub fn file_path(&self) -> String {
        self.location.file_path()
    }

    /// Re-run the provider and wake a parked reader if the value differs from
    /// the last one published. Returns whether it changed.
    ///
    /// Publishers call this after any mutation they want surfaced.
    pub fn notify_if_changed(&self) -> ProcResult<bool> {
        let current = provide(&self.provider)?;
        let mut published = self.published.lock();
        if published.last.as_deref() == Some(current.as_slice()) {
            return Ok(false);
        }
        published.last = Some(current);
        published.generation += 1;
        let generation = published.generation;
        drop(published);

        self.changed.notify_all();
        tracing::debug!(path = %self.location.file_path(), generation, "published change");
        Ok(true)
    }

    fn commit(&self, session: &Session) -> ProcResult<()> {
        if !(session.flags.write && session.dirty) {
            return Ok(());
        }
        (self.sink)(session.pending.clone()).map_err(ProcError::backing)?;
        tracing::debug!(path = %session.path, size = session.pending.len(), "committed write");
        Ok(())
    }
}

impl ProcNode for ReadWriteNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ReadWrite
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

    fn is_writable(&self, path: &str) -> bool {
        self.location.matches_file(path)
    }

    fn size_for(&self, path: &str) -> ProcResult<u64> {
        self.location.check(path)?;
        Ok(provide(&self.provider)?.len() as u64)
    }

    /// With a write session open, shrinks its pending buffer. Without one,
    /// only a truncate to zero is meaningful and clears the value through the
    /// sink.
    fn set_size(&self, path: &str, size: u64) -> ProcResult<()> {
        self.location.check(path)?;
        let mut session = self.session.lock();
        if let Some(s) = session.as_mut().filter(|s| s.inner.flags.write) {
            return s.inner.truncate(size);
        }
        if size != 0 {
            return Err(ProcError::unsupported(format!(
                "resizing {path} to {size} bytes"
            )));
        }
        (self.sink)(Vec::new()).map_err(ProcError::backing)
    }

    fn open(&self, path: &str, flags: OpenFlags) -> ProcResult<()> {
        self.location.check(path)?;
        if !flags.read && !flags.write {
            return Err(ProcError::access_conflict("no access mode requested"));
        }

        let mut session = self.session.lock();
        if session.is_some() {
            return Err(ProcError::access_conflict(format!(
                "{path} already has an open session"
            )));
        }
        let snapshot = if flags.read {
            provide(&self.provider)?
        } else {
            Vec::new()
        };

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let observed = {
            let mut published = self.published.lock();
            if flags.read {
                published.last = Some(snapshot.clone());
            }
            published.live = Some(id);
            published.generation
        };

        tracing::debug!(path = %path, flags = %flags, session = id, "read-write session opened");
        *session = Some(RwSession {
            id,
            inner: Session::new(self.location.file_path(), flags, snapshot),
            observed,
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

    /// A failed sink still releases the session.
    fn close(&self) -> ProcResult<()> {
        let mut guard = self.session.lock();
        let closed = guard.take().ok_or(ProcError::NoOpenSession)?;
        {
            let mut published = self.published.lock();
            if published.live == Some(closed.id) {
                published.live = None;
            }
        }
        self.changed.notify_all();

        let result = self.commit(&closed.inner);
        drop(guard);

        if let Err(e) = &result {
            tracing::warn!(path = %closed.inner.path, error = %e, "commit on close failed");
        }
        tracing::debug!(path = %closed.inner.path, session = closed.id, "read-write session closed");
        result
    }

    fn long_poll(&self, offset: u64, buf: &mut [u8]) -> ProcResult<usize> {
        let (id, observed) = {
            let session = self.session.lock();
            let s = session.as_ref().ok_or(ProcError::NoOpenSession)?;
            if !s.inner.flags.read {
                return Err(ProcError::access_conflict(format!(
                    "{} not opened for reading",
                    s.inner.path
                )));
            }
            (s.id, s.observed)
        };

        let (generation, value) = {
            let mut published = self.published.lock();
            while published.live == Some(id) && published.generation == observed {
                self.changed.wait(&mut published);
            }
            if published.live != Some(id) {
                tracing::debug!(session = id, "long-poll cancelled by close");
                return Err(ProcError::NoOpenSession);
            }
            (published.generation, published.last.clone().unwrap_or_default())
        };

        let mut session = self.session.lock();
        let s = session
            .as_mut()
            .filter(|s| s.id == id)
            .ok_or(ProcError::NoOpenSession)?;
        s.inner.snapshot = value;
        s.observed = generation;
        s.inner.read_at(offset, buf)
    }
}
