//! Core node tree types.
//!
//! These are the values handed back across the operation boundary: file
//! attributes, directory entries, open flags and the opaque ids the router
//! gives out.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file served by a node.
    File,
    /// Directory synthesized from node locations.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes as reported by `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes of a read issued now (0 for directories).
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Whether the owning node accepts writes to this path.
    pub writable: bool,
}

impl FileAttr {
    /// Attributes for a file.
    pub fn file(size: u64, writable: bool) -> Self {
        Self {
            size,
            kind: FileType::File,
            writable,
        }
    }

    /// Attributes for a synthesized directory.
    pub fn directory() -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            writable: false,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Access requested when opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    /// Write-only access.
    pub fn write() -> Self {
        Self {
            read: false,
            write: true,
        }
    }

    /// Read and write access.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.read, self.write) {
            (true, true) => f.write_str("rw"),
            (true, false) => f.write_str("r"),
            (false, true) => f.write_str("w"),
            (false, false) => f.write_str("-"),
        }
    }
}

/// Which of the built-in node kinds a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum NodeKind {
    ReadOnly,
    ReadWrite,
    KeyStore,
}

/// Identifier the router assigns at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Opaque handle for one open session, returned by `ProcRouter::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(crate) u64);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh#{}", self.0)
    }
}
