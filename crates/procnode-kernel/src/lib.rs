//! # procnode-kernel
//!
//! Live process state exposed as a synthetic, procfs-style file tree.
//!
//! External tools introspect and control a running process with ordinary
//! file operations instead of a bespoke IPC protocol. The pieces:
//!
//! - [`ProcNode`] - the contract every backing object implements
//! - [`ReadOnlyNode`] - one file produced on demand by a provider
//! - [`ReadWriteNode`] - one file with a provider, a sink, and change
//!   notification through long-poll reads
//! - [`KeyStoreNode`] - a directory of dynamically named files over a map
//! - [`ProcRouter`] - dispatches paths to registered nodes and merges their
//!   directory listings
//!
//! ```text
//! /
//! ├── app/
//! │   ├── version          ReadOnlyNode
//! │   └── settings/
//! │       └── theme        ReadWriteNode
//! └── plugins/
//!     └── git/             KeyStoreNode
//!         ├── branch
//!         └── remote
//! ```
//!
//! Everything is in memory and mirrors live state; nothing persists.

pub mod config;
mod error;
mod node;
pub mod nodes;
pub mod path;
mod router;
mod types;

pub use config::{ConfigError, MAX_PENDING_BYTES, OverlapPolicy, ProcConfig};
pub use error::{ProcError, ProcResult};
pub use node::{NodeDir, ProcNode, Provider, Sink};
pub use nodes::{KeyStoreNode, ReadOnlyNode, ReadWriteNode};
pub use router::{NodeInfo, ProcRouter, READ_CHUNK};
pub use types::{DirEntry, FileAttr, FileHandle, FileType, NodeId, NodeKind, OpenFlags};
