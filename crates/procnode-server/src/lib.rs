//! procnode server library
//!
//! Publishes the server's own state as a procnode tree and serves any
//! [`ProcRouter`](procnode_kernel::ProcRouter) over a line protocol.

pub mod builtin;
pub mod config;
pub mod constants;
pub mod protocol;
pub mod server;

pub use builtin::BuiltinNodes;
pub use config::ServerConfig;
pub use protocol::{ProtocolError, Request};
pub use server::ProcServer;
