//! Built-in node kinds.

mod key_store;
mod read_only;
mod read_write;

pub use key_store::KeyStoreNode;
pub use read_only::ReadOnlyNode;
pub use read_write::ReadWriteNode;
