//! Storage backends for the driftsync engine.
//!
//! Both implement [`StorageBackend`](driftsync_core::StorageBackend) and can
//! be stacked:
//!
//! - **[`FileStorage`]**: one file per document key inside a directory,
//!   replaced atomically on every save.
//! - **[`EncryptedStorage`]**: wraps any backend and seals each document
//!   with AES-256-GCM before it reaches the inner store.

pub mod encrypted;
pub mod file;

pub use encrypted::EncryptedStorage;
pub use file::FileStorage;
