//! Storage backend implementations.
//!
//! This module provides concrete implementations of the
//! [`crate::StorageBackend`] trait.
//!
//! # Backends
//!
//! - [`InMemoryBackend`]: storage in `RwLock`-guarded `BTreeMap` tables.
//!   Suitable for testing and for signers that accept losing history on
//!   restart (the interchange file is then the only durable record).
//!
//! - [`RocksDBBackend`] (requires the `rocksdb` feature): persistent storage
//!   using a RocksDB `TransactionDB`. Suitable for production signers.

mod in_memory;
#[cfg(feature = "rocksdb")]
mod rocksdb;

pub use in_memory::InMemoryBackend;
#[cfg(feature = "rocksdb")]
pub use rocksdb::RocksDBBackend;
