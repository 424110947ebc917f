//! utxoindex-storage: storage backends for UtxoIndex.
//!
//! Backends:
//! - [`memory`]: in-memory block store with `argMax(status, updated_at)`
//!   winner semantics, an operation journal, and fault injection (dev/testing)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{InMemoryRepository, RepositoryCall};
