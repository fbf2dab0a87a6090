/// dstore in-memory emulator
///
/// A complete store behind the [`dstore_core::Transport`] seam: versioned
/// entities, id allocation, snapshot transactions with optimistic conflict
/// detection, query execution with cursors, and deferred lookups. It also
/// records every request and can inject failures, which makes it the backing
/// store for client tests.

pub mod config;
pub mod compare;
pub mod query;
pub mod store;
pub mod transaction;

pub use config::EmulatorConfig;
pub use store::MemoryStore;
