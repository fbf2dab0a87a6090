/// dstore async client library
///
/// This crate provides the client core for a hierarchical-key document store:
/// key and entity helpers, batched lookups and commits, paginated query
/// streams and optimistic transactions over any [`dstore_core::Transport`].

pub mod config;
pub mod batch;
pub mod request;
pub mod stream;
pub mod callback;
pub mod client;
pub mod transaction;

// Re-export key types
pub use batch::RequestBatcher;
pub use callback::CompletionExt;
pub use client::Datastore;
pub use config::ClientConfig;
pub use request::{DatastoreRequest, OneOrMany, OpFuture, QueryResponse, MAX_ALLOCATE_IDS};
pub use stream::{EntityStream, QueryStream};
pub use transaction::{Transaction, TransactionState};
pub use dstore_core::{
    double, geo_point, int, is_double, is_geo_point, is_int, is_key, path, CommitResult, Cursor,
    Direction, Double, Entity, EntityData, Error, FilterOperator, GeoPoint, Int, Key, KeyId,
    MoreResults, MutationMethod, MutationResult, PathToken, Property, PropertySpec, Query,
    QueryInfo, QueryOptions, ReadConsistency, Result, Transport, Value, Write,
};
