pub mod error;
pub mod key;
pub mod value;
pub mod entity;
pub mod codec;
pub mod query;
pub mod mutation;
pub mod rpc; // store method request/response shapes
pub mod transport;

pub use error::{Error, Result};
pub use key::{Key, KeyId, PathElement, PathToken};
pub use value::{double, geo_point, int, is_double, is_geo_point, is_int, is_key, Double, GeoPoint, Int, Value};
pub use entity::{Entity, EntityData, Property, PropertySpec};
pub use query::{
    Cursor, Direction, Filter, FilterOperator, MoreResults, Order, Query, QueryInfo, QueryOptions,
    QuerySpec, ReadConsistency, KEY_PROPERTY,
};
pub use mutation::{CommitResult, Mutation, MutationMethod, MutationResult, Write};
pub use rpc::{RpcMethod, RpcRequest, RpcResponse, RpcStatus, TransactionHandle};
pub use transport::Transport;

/// Build a flattened key path from mixed kinds and identifiers.
///
/// ```
/// use dstore_core::{path, Key};
/// let key = Key::from_path(None, path!["Company", 5, "Employee", "bob"]).unwrap();
/// assert_eq!(key.name(), Some("bob"));
/// ```
#[macro_export]
macro_rules! path {
    ($($token:expr),* $(,)?) => {
        ::std::vec![$($crate::key::PathToken::from($token)),*]
    };
}
