/// Shared request surface
///
/// Both the direct client and transactions expose the same read/write
/// capability set. Every operation validates its input synchronously and
/// returns a boxed future; awaiting it, attaching a completion callback or
/// (for reads) streaming it all drive the same underlying call once.

use crate::stream::{EntityStream, QueryStream};
use dstore_core::{Entity, Error, Key, Query, QueryInfo, QueryOptions, Result, Write};
use futures::future::{self, BoxFuture, FutureExt};

/// Future returned by every store operation
pub type OpFuture<T> = BoxFuture<'static, Result<T>>;

/// Entities returned by a query run plus the position information
pub type QueryResponse = (Vec<Entity>, QueryInfo);

/// A single item or a list of items
#[derive(Debug, Clone, PartialEq)]
pub struct OneOrMany<T>(Vec<T>);

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

macro_rules! one_or_many {
    ($item:ty => $target:ty) => {
        impl From<$item> for OneOrMany<$target> {
            fn from(item: $item) -> Self {
                OneOrMany(vec![item.into()])
            }
        }

        impl From<Vec<$item>> for OneOrMany<$target> {
            fn from(items: Vec<$item>) -> Self {
                OneOrMany(items.into_iter().map(Into::into).collect())
            }
        }

        impl From<&[$item]> for OneOrMany<$target> {
            fn from(items: &[$item]) -> Self {
                OneOrMany(items.iter().cloned().map(Into::into).collect())
            }
        }
    };
}

one_or_many!(Key => Key);
one_or_many!(Entity => Entity);
one_or_many!(Write => Write);
one_or_many!(Entity => Write);

/// Read/write capability set shared by [`crate::Datastore`] and [`crate::Transaction`]
pub trait DatastoreRequest {
    /// What a write resolves to: commit results for the direct client, nothing
    /// for a transaction (writes are staged until commit)
    type WriteOutput: Send + 'static;

    /// Allocate `n` complete keys for an incomplete key
    fn allocate_ids(&self, incomplete_key: &Key, n: u32) -> OpFuture<Vec<Key>>;

    /// Look up keys with explicit read options
    fn get_with_options(&self, keys: &[Key], options: QueryOptions) -> OpFuture<Vec<Entity>>;

    /// Lazy stream of looked-up entities
    fn create_read_stream(&self, keys: &[Key], options: QueryOptions) -> Result<EntityStream>;

    /// Run a query, following cursors within the call budget of `options`
    fn run_query_stream(&self, query: &Query, options: QueryOptions) -> Result<QueryStream>;

    /// Stage or commit writes, each with its own method
    fn write(&self, writes: Vec<Write>) -> OpFuture<Self::WriteOutput>;

    /// Stage or commit deletes
    fn delete(&self, keys: impl Into<OneOrMany<Key>>) -> OpFuture<Self::WriteOutput>;

    /// Look up a single key
    fn get(&self, key: &Key) -> OpFuture<Option<Entity>> {
        self.get_with_options(std::slice::from_ref(key), QueryOptions::default())
            .map(|res| res.map(|entities| entities.into_iter().next()))
            .boxed()
    }

    /// Look up many keys; missing keys are omitted, found entities keep input order
    fn get_many(&self, keys: &[Key]) -> OpFuture<Vec<Entity>> {
        self.get_with_options(keys, QueryOptions::default())
    }

    /// Run a query and aggregate every fetched page
    fn run_query(&self, query: &Query) -> OpFuture<QueryResponse> {
        self.run_query_with_options(query, QueryOptions::default())
    }

    fn run_query_with_options(&self, query: &Query, options: QueryOptions) -> OpFuture<QueryResponse> {
        match self.run_query_stream(query, options) {
            Ok(stream) => stream.collect_all().boxed(),
            Err(e) => ready_err(e),
        }
    }

    /// Save entities; complete keys upsert and incomplete keys insert unless
    /// a `Write` names its method
    fn save(&self, entities: impl Into<OneOrMany<Write>>) -> OpFuture<Self::WriteOutput> {
        self.write(entities.into().into_vec())
    }

    fn insert(&self, entities: impl Into<OneOrMany<Entity>>) -> OpFuture<Self::WriteOutput> {
        self.write(entities.into().into_vec().into_iter().map(Write::insert).collect())
    }

    fn update(&self, entities: impl Into<OneOrMany<Entity>>) -> OpFuture<Self::WriteOutput> {
        self.write(entities.into().into_vec().into_iter().map(Write::update).collect())
    }

    fn upsert(&self, entities: impl Into<OneOrMany<Entity>>) -> OpFuture<Self::WriteOutput> {
        self.write(entities.into().into_vec().into_iter().map(Write::upsert).collect())
    }
}

pub(crate) fn ready_err<T: Send + 'static>(error: Error) -> OpFuture<T> {
    future::ready(Err(error)).boxed()
}

/// Check keys for a read or delete
pub(crate) fn require_complete(keys: &[Key], operation: &str) -> Result<()> {
    keys.iter().try_for_each(|k| k.ensure_complete(operation))
}

/// Most ids one allocateIds call may request
pub const MAX_ALLOCATE_IDS: u32 = 1000;

/// Check the key and count handed to allocation
pub(crate) fn require_allocation(key: &Key, n: u32) -> Result<()> {
    key.validate()?;
    if key.is_complete() {
        return Err(Error::InvalidKeyPath(format!(
            "allocateIds needs an incomplete key, got {}",
            key
        )));
    }
    if n > MAX_ALLOCATE_IDS {
        return Err(Error::InvalidValue(format!(
            "allocateIds can request at most {} ids, got {}",
            MAX_ALLOCATE_IDS, n
        )));
    }
    Ok(())
}
