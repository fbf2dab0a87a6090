/// Direct (non-transactional) client

use crate::batch::{encode_mutations, RequestBatcher};
use crate::config::ClientConfig;
use crate::request::{ready_err, require_allocation, require_complete, DatastoreRequest, OneOrMany, OpFuture};
use crate::stream::{entity_stream, EntityStream, QueryStream};
use crate::transaction::Transaction;
use dstore_core::rpc::ReadOptions;
use dstore_core::{
    CommitResult, Entity, Error, Key, Mutation, PathToken, Query, QueryOptions, Result, Transport,
    Write,
};
use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

/// Client bound to one project and transport
#[derive(Debug, Clone)]
pub struct Datastore {
    config: Arc<ClientConfig>,
    batcher: RequestBatcher,
}

impl Datastore {
    /// Create a client over `transport`
    ///
    /// # Example
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use dstore_client::{ClientConfig, Datastore, DatastoreRequest};
    /// # use dstore_core::{Entity, EntityData, Transport};
    /// # async fn example(transport: Arc<dyn Transport>) -> dstore_core::Result<()> {
    /// let datastore = Datastore::new(ClientConfig::new("demo"), transport)?;
    /// let key = datastore.key(dstore_core::path!["Task", "sample"])?;
    /// let data = EntityData::new().with("description", "Buy milk");
    /// datastore.save(Entity::new(key, data)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        info!(
            project_id = %config.project_id,
            namespace = config.namespace.as_deref().unwrap_or(""),
            endpoint = %config.base_url(),
            "datastore client created"
        );
        let batcher = RequestBatcher::new(transport, config.project_id.as_str());
        Ok(Self {
            config: Arc::new(config),
            batcher,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Default namespace applied to keys and queries built by this client
    pub fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    /// Key in the client's default namespace from a flattened path
    pub fn key(&self, path: Vec<PathToken>) -> Result<Key> {
        Key::from_path(self.namespace(), path)
    }

    /// Key in an explicit namespace
    pub fn key_in(&self, namespace: &str, path: Vec<PathToken>) -> Result<Key> {
        Key::from_path(Some(namespace), path)
    }

    /// Key from a JSON path such as `["Company", 5, "Employee", "bob"]`
    pub fn key_from_json(&self, path: &serde_json::Value) -> Result<Key> {
        Key::from_json_path(self.namespace(), path)
    }

    pub fn create_query(&self, kind: impl Into<String>) -> Query {
        Query::new(self.namespace(), kind)
    }

    pub fn create_query_in(&self, namespace: &str, kind: impl Into<String>) -> Query {
        Query::new(Some(namespace), kind)
    }

    /// New read-write transaction; call `run` before using it
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.batcher.clone(), self.config.namespace.clone(), false)
    }

    /// New read-only transaction; committing staged writes fails locally
    pub fn read_only_transaction(&self) -> Transaction {
        Transaction::new(self.batcher.clone(), self.config.namespace.clone(), true)
    }
}

impl DatastoreRequest for Datastore {
    type WriteOutput = CommitResult;

    fn allocate_ids(&self, incomplete_key: &Key, n: u32) -> OpFuture<Vec<Key>> {
        if let Err(e) = require_allocation(incomplete_key, n) {
            return ready_err(e);
        }
        let batcher = self.batcher.clone();
        let key = incomplete_key.clone();
        async move { batcher.allocate_ids(key, n).await }.boxed()
    }

    fn get_with_options(&self, keys: &[Key], options: QueryOptions) -> OpFuture<Vec<Entity>> {
        if let Err(e) = require_complete(keys, "get") {
            return ready_err(e);
        }
        let batcher = self.batcher.clone();
        let keys = keys.to_vec();
        let read_options = ReadOptions::consistency(options.consistency);
        async move { batcher.lookup(keys, read_options).await }.boxed()
    }

    fn create_read_stream(&self, keys: &[Key], options: QueryOptions) -> Result<EntityStream> {
        require_complete(keys, "createReadStream")?;
        Ok(entity_stream(self.get_with_options(keys, options)))
    }

    fn run_query_stream(&self, query: &Query, options: QueryOptions) -> Result<QueryStream> {
        let wire = query.to_wire()?;
        Ok(QueryStream::new(
            self.batcher.clone(),
            query.namespace().map(str::to_string),
            wire,
            ReadOptions::consistency(options.consistency),
            options.call_budget(),
        ))
    }

    fn write(&self, writes: Vec<Write>) -> OpFuture<CommitResult> {
        let mutations = match encode_mutations(writes.into_iter().map(Mutation::from).collect()) {
            Ok(m) => m,
            Err(e) => return ready_err(e),
        };
        let batcher = self.batcher.clone();
        async move { batcher.commit(mutations, None).await }.boxed()
    }

    fn delete(&self, keys: impl Into<OneOrMany<Key>>) -> OpFuture<CommitResult> {
        let keys = keys.into().into_vec();
        let mutations = match encode_mutations(keys.into_iter().map(Mutation::Delete).collect()) {
            Ok(m) => m,
            Err(e) => return ready_err(e),
        };
        let batcher = self.batcher.clone();
        async move { batcher.commit(mutations, None).await }.boxed()
    }
}
