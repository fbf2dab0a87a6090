/// In-memory store
///
/// Keeps every revision of every entity tagged with the commit version that
/// wrote it, so transactions can read a consistent snapshot and commits can
/// detect writes that happened after that snapshot.

use crate::config::EmulatorConfig;
use crate::query::{execute, Snapshot};
use crate::transaction::TransactionRegistry;
use async_trait::async_trait;
use dstore_core::codec::{decode_entity, ValueKind, WireEntity};
use dstore_core::rpc::{
    key_only_entity, AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest,
    BeginTransactionResponse, CommitMode, CommitRequest, CommitResponse, EntityResult,
    LookupRequest, LookupResponse, RollbackRequest, RollbackResponse, RpcStatus,
    RunQueryRequest, RunQueryResponse, WireMutation, WireMutationResult,
};
use dstore_core::{
    Entity, Error, Key, QuerySpec, Result, RpcMethod, RpcRequest, RpcResponse, Transport,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Revision {
    version: i64,
    /// `None` marks a delete
    entity: Option<WireEntity>,
}

#[derive(Debug, Clone)]
struct StoreState {
    entities: BTreeMap<Key, Vec<Revision>>,
    /// Version of the last commit
    version: i64,
    next_id: i64,
}

#[derive(Debug)]
struct Inner {
    state: StoreState,
    transactions: TransactionRegistry,
}

/// In-memory store speaking the RPC protocol
#[derive(Debug)]
pub struct MemoryStore {
    config: EmulatorConfig,
    inner: Mutex<Inner>,
    log: Mutex<Vec<RpcRequest>>,
    failures: Mutex<HashMap<RpcMethod, VecDeque<Error>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::build(EmulatorConfig::default())
    }
}

impl MemoryStore {
    /// Create an empty store with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with custom configuration
    pub fn with_config(config: EmulatorConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(Self::build(config))
    }

    fn build(config: EmulatorConfig) -> Self {
        info!(
            page_size = config.page_size,
            lookup_batch_limit = config.lookup_batch_limit,
            "memory store created"
        );
        let state = StoreState {
            entities: BTreeMap::new(),
            version: 0,
            next_id: config.first_allocated_id,
        };
        Self {
            config,
            inner: Mutex::new(Inner {
                state,
                transactions: TransactionRegistry::default(),
            }),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Every request received, oldest first
    pub fn requests(&self) -> Vec<RpcRequest> {
        self.log.lock().clone()
    }

    /// Number of received requests for `method`
    pub fn count(&self, method: RpcMethod) -> usize {
        self.log.lock().iter().filter(|r| r.method() == method).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Fail the next call of `method` with `error` instead of handling it
    pub fn fail_next(&self, method: RpcMethod, error: Error) {
        self.failures.lock().entry(method).or_default().push_back(error);
    }

    /// Latest stored entity for `key`
    pub fn stored(&self, key: &Key) -> Option<Entity> {
        let inner = self.inner.lock();
        let (entity, _) = inner.state.read_at(key, None)?;
        decode_entity(entity).ok()
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.inner.lock().state.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transactions begun and not yet committed or rolled back
    pub fn open_transactions(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    fn take_failure(&self, method: RpcMethod) -> Option<Error> {
        self.failures.lock().get_mut(&method).and_then(VecDeque::pop_front)
    }

    fn allocate_ids(&self, request: AllocateIdsRequest) -> Result<AllocateIdsResponse> {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        let keys = request
            .keys
            .iter()
            .map(|key| {
                key.validate()?;
                if key.is_complete() {
                    return Err(Error::InvalidKeyPath(format!(
                        "cannot allocate an id for complete key {}",
                        key
                    )));
                }
                state.allocate(key).map_err(RpcStatus::into_error)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AllocateIdsResponse { keys })
    }

    fn lookup(&self, request: LookupRequest) -> Result<LookupResponse> {
        for key in &request.keys {
            key.ensure_complete("lookup")?;
        }
        let limit = self.config.lookup_batch_limit.min(request.keys.len());
        let mut keys = request.keys;
        let deferred = keys.split_off(limit);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let snapshot = match &request.read_options.transaction {
            Some(handle) => Some(inner.transactions.read(handle, keys.iter().cloned())?),
            None => None,
        };
        let state = &inner.state;

        let mut response = LookupResponse {
            deferred,
            ..Default::default()
        };
        for key in keys {
            match state.read_at(&key, snapshot) {
                Some((entity, version)) => response.found.push(EntityResult {
                    entity: entity.clone(),
                    version,
                    cursor: None,
                }),
                None => response.missing.push(EntityResult {
                    entity: key_only_entity(key),
                    version: snapshot.unwrap_or(state.version),
                    cursor: None,
                }),
            }
        }
        if !response.deferred.is_empty() {
            debug!(deferred = response.deferred.len(), "lookup deferred keys");
        }
        Ok(response)
    }

    fn run_query(&self, request: RunQueryRequest) -> Result<RunQueryResponse> {
        let spec = QuerySpec::from_wire(request.partition_id.namespace_id.as_deref(), &request.query)?;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let snapshot = match &request.read_options.transaction {
            Some(handle) => Some(inner.transactions.read(handle, std::iter::empty())?),
            None => None,
        };
        let snapshots = inner.state.snapshot_at(snapshot)?;
        let batch = execute(&spec, snapshots, self.config.page_size)?;

        if let Some(handle) = &request.read_options.transaction {
            let keys = batch.entity_results.iter().filter_map(|r| r.entity.key.clone());
            inner.transactions.read(handle, keys)?;
        }
        debug!(
            kind = %spec.kind,
            returned = batch.entity_results.len(),
            skipped = batch.skipped_results,
            more_results = batch.more_results.as_str(),
            "query page served"
        );
        Ok(RunQueryResponse { batch })
    }

    fn commit(&self, request: CommitRequest) -> Result<CommitResponse> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match (request.mode, request.transaction) {
            (CommitMode::NonTransactional, None) => {
                let state = &mut inner.state;
                let version = state.version + 1;
                let mut index_updates = 0;
                let mut applied = false;
                let mutation_results = request
                    .mutations
                    .into_iter()
                    .map(|mutation| match state.apply(mutation, version) {
                        Ok((result, updates)) => {
                            applied = true;
                            index_updates += updates;
                            result
                        }
                        Err(status) => {
                            debug!(code = %status.code, "mutation rejected");
                            WireMutationResult {
                                error: Some(status),
                                ..Default::default()
                            }
                        }
                    })
                    .collect();
                if applied {
                    state.version = version;
                }
                Ok(CommitResponse {
                    mutation_results,
                    index_updates,
                })
            }
            (CommitMode::Transactional, Some(handle)) => {
                let tx = inner.transactions.finish(&handle)?;
                let state = &mut inner.state;
                if tx.read_only && !request.mutations.is_empty() {
                    return Err(RpcStatus::new(
                        RpcStatus::INVALID_ARGUMENT,
                        "read-only transaction cannot write",
                    )
                    .into_error());
                }

                let touched = request
                    .mutations
                    .iter()
                    .filter_map(WireMutation::key)
                    .filter(|k| k.is_complete())
                    .chain(tx.read_set.iter());
                for key in touched {
                    if state.latest_version(key) > tx.snapshot_version {
                        warn!(key = %key, "transaction aborted by concurrent write");
                        return Err(RpcStatus::new(
                            RpcStatus::ABORTED,
                            format!("{} changed since the transaction began", key),
                        )
                        .into_error());
                    }
                }

                let version = state.version + 1;
                let before = state.clone();
                let mut mutation_results = Vec::with_capacity(request.mutations.len());
                let mut index_updates = 0;
                for mutation in request.mutations {
                    match state.apply(mutation, version) {
                        Ok((result, updates)) => {
                            index_updates += updates;
                            mutation_results.push(result);
                        }
                        Err(status) => {
                            *state = before;
                            return Err(status.into_error());
                        }
                    }
                }
                state.version = version;
                Ok(CommitResponse {
                    mutation_results,
                    index_updates,
                })
            }
            (mode, _) => Err(RpcStatus::new(
                RpcStatus::INVALID_ARGUMENT,
                format!("commit mode {:?} does not match the transaction field", mode),
            )
            .into_error()),
        }
    }

    fn begin_transaction(&self, request: BeginTransactionRequest) -> Result<BeginTransactionResponse> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let version = inner.state.version;
        let read_only = request.transaction_options.read_only;
        let transaction = inner.transactions.begin(version, read_only);
        debug!(snapshot = version, read_only, "transaction begun");
        Ok(BeginTransactionResponse { transaction })
    }

    fn rollback(&self, request: RollbackRequest) -> Result<RollbackResponse> {
        self.inner.lock().transactions.finish(&request.transaction)?;
        Ok(RollbackResponse {})
    }
}

#[async_trait]
impl Transport for MemoryStore {
    async fn send_rpc(&self, request: RpcRequest) -> Result<RpcResponse> {
        let method = request.method();
        self.log.lock().push(request.clone());

        if let Some(error) = self.take_failure(method) {
            warn!(method = %method, error = %error, "injected failure");
            return Err(error);
        }
        debug!(method = %method, items = request.item_count(), "handling rpc");

        match request {
            RpcRequest::AllocateIds(r) => self.allocate_ids(r).map(RpcResponse::AllocateIds),
            RpcRequest::Lookup(r) => self.lookup(r).map(RpcResponse::Lookup),
            RpcRequest::RunQuery(r) => self.run_query(r).map(RpcResponse::RunQuery),
            RpcRequest::Commit(r) => self.commit(r).map(RpcResponse::Commit),
            RpcRequest::BeginTransaction(r) => {
                self.begin_transaction(r).map(RpcResponse::BeginTransaction)
            }
            RpcRequest::Rollback(r) => self.rollback(r).map(RpcResponse::Rollback),
        }
    }
}

impl StoreState {
    /// Entity visible at `version` (latest when `None`) and the version that wrote it
    fn read_at(&self, key: &Key, version: Option<i64>) -> Option<(&WireEntity, i64)> {
        let revision = self
            .entities
            .get(key)?
            .iter()
            .rev()
            .find(|r| version.map_or(true, |v| r.version <= v))?;
        revision.entity.as_ref().map(|e| (e, revision.version))
    }

    fn latest_version(&self, key: &Key) -> i64 {
        self.entities
            .get(key)
            .and_then(|revisions| revisions.last())
            .map_or(0, |r| r.version)
    }

    fn exists(&self, key: &Key) -> bool {
        self.read_at(key, None).is_some()
    }

    fn live(&self) -> impl Iterator<Item = &WireEntity> {
        self.entities
            .values()
            .filter_map(|revisions| revisions.last().and_then(|r| r.entity.as_ref()))
    }

    fn snapshot_at(&self, version: Option<i64>) -> Result<Vec<Snapshot>> {
        self.entities
            .keys()
            .filter_map(|key| self.read_at(key, version))
            .map(|(entity, version)| {
                Ok(Snapshot {
                    entity: decode_entity(entity)?,
                    version,
                })
            })
            .collect()
    }

    /// Complete an incomplete key with the next unused numeric id
    fn allocate(&mut self, key: &Key) -> std::result::Result<Key, RpcStatus> {
        loop {
            let id = self.next_id;
            self.next_id += 1;
            let candidate = key.with_id(id).map_err(invalid_argument)?;
            if !self.entities.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    fn write(&mut self, key: Key, entity: Option<WireEntity>, version: i64) {
        self.entities
            .entry(key)
            .or_default()
            .push(Revision { version, entity });
    }

    /// Apply one mutation at `version`, returning its result and the number
    /// of index entries it touched
    fn apply(
        &mut self,
        mutation: WireMutation,
        version: i64,
    ) -> std::result::Result<(WireMutationResult, u32), RpcStatus> {
        let applied = |key: Option<Key>| WireMutationResult {
            key,
            version,
            ..Default::default()
        };

        match mutation {
            WireMutation::Insert(mut entity) => {
                let key = entity_key(&entity)?;
                key.validate().map_err(invalid_argument)?;
                let (key, allocated) = if key.is_complete() {
                    if self.exists(&key) {
                        return Err(RpcStatus::new(
                            RpcStatus::ALREADY_EXISTS,
                            format!("entity {} already exists", key),
                        ));
                    }
                    (key, false)
                } else {
                    (self.allocate(&key)?, true)
                };
                entity.key = Some(key.clone());
                let updates = index_entries(&entity);
                self.write(key.clone(), Some(entity), version);
                Ok((applied(allocated.then_some(key)), updates))
            }
            WireMutation::Update(entity) => {
                let key = entity_key(&entity)?;
                key.ensure_complete("update").map_err(invalid_argument)?;
                if !self.exists(&key) {
                    return Err(RpcStatus::new(
                        RpcStatus::NOT_FOUND,
                        format!("entity {} does not exist", key),
                    ));
                }
                let updates = index_entries(&entity);
                self.write(key, Some(entity), version);
                Ok((applied(None), updates))
            }
            WireMutation::Upsert(entity) => {
                let key = entity_key(&entity)?;
                key.ensure_complete("upsert").map_err(invalid_argument)?;
                let updates = index_entries(&entity);
                self.write(key, Some(entity), version);
                Ok((applied(None), updates))
            }
            WireMutation::Delete(key) => {
                key.ensure_complete("delete").map_err(invalid_argument)?;
                let updates = self.read_at(&key, None).map_or(0, |(e, _)| index_entries(e));
                if self.exists(&key) {
                    self.write(key, None, version);
                }
                Ok((applied(None), updates))
            }
        }
    }
}

fn entity_key(entity: &WireEntity) -> std::result::Result<Key, RpcStatus> {
    entity
        .key
        .clone()
        .ok_or_else(|| RpcStatus::new(RpcStatus::INVALID_ARGUMENT, "mutation entity has no key"))
}

fn invalid_argument(error: Error) -> RpcStatus {
    RpcStatus::new(RpcStatus::INVALID_ARGUMENT, error.to_string())
}

/// Indexed values written for an entity; array elements count individually
fn index_entries(entity: &WireEntity) -> u32 {
    entity
        .properties
        .values()
        .map(|value| match &value.kind {
            ValueKind::ArrayValue(array) => array
                .values
                .iter()
                .filter(|v| !v.exclude_from_indexes)
                .count() as u32,
            _ if value.exclude_from_indexes => 0,
            _ => 1,
        })
        .sum()
}
