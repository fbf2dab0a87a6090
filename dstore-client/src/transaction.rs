/// Transaction coordinator
///
/// A transaction moves `NOT_STARTED -> ACTIVE -> {COMMITTED, ROLLED_BACK}`.
/// `run` obtains the server handle. While active, writes are staged locally
/// and reads go to the store immediately against the transaction snapshot.
/// `commit` sends every staged mutation in one Commit RPC. A transaction is
/// single-use: once terminal it accepts nothing but `allocate_ids`.

use crate::batch::{encode_mutations, RequestBatcher};
use crate::request::{
    ready_err, require_allocation, require_complete, DatastoreRequest, OneOrMany, OpFuture,
};
use crate::stream::{entity_stream, EntityStream, QueryStream};
use dstore_core::rpc::{ReadOptions, WireMutation};
use dstore_core::{
    CommitResult, Entity, Error, Key, Mutation, Query, QueryOptions, Result, TransactionHandle,
    Write,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Externally visible transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionState::NotStarted => "NOT_STARTED",
            TransactionState::Active => "ACTIVE",
            TransactionState::Committed => "COMMITTED",
            TransactionState::RolledBack => "ROLLED_BACK",
        })
    }
}

#[derive(Debug, Clone)]
enum Phase {
    NotStarted,
    /// BeginTransaction in flight
    Beginning,
    Active(TransactionHandle),
    /// Commit in flight
    Committing,
    Committed,
    RolledBack,
}

impl Phase {
    fn state(&self) -> TransactionState {
        match self {
            Phase::NotStarted | Phase::Beginning => TransactionState::NotStarted,
            Phase::Active(_) | Phase::Committing => TransactionState::Active,
            Phase::Committed => TransactionState::Committed,
            Phase::RolledBack => TransactionState::RolledBack,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::RolledBack)
    }
}

struct Inner {
    phase: Phase,
    staged: Vec<WireMutation>,
}

/// Transaction handle; clones share the same transaction
#[derive(Clone)]
pub struct Transaction {
    batcher: RequestBatcher,
    namespace: Option<String>,
    read_only: bool,
    inner: Arc<Mutex<Inner>>,
}

impl Transaction {
    pub(crate) fn new(batcher: RequestBatcher, namespace: Option<String>, read_only: bool) -> Self {
        Self {
            batcher,
            namespace,
            read_only,
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::NotStarted,
                staged: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().phase.state()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Server handle, once `run` has completed
    pub fn handle(&self) -> Option<TransactionHandle> {
        match &self.inner.lock().phase {
            Phase::Active(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Number of mutations waiting for commit
    pub fn staged_len(&self) -> usize {
        self.inner.lock().staged.len()
    }

    /// Query in the transaction's default namespace
    pub fn create_query(&self, kind: impl Into<String>) -> Query {
        Query::new(self.namespace.as_deref(), kind)
    }

    /// Begin the transaction
    pub fn run(&self) -> OpFuture<TransactionHandle> {
        {
            let mut inner = self.inner.lock();
            if !matches!(inner.phase, Phase::NotStarted) {
                return ready_err(invalid_state("run", &inner.phase));
            }
            inner.phase = Phase::Beginning;
        }

        let batcher = self.batcher.clone();
        let inner = self.inner.clone();
        let read_only = self.read_only;
        async move {
            match batcher.begin_transaction(read_only).await {
                Ok(handle) => {
                    debug!(?handle, read_only, "transaction active");
                    inner.lock().phase = Phase::Active(handle.clone());
                    Ok(handle)
                }
                Err(e) => {
                    warn!(error = %e, "begin transaction failed");
                    inner.lock().phase = Phase::NotStarted;
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// Send all staged mutations atomically
    pub fn commit(&self) -> OpFuture<CommitResult> {
        let (handle, mutations) = {
            let mut inner = self.inner.lock();
            let handle = match &inner.phase {
                Phase::Active(handle) => handle.clone(),
                other => return ready_err(invalid_state("commit", other)),
            };
            if self.read_only && !inner.staged.is_empty() {
                return ready_err(Error::InvalidTransactionState(format!(
                    "read-only transaction cannot commit {} staged mutations",
                    inner.staged.len()
                )));
            }
            inner.phase = Phase::Committing;
            (handle, std::mem::take(&mut inner.staged))
        };

        let batcher = self.batcher.clone();
        let inner = self.inner.clone();
        async move {
            let count = mutations.len();
            match batcher.commit(mutations, Some(handle.clone())).await {
                Ok(result) => {
                    debug!(mutations = count, "transaction committed");
                    inner.lock().phase = Phase::Committed;
                    Ok(result)
                }
                Err(e) => {
                    warn!(error = %e, mutations = count, "transaction commit failed");
                    inner.lock().phase = Phase::RolledBack;
                    if let Err(release) = batcher.rollback(handle).await {
                        warn!(error = %release, "rollback after failed commit failed");
                    }
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// Discard staged mutations and release the server handle.
    ///
    /// The transaction is rolled back as soon as this is called; the returned
    /// future only reports whether the store acknowledged the release.
    pub fn rollback(&self) -> OpFuture<()> {
        let handle = {
            let mut inner = self.inner.lock();
            let handle = match &inner.phase {
                Phase::Active(handle) => handle.clone(),
                other => return ready_err(invalid_state("rollback", other)),
            };
            let discarded = inner.staged.len();
            inner.staged.clear();
            inner.phase = Phase::RolledBack;
            debug!(discarded, "transaction rolled back");
            handle
        };

        let batcher = self.batcher.clone();
        async move { batcher.rollback(handle).await }.boxed()
    }

    fn active_handle(&self, operation: &str) -> Result<TransactionHandle> {
        match &self.inner.lock().phase {
            Phase::Active(handle) => Ok(handle.clone()),
            other => Err(invalid_state(operation, other)),
        }
    }

    /// Stage mutations; a later mutation of the same complete key replaces
    /// the earlier one
    fn stage(&self, operation: &str, mutations: Vec<Mutation>) -> Result<()> {
        let encoded = encode_mutations(mutations)?;
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Active(_)) {
            return Err(invalid_state(operation, &inner.phase));
        }
        for mutation in encoded {
            if let Some(key) = mutation.key().filter(|k| k.is_complete()).cloned() {
                inner.staged.retain(|staged| staged.key() != Some(&key));
            }
            inner.staged.push(mutation);
        }
        debug!(staged = inner.staged.len(), operation, "mutations staged");
        Ok(())
    }
}

fn invalid_state(operation: &str, phase: &Phase) -> Error {
    let detail = match phase {
        Phase::Beginning => "while it is starting".to_string(),
        Phase::Committing => "while its commit is in progress".to_string(),
        other => format!("in state {}", other.state()),
    };
    Error::InvalidTransactionState(format!("cannot {} a transaction {}", operation, detail))
}

impl DatastoreRequest for Transaction {
    type WriteOutput = ();

    fn allocate_ids(&self, incomplete_key: &Key, n: u32) -> OpFuture<Vec<Key>> {
        if let Err(e) = require_allocation(incomplete_key, n) {
            return ready_err(e);
        }
        let phase = self.inner.lock().phase.clone();
        if phase.is_terminal() {
            return ready_err(invalid_state("allocate ids in", &phase));
        }
        let batcher = self.batcher.clone();
        let key = incomplete_key.clone();
        async move { batcher.allocate_ids(key, n).await }.boxed()
    }

    /// Reads use the transaction snapshot; `options.consistency` is ignored
    fn get_with_options(&self, keys: &[Key], _options: QueryOptions) -> OpFuture<Vec<Entity>> {
        if let Err(e) = require_complete(keys, "get") {
            return ready_err(e);
        }
        let handle = match self.active_handle("read in") {
            Ok(h) => h,
            Err(e) => return ready_err(e),
        };
        let batcher = self.batcher.clone();
        let keys = keys.to_vec();
        async move { batcher.lookup(keys, ReadOptions::in_transaction(handle)).await }.boxed()
    }

    fn create_read_stream(&self, keys: &[Key], options: QueryOptions) -> Result<EntityStream> {
        require_complete(keys, "createReadStream")?;
        self.active_handle("read in")?;
        Ok(entity_stream(self.get_with_options(keys, options)))
    }

    fn run_query_stream(&self, query: &Query, options: QueryOptions) -> Result<QueryStream> {
        let wire = query.to_wire()?;
        let handle = self.active_handle("query in")?;
        Ok(QueryStream::new(
            self.batcher.clone(),
            query.namespace().map(str::to_string),
            wire,
            ReadOptions::in_transaction(handle),
            options.call_budget(),
        ))
    }

    fn write(&self, writes: Vec<Write>) -> OpFuture<()> {
        let mutations = writes.into_iter().map(Mutation::from).collect();
        futures::future::ready(self.stage("save in", mutations)).boxed()
    }

    fn delete(&self, keys: impl Into<OneOrMany<Key>>) -> OpFuture<()> {
        let mutations = keys.into().into_vec().into_iter().map(Mutation::Delete).collect();
        futures::future::ready(self.stage("delete in", mutations)).boxed()
    }
}
