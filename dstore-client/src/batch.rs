/// Request batcher
///
/// Turns one logical call over many keys or entities into the minimal set of
/// store RPCs and correlates the responses back to the caller's input.

use dstore_core::codec::{decode_entity, encode_entity};
use dstore_core::query::WireQuery;
use dstore_core::rpc::{
    AllocateIdsRequest, BeginTransactionRequest, CommitMode, CommitRequest, LookupRequest,
    PartitionId, QueryResultBatch, ReadOptions, RollbackRequest, RunQueryRequest,
    TransactionOptions, WireMutation,
};
use dstore_core::{
    CommitResult, Entity, Error, Key, Mutation, MutationResult, Result, RpcMethod, RpcRequest,
    RpcResponse, TransactionHandle, Transport,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared RPC front end used by the direct client and by transactions
#[derive(Clone)]
pub struct RequestBatcher {
    transport: Arc<dyn Transport>,
    project_id: Arc<str>,
}

impl std::fmt::Debug for RequestBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBatcher")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl RequestBatcher {
    pub fn new(transport: Arc<dyn Transport>, project_id: impl Into<Arc<str>>) -> Self {
        Self {
            transport,
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn send(&self, request: RpcRequest) -> Result<RpcResponse> {
        let method = request.method();
        debug!(method = %method, items = request.item_count(), "dispatching rpc");

        match self.transport.send_rpc(request).await {
            Ok(response) if response.method() == method => Ok(response),
            Ok(response) => Err(Error::Transport(format!(
                "{} returned a {} response",
                method,
                response.method()
            ))),
            Err(e) => {
                warn!(method = %method, error = %e, "rpc failed");
                Err(e)
            }
        }
    }

    /// Look up complete keys.
    ///
    /// Results follow the input order; keys the store does not have are
    /// omitted. Deferred keys are requested again until every key resolves.
    pub async fn lookup(&self, keys: Vec<Key>, read_options: ReadOptions) -> Result<Vec<Entity>> {
        let mut seen = HashSet::with_capacity(keys.len());
        let unique: Vec<Key> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let mut found: HashMap<Key, Entity> = HashMap::with_capacity(unique.len());
        let mut pending = unique.clone();
        let mut round = 0u32;

        while !pending.is_empty() {
            round += 1;
            let request = RpcRequest::Lookup(LookupRequest {
                project_id: self.project_id.to_string(),
                read_options: read_options.clone(),
                keys: pending.clone(),
            });
            let response = match self.send(request).await? {
                RpcResponse::Lookup(r) => r,
                _ => unreachable_response(RpcMethod::Lookup)?,
            };

            let resolved = response.found.len() + response.missing.len();
            for result in response.found {
                let entity = decode_entity(&result.entity)?;
                found.insert(entity.key.clone(), entity);
            }

            if !response.deferred.is_empty() && resolved == 0 {
                return Err(Error::Transport(format!(
                    "lookup made no progress: {} keys deferred in round {}",
                    response.deferred.len(),
                    round
                )));
            }
            if !response.deferred.is_empty() {
                debug!(deferred = response.deferred.len(), round, "re-requesting deferred keys");
            }
            pending = response.deferred;
        }

        Ok(unique.iter().filter_map(|k| found.remove(k)).collect())
    }

    /// Run one page of a query
    pub async fn run_query_page(
        &self,
        namespace: Option<String>,
        query: WireQuery,
        read_options: ReadOptions,
    ) -> Result<QueryResultBatch> {
        let request = RpcRequest::RunQuery(RunQueryRequest {
            project_id: self.project_id.to_string(),
            partition_id: PartitionId {
                namespace_id: namespace,
            },
            read_options,
            query,
        });
        match self.send(request).await? {
            RpcResponse::RunQuery(r) => Ok(r.batch),
            _ => unreachable_response(RpcMethod::RunQuery),
        }
    }

    /// Commit encoded mutations, one result per mutation in submission order
    pub async fn commit(
        &self,
        mutations: Vec<WireMutation>,
        transaction: Option<TransactionHandle>,
    ) -> Result<CommitResult> {
        let submitted = mutations.len();
        let mode = if transaction.is_some() {
            CommitMode::Transactional
        } else {
            CommitMode::NonTransactional
        };
        let request = RpcRequest::Commit(CommitRequest {
            project_id: self.project_id.to_string(),
            mode,
            transaction,
            mutations,
        });
        let response = match self.send(request).await? {
            RpcResponse::Commit(r) => r,
            _ => unreachable_response(RpcMethod::Commit)?,
        };

        if response.mutation_results.len() != submitted {
            return Err(Error::Transport(format!(
                "commit returned {} results for {} mutations",
                response.mutation_results.len(),
                submitted
            )));
        }

        // Transactional commits are all-or-nothing
        if mode == CommitMode::Transactional {
            if let Some((index, status)) = response
                .mutation_results
                .iter()
                .enumerate()
                .find_map(|(i, r)| r.error.as_ref().map(|s| (i, s)))
            {
                warn!(index, code = %status.code, "transactional commit rejected");
                return Err(status.clone().into_error());
            }
        }

        let mutation_results = response
            .mutation_results
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result.error {
                Some(status) => {
                    warn!(index, code = %status.code, "mutation rejected");
                    Err(status.into_error())
                }
                None => {
                    if result.conflict_detected {
                        warn!(index, "mutation applied with conflict detected");
                    }
                    Ok(MutationResult {
                        key: result.key,
                        version: result.version,
                        conflict_detected: result.conflict_detected,
                    })
                }
            })
            .collect();

        Ok(CommitResult {
            mutation_results,
            index_updates: response.index_updates,
        })
    }

    /// Allocate `n` ids for an incomplete key
    pub async fn allocate_ids(&self, incomplete_key: Key, n: u32) -> Result<Vec<Key>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let request = RpcRequest::AllocateIds(AllocateIdsRequest {
            project_id: self.project_id.to_string(),
            keys: vec![incomplete_key; n as usize],
        });
        let keys = match self.send(request).await? {
            RpcResponse::AllocateIds(r) => r.keys,
            _ => unreachable_response(RpcMethod::AllocateIds)?,
        };
        if keys.len() != n as usize || keys.iter().any(|k| !k.is_complete()) {
            return Err(Error::Transport(format!(
                "allocateIds returned {} keys for {} requested",
                keys.len(),
                n
            )));
        }
        Ok(keys)
    }

    pub async fn begin_transaction(&self, read_only: bool) -> Result<TransactionHandle> {
        let request = RpcRequest::BeginTransaction(BeginTransactionRequest {
            project_id: self.project_id.to_string(),
            transaction_options: TransactionOptions { read_only },
        });
        match self.send(request).await? {
            RpcResponse::BeginTransaction(r) => Ok(r.transaction),
            _ => unreachable_response(RpcMethod::BeginTransaction),
        }
    }

    pub async fn rollback(&self, transaction: TransactionHandle) -> Result<()> {
        let request = RpcRequest::Rollback(RollbackRequest {
            project_id: self.project_id.to_string(),
            transaction,
        });
        match self.send(request).await? {
            RpcResponse::Rollback(_) => Ok(()),
            _ => unreachable_response(RpcMethod::Rollback),
        }
    }
}

/// `send` already rejects mismatched response variants
fn unreachable_response<T>(method: RpcMethod) -> Result<T> {
    Err(Error::Transport(format!("unexpected response to {}", method)))
}

/// Validate and encode mutations ahead of any network call
pub fn encode_mutations(mutations: Vec<Mutation>) -> Result<Vec<WireMutation>> {
    mutations
        .into_iter()
        .map(|mutation| {
            mutation.validate()?;
            Ok(match mutation {
                Mutation::Insert(e) => WireMutation::Insert(encode_entity(Some(&e.key), &e.data)?),
                Mutation::Update(e) => WireMutation::Update(encode_entity(Some(&e.key), &e.data)?),
                Mutation::Upsert(e) => WireMutation::Upsert(encode_entity(Some(&e.key), &e.data)?),
                Mutation::Delete(k) => WireMutation::Delete(k),
            })
        })
        .collect()
}
