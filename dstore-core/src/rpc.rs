/// RPC message shapes
///
/// One request/response pair per store method. The structs serialize to the
/// store's camelCase JSON shape so a transport can send them unchanged.

use crate::codec::WireEntity;
use crate::error::Error;
use crate::key::Key;
use crate::query::{Cursor, MoreResults, ReadConsistency, WireQuery};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque server-assigned transaction handle
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransactionHandle(Bytes);

impl TransactionHandle {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        TransactionHandle(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHandle({})", BASE64.encode(&self.0))
    }
}

impl Serialize for TransactionHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for TransactionHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map(|bytes| TransactionHandle(Bytes::from(bytes)))
            .map_err(serde::de::Error::custom)
    }
}

/// Either a consistency level or a transaction to read within
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_consistency: Option<ReadConsistency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHandle>,
}

impl ReadOptions {
    pub fn consistency(consistency: Option<ReadConsistency>) -> Self {
        Self {
            read_consistency: consistency,
            transaction: None,
        }
    }

    pub fn in_transaction(handle: TransactionHandle) -> Self {
        Self {
            read_consistency: None,
            transaction: Some(handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
}

// ============================================================================
// AllocateIds
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateIdsRequest {
    pub project_id: String,
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateIdsResponse {
    #[serde(default)]
    pub keys: Vec<Key>,
}

// ============================================================================
// Lookup
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    pub project_id: String,
    #[serde(default)]
    pub read_options: ReadOptions,
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityResult {
    pub entity: WireEntity,
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    #[serde(default)]
    pub found: Vec<EntityResult>,
    #[serde(default)]
    pub missing: Vec<EntityResult>,
    #[serde(default)]
    pub deferred: Vec<Key>,
}

// ============================================================================
// RunQuery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub project_id: String,
    #[serde(default)]
    pub partition_id: PartitionId,
    #[serde(default)]
    pub read_options: ReadOptions,
    pub query: WireQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    /// Key only
    KeyOnly,
    /// Projected properties only
    Projection,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultBatch {
    pub entity_result_type: ResultType,
    #[serde(default)]
    pub entity_results: Vec<EntityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<Cursor>,
    pub more_results: MoreResults,
    #[serde(default)]
    pub skipped_results: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub batch: QueryResultBatch,
}

// ============================================================================
// Commit
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitMode {
    Transactional,
    NonTransactional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireMutation {
    Insert(WireEntity),
    Update(WireEntity),
    Upsert(WireEntity),
    Delete(Key),
}

impl WireMutation {
    pub fn key(&self) -> Option<&Key> {
        match self {
            WireMutation::Insert(e) | WireMutation::Update(e) | WireMutation::Upsert(e) => {
                e.key.as_ref()
            }
            WireMutation::Delete(k) => Some(k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub project_id: String,
    pub mode: CommitMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHandle>,
    pub mutations: Vec<WireMutation>,
}

/// Status attached to a failed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: String,
    pub message: String,
}

impl RpcStatus {
    pub const ALREADY_EXISTS: &'static str = "ALREADY_EXISTS";
    pub const NOT_FOUND: &'static str = "NOT_FOUND";
    pub const ABORTED: &'static str = "ABORTED";
    pub const FAILED_PRECONDITION: &'static str = "FAILED_PRECONDITION";
    pub const INVALID_ARGUMENT: &'static str = "INVALID_ARGUMENT";

    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Precondition and contention codes are conflicts the caller can react to
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.code.as_str(),
            Self::ALREADY_EXISTS | Self::NOT_FOUND | Self::ABORTED | Self::FAILED_PRECONDITION
        )
    }

    pub fn into_error(self) -> Error {
        let message = format!("{}: {}", self.code, self.message);
        if self.is_conflict() {
            Error::MutationConflict(message)
        } else {
            Error::Transport(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMutationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub conflict_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub mutation_results: Vec<WireMutationResult>,
    #[serde(default)]
    pub index_updates: u32,
}

// ============================================================================
// BeginTransaction / Rollback
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptions {
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionRequest {
    pub project_id: String,
    #[serde(default)]
    pub transaction_options: TransactionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginTransactionResponse {
    pub transaction: TransactionHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub project_id: String,
    pub transaction: TransactionHandle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RollbackResponse {}

// ============================================================================
// Envelopes
// ============================================================================

/// Store method names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    AllocateIds,
    Lookup,
    RunQuery,
    Commit,
    BeginTransaction,
    Rollback,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::AllocateIds => "allocateIds",
            RpcMethod::Lookup => "lookup",
            RpcMethod::RunQuery => "runQuery",
            RpcMethod::Commit => "commit",
            RpcMethod::BeginTransaction => "beginTransaction",
            RpcMethod::Rollback => "rollback",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcRequest {
    AllocateIds(AllocateIdsRequest),
    Lookup(LookupRequest),
    RunQuery(RunQueryRequest),
    Commit(CommitRequest),
    BeginTransaction(BeginTransactionRequest),
    Rollback(RollbackRequest),
}

impl RpcRequest {
    pub fn method(&self) -> RpcMethod {
        match self {
            RpcRequest::AllocateIds(_) => RpcMethod::AllocateIds,
            RpcRequest::Lookup(_) => RpcMethod::Lookup,
            RpcRequest::RunQuery(_) => RpcMethod::RunQuery,
            RpcRequest::Commit(_) => RpcMethod::Commit,
            RpcRequest::BeginTransaction(_) => RpcMethod::BeginTransaction,
            RpcRequest::Rollback(_) => RpcMethod::Rollback,
        }
    }

    /// Number of keys, mutations or queries carried, for logging
    pub fn item_count(&self) -> usize {
        match self {
            RpcRequest::AllocateIds(r) => r.keys.len(),
            RpcRequest::Lookup(r) => r.keys.len(),
            RpcRequest::RunQuery(_) => 1,
            RpcRequest::Commit(r) => r.mutations.len(),
            RpcRequest::BeginTransaction(_) => 0,
            RpcRequest::Rollback(_) => 0,
        }
    }

    /// JSON request body for the method
    pub fn to_json(&self) -> serde_json::Value {
        let body = match self {
            RpcRequest::AllocateIds(r) => serde_json::to_value(r),
            RpcRequest::Lookup(r) => serde_json::to_value(r),
            RpcRequest::RunQuery(r) => serde_json::to_value(r),
            RpcRequest::Commit(r) => serde_json::to_value(r),
            RpcRequest::BeginTransaction(r) => serde_json::to_value(r),
            RpcRequest::Rollback(r) => serde_json::to_value(r),
        };
        body.unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    AllocateIds(AllocateIdsResponse),
    Lookup(LookupResponse),
    RunQuery(RunQueryResponse),
    Commit(CommitResponse),
    BeginTransaction(BeginTransactionResponse),
    Rollback(RollbackResponse),
}

impl RpcResponse {
    pub fn method(&self) -> RpcMethod {
        match self {
            RpcResponse::AllocateIds(_) => RpcMethod::AllocateIds,
            RpcResponse::Lookup(_) => RpcMethod::Lookup,
            RpcResponse::RunQuery(_) => RpcMethod::RunQuery,
            RpcResponse::Commit(_) => RpcMethod::Commit,
            RpcResponse::BeginTransaction(_) => RpcMethod::BeginTransaction,
            RpcResponse::Rollback(_) => RpcMethod::Rollback,
        }
    }

    /// Parse the JSON response body of `method`
    pub fn from_json(method: RpcMethod, body: serde_json::Value) -> crate::Result<Self> {
        let parsed = match method {
            RpcMethod::AllocateIds => serde_json::from_value(body).map(RpcResponse::AllocateIds),
            RpcMethod::Lookup => serde_json::from_value(body).map(RpcResponse::Lookup),
            RpcMethod::RunQuery => serde_json::from_value(body).map(RpcResponse::RunQuery),
            RpcMethod::Commit => serde_json::from_value(body).map(RpcResponse::Commit),
            RpcMethod::BeginTransaction => {
                serde_json::from_value(body).map(RpcResponse::BeginTransaction)
            }
            RpcMethod::Rollback => serde_json::from_value(body).map(RpcResponse::Rollback),
        };
        parsed.map_err(|e| Error::Transport(format!("malformed {} response: {}", method, e)))
    }
}

/// Entity carrying only its key, as used for `missing` lookup results
pub fn key_only_entity(key: Key) -> WireEntity {
    WireEntity {
        key: Some(key),
        properties: Default::default(),
    }
}
