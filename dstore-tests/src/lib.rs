/// Test utilities and helpers for dstore testing
///
/// This module provides an emulator-backed client, a scripted transport for
/// exact wire assertions, and an entity generator.

use async_trait::async_trait;
use dstore_client::{ClientConfig, Datastore};
use dstore_core::{
    Entity, EntityData, Error, Key, Result, RpcMethod, RpcRequest, RpcResponse, Transport,
};
use dstore_emulator::{EmulatorConfig, MemoryStore};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Project id used by every test client
pub const TEST_PROJECT: &str = "test-project";

/// Install a test-friendly tracing subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Client wired to a fresh in-memory store
pub struct TestDatastore {
    pub store: Arc<MemoryStore>,
    pub client: Datastore,
}

impl TestDatastore {
    /// Create a client over an emulator with default settings
    pub fn new() -> Self {
        Self::build(EmulatorConfig::default(), ClientConfig::new(TEST_PROJECT))
    }

    /// Create a client over an emulator with custom settings
    pub fn with_config(config: EmulatorConfig) -> Self {
        Self::build(config, ClientConfig::new(TEST_PROJECT))
    }

    /// Create a client whose default namespace is `namespace`
    pub fn in_namespace(namespace: &str) -> Self {
        Self::build(
            EmulatorConfig::default(),
            ClientConfig::new(TEST_PROJECT).with_namespace(namespace),
        )
    }

    fn build(emulator: EmulatorConfig, client: ClientConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::with_config(emulator).expect("Invalid emulator config"));
        let client = Datastore::new(client, store.clone()).expect("Invalid client config");
        Self { store, client }
    }

    /// Number of requests the store received for `method`
    pub fn calls(&self, method: RpcMethod) -> usize {
        self.store.count(method)
    }
}

impl Default for TestDatastore {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport replaying queued responses and recording every request
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RpcResponse>>>,
    requests: Mutex<Vec<RpcRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next response
    pub fn respond(&self, response: RpcResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queue the next failure
    pub fn fail(&self, error: Error) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: RpcMethod) -> usize {
        self.requests.lock().iter().filter(|r| r.method() == method).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_rpc(&self, request: RpcRequest) -> Result<RpcResponse> {
        let method = request.method();
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport(format!("no scripted response for {}", method))))
    }
}

/// Client over a scripted transport
pub fn scripted_client() -> (Datastore, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new();
    let client = Datastore::new(ClientConfig::new(TEST_PROJECT), transport.clone())
        .expect("Invalid client config");
    (client, transport)
}

/// Mock entity generator for testing
pub struct EntityGenerator {
    kind: String,
    counter: i64,
}

impl EntityGenerator {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            counter: 0,
        }
    }

    /// Next entity with a complete numeric key
    pub fn next_entity(&mut self) -> Entity {
        self.counter += 1;
        let idx = self.counter;
        Entity::new(Key::new(self.kind.as_str(), idx), Self::data(idx))
    }

    /// Next entity whose id the store will allocate
    pub fn next_incomplete(&mut self) -> Entity {
        self.counter += 1;
        Entity::new(Key::incomplete(self.kind.as_str()), Self::data(self.counter))
    }

    pub fn batch(&mut self, count: usize) -> Vec<Entity> {
        (0..count).map(|_| self.next_entity()).collect()
    }

    fn data(idx: i64) -> EntityData {
        EntityData::new()
            .with("index", idx)
            .with("title", format!("item{}", idx))
            .with("even", idx % 2 == 0)
    }
}

/// Numeric ids of `entities` in order
pub fn ids(entities: &[Entity]) -> Vec<i64> {
    entities.iter().filter_map(|e| e.key.id()).collect()
}
