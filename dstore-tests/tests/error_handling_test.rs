use dstore_client::{ClientConfig, Datastore, DatastoreRequest, MAX_ALLOCATE_IDS};
use dstore_core::rpc::{CommitResponse, LookupResponse, RollbackResponse};
use dstore_core::{Entity, EntityData, Error, Key, RpcMethod, RpcResponse};
use dstore_emulator::{EmulatorConfig, MemoryStore};
use dstore_test_utils::{scripted_client, EntityGenerator, TestDatastore};
use std::sync::Arc;

/// Test a duplicate insert fails on its own while its siblings apply
#[tokio::test]
async fn test_insert_conflict_is_per_mutation() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let mut gen = EntityGenerator::new("Task");
    let existing = gen.next_entity();
    let fresh = gen.next_entity();
    test_ds.client.save(existing.clone()).await?;

    let result = test_ds.client.insert(vec![existing, fresh.clone()]).await?;
    assert!(!result.is_success());
    let errors = result.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 0);
    assert_eq!(errors[0].1.code(), "MUTATION_CONFLICT");
    assert!(errors[0].1.to_string().contains("ALREADY_EXISTS"));
    assert!(result.mutation_results[1].is_ok());
    assert!(test_ds.store.stored(&fresh.key).is_some());

    assert!(result.into_result().is_err());
    Ok(())
}

/// Test updating a missing entity reports a conflict
#[tokio::test]
async fn test_update_missing_entity() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let entity = EntityGenerator::new("Task").next_entity();

    let result = test_ds.client.update(entity).await?;
    let err = result.into_result().unwrap_err();
    assert!(matches!(err, Error::MutationConflict(_)));
    assert!(err.to_string().contains("NOT_FOUND"));
    assert!(test_ds.store.is_empty());
    Ok(())
}

/// Test local validation errors carry stable codes and never hit the store
#[tokio::test]
async fn test_local_error_codes() {
    let test_ds = TestDatastore::new();

    let err = test_ds.client.get(&Key::incomplete("Task")).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_KEY_PATH");
    assert!(err.is_local());
    assert!(!err.is_retryable());

    let err = test_ds
        .client
        .update(Entity::new(Key::incomplete("Task"), EntityData::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_KEY_PATH");

    let err = test_ds.client.allocate_ids(&Key::new("Task", 1), 2).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_KEY_PATH");

    let err = test_ds
        .client
        .allocate_ids(&Key::incomplete("Task"), MAX_ALLOCATE_IDS + 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_VALUE");

    let err = test_ds.client.get(&Key::new("", 1)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_KEY_PATH");
    assert!(matches!(Key::try_new("", 1), Err(Error::InvalidKeyPath(_))));

    assert!(test_ds.store.requests().is_empty());
}

/// Test invalid configurations are rejected up front
#[test]
fn test_invalid_config() {
    let store = Arc::new(MemoryStore::new());
    let err = Datastore::new(ClientConfig::new("  "), store).unwrap_err();
    assert_eq!(err.code(), "INVALID_CONFIG");

    let err = MemoryStore::with_config(EmulatorConfig::new().with_page_size(0)).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

/// Test transport failures surface unchanged and the next call succeeds
#[tokio::test]
async fn test_transport_failure_is_retryable() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let entity = EntityGenerator::new("Task").next_entity();
    test_ds.client.save(entity.clone()).await?;

    test_ds
        .store
        .fail_next(RpcMethod::Lookup, Error::Transport("connection reset".to_string()));
    let err = test_ds.client.get(&entity.key).await.unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_ERROR");
    assert!(err.is_retryable());
    assert!(!err.is_local());

    assert_eq!(test_ds.client.get(&entity.key).await?, Some(entity));
    assert_eq!(test_ds.calls(RpcMethod::Lookup), 2);
    Ok(())
}

/// Test a response of the wrong kind is a transport error
#[tokio::test]
async fn test_mismatched_response() {
    let (client, transport) = scripted_client();
    transport.respond(RpcResponse::Rollback(RollbackResponse {}));

    let err = client.get(&Key::new("Task", 1)).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(transport.count(RpcMethod::Lookup), 1);
}

/// Test a commit answering with the wrong number of results is rejected
#[tokio::test]
async fn test_commit_result_count_mismatch() {
    let (client, transport) = scripted_client();
    transport.respond(RpcResponse::Commit(CommitResponse::default()));

    let entity = Entity::new(Key::new("Task", 1), EntityData::new().with("done", true));
    let err = client.save(entity).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

/// Test a lookup that only defers keys stops instead of looping
#[tokio::test]
async fn test_lookup_without_progress() {
    let (client, transport) = scripted_client();
    let key = Key::new("Task", 1);
    transport.respond(RpcResponse::Lookup(LookupResponse {
        deferred: vec![key.clone()],
        ..Default::default()
    }));

    let err = client.get(&key).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(transport.count(RpcMethod::Lookup), 1);
}

/// Test a failed begin leaves the transaction startable again
#[tokio::test]
async fn test_failed_begin_can_retry() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    test_ds
        .store
        .fail_next(RpcMethod::BeginTransaction, Error::Transport("unavailable".to_string()));

    let tx = test_ds.client.transaction();
    assert!(tx.run().await.unwrap_err().is_retryable());
    tx.run().await?;
    tx.commit().await?;
    assert_eq!(test_ds.calls(RpcMethod::BeginTransaction), 2);
    Ok(())
}
