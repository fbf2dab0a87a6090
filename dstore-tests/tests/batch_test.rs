use dstore_client::{CompletionExt, DatastoreRequest};
use dstore_core::{Entity, EntityData, Error, Key, QueryOptions, ReadConsistency, RpcMethod, Write};
use dstore_emulator::EmulatorConfig;
use dstore_test_utils::{ids, EntityGenerator, TestDatastore};
use futures::StreamExt;
use tokio::sync::oneshot;

/// Test multi-get keeps input order and omits missing keys
#[tokio::test]
async fn test_get_many_omits_missing() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let mut gen = EntityGenerator::new("Task");
    let entities = gen.batch(3);
    test_ds
        .client
        .save(vec![entities[0].clone(), entities[2].clone()])
        .await?;

    let keys = vec![Key::new("Task", 3), Key::new("Task", 2), Key::new("Task", 1)];
    let found = test_ds.client.get_many(&keys).await?;
    assert_eq!(ids(&found), vec![3, 1]);
    assert_eq!(test_ds.calls(RpcMethod::Lookup), 1);

    assert_eq!(test_ds.client.get(&Key::new("Task", 2)).await?, None);
    Ok(())
}

/// Test deferred keys are fetched in follow-up lookups
#[tokio::test]
async fn test_deferred_lookup_rounds() -> anyhow::Result<()> {
    let test_ds = TestDatastore::with_config(EmulatorConfig::new().with_lookup_batch_limit(2));
    let mut gen = EntityGenerator::new("Task");
    let entities = gen.batch(5);
    test_ds.client.save(entities.clone()).await?;

    let keys: Vec<Key> = entities.iter().map(|e| e.key.clone()).collect();
    let found = test_ds.client.get_many(&keys).await?;
    assert_eq!(ids(&found), vec![1, 2, 3, 4, 5]);
    assert_eq!(test_ds.calls(RpcMethod::Lookup), 3);
    Ok(())
}

/// Test duplicate keys in one lookup resolve once
#[tokio::test]
async fn test_duplicate_keys_resolve_once() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let entity = EntityGenerator::new("Task").next_entity();
    test_ds.client.save(entity.clone()).await?;

    let found = test_ds
        .client
        .get_many(&[entity.key.clone(), entity.key.clone()])
        .await?;
    assert_eq!(found, vec![entity]);
    Ok(())
}

/// Test a save of many entities is a single commit with per-entity results
#[tokio::test]
async fn test_save_many_single_commit() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let mut gen = EntityGenerator::new("Task");
    let writes = vec![
        Write::from(gen.next_entity()),
        Write::from(gen.next_incomplete()),
        Write::from(gen.next_incomplete()),
    ];

    let result = test_ds.client.save(writes).await?;
    assert_eq!(result.len(), 3);
    assert!(result.is_success());
    assert_eq!(result.allocated_keys().len(), 2);
    assert!(result.allocated_keys().iter().all(|k| k.is_complete()));
    assert_eq!(test_ds.calls(RpcMethod::Commit), 1);
    assert_eq!(test_ds.store.len(), 3);
    Ok(())
}

/// Test delete of several keys
#[tokio::test]
async fn test_delete_many() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let entities = EntityGenerator::new("Task").batch(3);
    test_ds.client.save(entities.clone()).await?;

    let keys: Vec<Key> = entities[..2].iter().map(|e| e.key.clone()).collect();
    let result = test_ds.client.delete(keys).await?;
    assert!(result.is_success());
    assert_eq!(test_ds.store.len(), 1);
    Ok(())
}

/// Test allocated ids are complete, distinct and keep the ancestor path
#[tokio::test]
async fn test_allocate_ids() -> anyhow::Result<()> {
    let test_ds = TestDatastore::with_config(EmulatorConfig::new().with_first_allocated_id(500));
    let parent = Key::new("Company", 5);
    let incomplete = parent.incomplete_child("Employee")?;

    let keys = test_ds.client.allocate_ids(&incomplete, 3).await?;
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k.is_complete() && parent.is_ancestor_of(k)));
    let ids: Vec<_> = keys.iter().filter_map(|k| k.id()).collect();
    assert_eq!(ids, vec![500, 501, 502]);

    let err = test_ds.client.allocate_ids(&parent, 1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidKeyPath(_)));
    Ok(())
}

/// Test the read stream yields the same entities as a get
#[tokio::test]
async fn test_create_read_stream() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let entities = EntityGenerator::new("Task").batch(3);
    test_ds.client.save(entities.clone()).await?;

    let keys: Vec<Key> = entities.iter().map(|e| e.key.clone()).collect();
    let options = QueryOptions::new().with_consistency(ReadConsistency::Eventual);
    let streamed: Vec<Entity> = test_ds
        .client
        .create_read_stream(&keys, options)?
        .map(|r| r.expect("stream item"))
        .collect()
        .await;
    assert_eq!(streamed, entities);

    assert!(test_ds
        .client
        .create_read_stream(&[Key::incomplete("Task")], QueryOptions::default())
        .is_err());
    Ok(())
}

/// Test callbacks receive exactly what awaiting would produce
#[tokio::test]
async fn test_completion_callback() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let entity = Entity::new(Key::new("Task", "cb"), EntityData::new().with("done", false));
    test_ds.client.save(entity.clone()).await?;

    let (tx, rx) = oneshot::channel();
    test_ds
        .client
        .get(&entity.key)
        .on_complete(move |result| {
            let _ = tx.send(result);
        })
        .await?;
    assert_eq!(rx.await?, Ok(Some(entity)));

    let (tx, rx) = oneshot::channel();
    test_ds
        .client
        .get(&Key::incomplete("Task"))
        .on_complete(move |result| {
            let _ = tx.send(result);
        })
        .await?;
    assert!(matches!(rx.await?, Err(Error::InvalidKeyPath(_))));
    Ok(())
}
