use dstore_client::DatastoreRequest;
use dstore_core::{
    Direction, Entity, EntityData, Error, FilterOperator, Key, MoreResults, QueryOptions,
    RpcMethod, Value,
};
use dstore_emulator::EmulatorConfig;
use dstore_test_utils::{ids, EntityGenerator, TestDatastore};
use futures::StreamExt;

async fn seeded(page_size: usize, count: usize) -> anyhow::Result<TestDatastore> {
    let test_ds = TestDatastore::with_config(EmulatorConfig::new().with_page_size(page_size));
    let entities = EntityGenerator::new("Task").batch(count);
    test_ds.client.save(entities).await?;
    test_ds.store.clear_log();
    Ok(test_ds)
}

/// Test filters and orders are applied by the store
#[tokio::test]
async fn test_filter_and_order() -> anyhow::Result<()> {
    let test_ds = seeded(300, 5).await?;
    let query = test_ds
        .client
        .create_query("Task")
        .filter("index", FilterOperator::GreaterThanOrEqual, 2)
        .order("index", Direction::Descending);

    let (entities, info) = test_ds.client.run_query(&query).await?;
    assert_eq!(ids(&entities), vec![5, 4, 3, 2]);
    assert_eq!(info.more_results, MoreResults::NoMoreResults);

    let evens = test_ds.client.create_query("Task").filter_eq("even", true);
    let (entities, _) = test_ds.client.run_query(&evens).await?;
    assert_eq!(ids(&entities), vec![2, 4]);
    Ok(())
}

/// Test one run stays within its call budget
#[tokio::test]
async fn test_call_budget_follows_cursors() -> anyhow::Result<()> {
    let test_ds = seeded(2, 4).await?;
    let query = test_ds.client.create_query("Task");

    let options = QueryOptions::default().with_max_api_calls(5);
    let (entities, info) = test_ds.client.run_query_with_options(&query, options).await?;
    assert_eq!(ids(&entities), vec![1, 2, 3, 4]);
    assert_eq!(info.more_results, MoreResults::NoMoreResults);
    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 2);

    test_ds.store.clear_log();
    let (entities, info) = test_ds.client.run_query(&query).await?;
    assert_eq!(ids(&entities), vec![1, 2]);
    assert_eq!(info.more_results, MoreResults::MoreResultsAfterCursor);
    assert!(info.end_cursor.is_some());
    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 1);
    Ok(())
}

/// Test the end cursor resumes where the previous run stopped
#[tokio::test]
async fn test_cursor_resume() -> anyhow::Result<()> {
    let test_ds = seeded(2, 5).await?;
    let query = test_ds.client.create_query("Task");

    let (first, info) = test_ds.client.run_query(&query).await?;
    let cursor = info.end_cursor.expect("end cursor");
    let (second, _) = test_ds.client.run_query(&query.start(cursor)).await?;
    assert_eq!(ids(&first), vec![1, 2]);
    assert_eq!(ids(&second), vec![3, 4]);
    Ok(())
}

/// Test the limit holds across several pages
#[tokio::test]
async fn test_limit_across_pages() -> anyhow::Result<()> {
    let test_ds = seeded(2, 5).await?;
    let query = test_ds.client.create_query("Task").limit(3);

    let options = QueryOptions::new().with_max_api_calls(10);
    let (entities, info) = test_ds.client.run_query_with_options(&query, options).await?;
    assert_eq!(ids(&entities), vec![1, 2, 3]);
    assert_eq!(info.more_results, MoreResults::MoreResultsAfterLimit);
    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 2);
    Ok(())
}

/// Test pages are only fetched as the consumer asks for entities
#[tokio::test]
async fn test_stream_is_lazy() -> anyhow::Result<()> {
    let test_ds = seeded(2, 6).await?;
    let query = test_ds.client.create_query("Task");
    let mut stream = test_ds
        .client
        .run_query_stream(&query, QueryOptions::new().with_max_api_calls(10))?;

    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 0);
    let first = stream.next().await.expect("first entity")?;
    assert_eq!(first.key.id(), Some(1));
    stream.next().await.expect("second entity")?;
    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 1);

    stream.next().await.expect("third entity")?;
    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 2);
    assert_eq!(stream.pages_fetched(), 2);

    drop(stream);
    assert_eq!(test_ds.calls(RpcMethod::RunQuery), 2);
    Ok(())
}

/// Test ancestor queries include only descendants of the ancestor
#[tokio::test]
async fn test_ancestor_query() -> anyhow::Result<()> {
    let test_ds = TestDatastore::new();
    let acme = Key::new("Company", 1);
    let other = Key::new("Company", 2);
    let employees = vec![
        Entity::new(acme.child("Employee", "ada")?, EntityData::new().with("level", 3)),
        Entity::new(acme.child("Employee", "bob")?, EntityData::new().with("level", 1)),
        Entity::new(other.child("Employee", "cy")?, EntityData::new().with("level", 2)),
    ];
    test_ds.client.save(employees).await?;

    let query = test_ds
        .client
        .create_query("Employee")
        .has_ancestor(acme.clone())
        .order("level", Direction::Ascending);
    let (entities, _) = test_ds.client.run_query(&query).await?;
    let names: Vec<_> = entities.iter().filter_map(|e| e.key.name()).collect();
    assert_eq!(names, vec!["bob", "ada"]);
    assert!(entities.iter().all(|e| acme.is_ancestor_of(&e.key)));
    Ok(())
}

/// Test queries only see their own namespace
#[tokio::test]
async fn test_namespace_scoping() -> anyhow::Result<()> {
    let test_ds = TestDatastore::in_namespace("tenant-a");
    let key = test_ds.client.key(dstore_core::path!["Task", 1])?;
    test_ds
        .client
        .save(Entity::new(key, EntityData::new().with("done", false)))
        .await?;

    let (own, _) = test_ds.client.run_query(&test_ds.client.create_query("Task")).await?;
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].key.namespace(), Some("tenant-a"));

    let (other, _) = test_ds
        .client
        .run_query(&test_ds.client.create_query_in("tenant-b", "Task"))
        .await?;
    assert!(other.is_empty());
    Ok(())
}

/// Test filtering on the key pseudo-property
#[tokio::test]
async fn test_key_filter() -> anyhow::Result<()> {
    let test_ds = seeded(300, 5).await?;
    let query = test_ds
        .client
        .create_query("Task")
        .filter_key(FilterOperator::GreaterThan, Key::new("Task", 2));
    let (entities, _) = test_ds.client.run_query(&query).await?;
    assert_eq!(ids(&entities), vec![3, 4, 5]);
    Ok(())
}

/// Test projections return only the selected properties
#[tokio::test]
async fn test_projection_and_keys_only() -> anyhow::Result<()> {
    let test_ds = seeded(300, 3).await?;

    let titles = test_ds.client.create_query("Task").select(["title"]);
    let (entities, _) = test_ds.client.run_query(&titles).await?;
    assert_eq!(entities.len(), 3);
    assert!(entities.iter().all(|e| e.data.len() == 1));
    assert_eq!(entities[0].get("title"), Some(&Value::from("item1")));

    let keys_only = test_ds.client.create_query("Task").select(["__key__"]);
    let (entities, _) = test_ds.client.run_query(&keys_only).await?;
    assert_eq!(ids(&entities), vec![1, 2, 3]);
    assert!(entities.iter().all(|e| e.data.is_empty()));
    Ok(())
}

/// Test distinct groups and offsets
#[tokio::test]
async fn test_group_by_and_offset() -> anyhow::Result<()> {
    let test_ds = seeded(300, 6).await?;

    let grouped = test_ds
        .client
        .create_query("Task")
        .group_by(["even"])
        .order("even", Direction::Ascending);
    let (entities, _) = test_ds.client.run_query(&grouped).await?;
    assert_eq!(ids(&entities), vec![1, 2]);

    let skipped = test_ds.client.create_query("Task").offset(4);
    let (entities, _) = test_ds.client.run_query(&skipped).await?;
    assert_eq!(ids(&entities), vec![5, 6]);
    Ok(())
}

/// Test malformed queries fail before any request is made
#[tokio::test]
async fn test_invalid_query_rejected_locally() {
    let test_ds = TestDatastore::new();
    let query = test_ds
        .client
        .create_query("Task")
        .filter_eq("tags", vec![Value::from("a")]);

    let err = test_ds.client.run_query(&query).await.unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
    assert!(test_ds.client.run_query_stream(&query, QueryOptions::default()).is_err());

    assert!(test_ds.client.create_query("Task").filter_str("done", "!=", true).is_err());
    assert!(test_ds.store.requests().is_empty());
}

/// Test the builder never mutates the query it was called on
#[test]
fn test_queries_are_immutable() {
    let test_ds = TestDatastore::new();
    let base = test_ds.client.create_query("Task");
    let limited = base.limit(10).order("index", Direction::Descending);

    assert_eq!(base.spec().limit, None);
    assert!(base.spec().orders.is_empty());
    assert_eq!(limited.spec().limit, Some(10));
    assert_ne!(base, limited);
}
