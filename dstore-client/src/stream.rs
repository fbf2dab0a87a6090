/// Lazy result streams
///
/// `QueryStream` fetches one page at a time and only asks for the next page
/// once every entity of the current page has been consumed, so a slow
/// consumer pauses pagination. Dropping the stream drops the in-flight page
/// request and no further pages are fetched.

use crate::batch::RequestBatcher;
use dstore_core::codec::decode_entity;
use dstore_core::query::WireQuery;
use dstore_core::rpc::{QueryResultBatch, ReadOptions};
use dstore_core::{Cursor, Entity, MoreResults, QueryInfo, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Stream of entities produced by `create_read_stream`
pub type EntityStream = BoxStream<'static, Result<Entity>>;

/// Turn a pending lookup into a stream of its entities
pub(crate) fn entity_stream<F>(lookup: F) -> EntityStream
where
    F: std::future::Future<Output = Result<Vec<Entity>>> + Send + 'static,
{
    stream::once(lookup)
        .flat_map(|res| {
            let items: Vec<Result<Entity>> = match res {
                Ok(entities) => entities.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        })
        .boxed()
}

/// Entities of a query run, following end cursors within a call budget
pub struct QueryStream {
    batcher: RequestBatcher,
    namespace: Option<String>,
    /// Query for the next page; cursor, limit and offset advance per page
    query: WireQuery,
    read_options: ReadOptions,
    /// RunQuery calls still allowed
    calls_left: u32,
    remaining_limit: Option<u32>,
    buffer: VecDeque<Entity>,
    in_flight: Option<BoxFuture<'static, Result<QueryResultBatch>>>,
    info: Option<QueryInfo>,
    pages: u32,
    done: bool,
}

impl QueryStream {
    pub(crate) fn new(
        batcher: RequestBatcher,
        namespace: Option<String>,
        query: WireQuery,
        read_options: ReadOptions,
        call_budget: u32,
    ) -> Self {
        Self {
            batcher,
            namespace,
            remaining_limit: query.limit,
            query,
            read_options,
            calls_left: call_budget.max(1),
            buffer: VecDeque::new(),
            in_flight: None,
            info: None,
            pages: 0,
            done: false,
        }
    }

    /// Position after the last fetched page; `None` until a page arrived
    pub fn info(&self) -> Option<&QueryInfo> {
        self.info.as_ref()
    }

    /// Number of RunQuery calls made so far
    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    /// Drain the stream into one aggregated result
    pub async fn collect_all(mut self) -> Result<(Vec<Entity>, QueryInfo)> {
        let mut entities = Vec::new();
        while let Some(item) = self.next().await {
            entities.push(item?);
        }
        let info = self.info.take().unwrap_or(QueryInfo {
            end_cursor: None,
            more_results: MoreResults::NoMoreResults,
        });
        Ok((entities, info))
    }

    fn start_fetch(&mut self) {
        self.calls_left -= 1;
        let batcher = self.batcher.clone();
        let namespace = self.namespace.clone();
        let query = self.query.clone();
        let read_options = self.read_options.clone();
        self.in_flight = Some(Box::pin(async move {
            batcher.run_query_page(namespace, query, read_options).await
        }));
    }

    /// Buffer a page and decide whether another one should be requested
    fn accept_page(&mut self, batch: QueryResultBatch) -> Result<()> {
        self.pages += 1;
        let entities = batch
            .entity_results
            .iter()
            .map(|r| decode_entity(&r.entity))
            .collect::<Result<Vec<_>>>()?;

        let returned = entities.len() as u32;
        self.buffer.extend(entities);
        self.query.offset = self.query.offset.saturating_sub(batch.skipped_results);
        if let Some(limit) = self.remaining_limit.as_mut() {
            *limit = limit.saturating_sub(returned);
        }

        let end_cursor: Option<Cursor> = batch
            .end_cursor
            .or_else(|| self.info.as_ref().and_then(|i| i.end_cursor.clone()));
        self.info = Some(QueryInfo {
            end_cursor: end_cursor.clone(),
            more_results: batch.more_results,
        });

        let follow = batch.more_results.has_more()
            && self.calls_left > 0
            && self.remaining_limit != Some(0)
            && end_cursor.is_some();

        if follow {
            debug!(
                page = self.pages,
                calls_left = self.calls_left,
                more_results = batch.more_results.as_str(),
                "following query cursor"
            );
            self.query.start_cursor = end_cursor;
            self.query.limit = self.remaining_limit;
        } else {
            self.done = true;
        }
        Ok(())
    }
}

impl Stream for QueryStream {
    type Item = Result<Entity>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(entity) = this.buffer.pop_front() {
                return Poll::Ready(Some(Ok(entity)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            if this.in_flight.is_none() {
                this.start_fetch();
            }

            let Some(fetch) = this.in_flight.as_mut() else {
                continue;
            };
            match fetch.poll_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => {
                    this.in_flight = None;
                    let accepted = result.and_then(|batch| this.accept_page(batch));
                    if let Err(e) = accepted {
                        this.done = true;
                        this.buffer.clear();
                        return Poll::Ready(Some(Err(e)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dstore_core::codec::WireEntity;
    use dstore_core::rpc::{EntityResult, ResultType, RunQueryResponse};
    use dstore_core::{Error, Key, RpcRequest, RpcResponse, Transport};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Pages {
        pages: Mutex<VecDeque<QueryResultBatch>>,
        requests: Mutex<Vec<WireQuery>>,
    }

    #[async_trait]
    impl Transport for Pages {
        async fn send_rpc(&self, request: RpcRequest) -> Result<RpcResponse> {
            match request {
                RpcRequest::RunQuery(r) => {
                    self.requests.lock().push(r.query);
                    self.pages
                        .lock()
                        .pop_front()
                        .map(|batch| RpcResponse::RunQuery(RunQueryResponse { batch }))
                        .ok_or_else(|| Error::Transport("no more pages".into()))
                }
                other => Err(Error::Transport(format!("unexpected {:?}", other.method()))),
            }
        }
    }

    fn page(ids: &[i64], cursor: &str, more: MoreResults) -> QueryResultBatch {
        QueryResultBatch {
            entity_result_type: ResultType::Full,
            entity_results: ids
                .iter()
                .map(|id| EntityResult {
                    entity: WireEntity {
                        key: Some(Key::new("Task", *id)),
                        properties: Default::default(),
                    },
                    version: 1,
                    cursor: None,
                })
                .collect(),
            end_cursor: Some(Cursor::from(cursor)),
            more_results: more,
            skipped_results: 0,
        }
    }

    fn stream_over(pages: Vec<QueryResultBatch>, limit: Option<u32>, budget: u32) -> (QueryStream, Arc<Pages>) {
        let transport = Arc::new(Pages {
            pages: Mutex::new(pages.into()),
            requests: Mutex::new(Vec::new()),
        });
        let batcher = RequestBatcher::new(transport.clone(), "demo");
        let query = WireQuery {
            limit,
            ..Default::default()
        };
        (
            QueryStream::new(batcher, None, query, ReadOptions::default(), budget),
            transport,
        )
    }

    #[tokio::test]
    async fn test_follows_cursor_until_no_more_results() {
        let (stream, transport) = stream_over(
            vec![
                page(&[1, 2], "c1", MoreResults::MoreResultsAfterCursor),
                page(&[3], "c2", MoreResults::NoMoreResults),
            ],
            None,
            5,
        );
        let (entities, info) = stream.collect_all().await.unwrap();
        let ids: Vec<_> = entities.iter().filter_map(|e| e.key.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(info.more_results, MoreResults::NoMoreResults);
        assert_eq!(info.end_cursor, Some(Cursor::from("c2")));

        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].start_cursor, Some(Cursor::from("c1")));
    }

    #[tokio::test]
    async fn test_single_call_without_budget() {
        let (stream, transport) = stream_over(
            vec![page(&[1], "c1", MoreResults::MoreResultsAfterCursor)],
            None,
            1,
        );
        let (entities, info) = stream.collect_all().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(info.more_results, MoreResults::MoreResultsAfterCursor);
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_limit_reached() {
        let (stream, transport) = stream_over(
            vec![
                page(&[1, 2], "c1", MoreResults::MoreResultsAfterLimit),
                page(&[3], "c2", MoreResults::NoMoreResults),
            ],
            Some(2),
            5,
        );
        let (entities, _) = stream.collect_all().await.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_remaining_limit_sent_with_follow_up() {
        let (stream, transport) = stream_over(
            vec![
                page(&[1, 2], "c1", MoreResults::MoreResultsAfterCursor),
                page(&[3], "c2", MoreResults::MoreResultsAfterLimit),
            ],
            Some(3),
            5,
        );
        let (entities, _) = stream.collect_all().await.unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(transport.requests.lock()[1].limit, Some(1));
    }

    #[tokio::test]
    async fn test_next_page_is_fetched_lazily() {
        let (mut stream, transport) = stream_over(
            vec![
                page(&[1, 2], "c1", MoreResults::MoreResultsAfterCursor),
                page(&[3], "c2", MoreResults::NoMoreResults),
            ],
            None,
            5,
        );
        assert_eq!(transport.requests.lock().len(), 0);
        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();
        assert_eq!(transport.requests.lock().len(), 1);
        drop(stream);
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_page_error_ends_stream() {
        let (mut stream, _) = stream_over(
            vec![page(&[1], "c1", MoreResults::MoreResultsAfterCursor)],
            None,
            3,
        );
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(stream.next().await, Some(Err(Error::Transport(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_entity_stream_yields_lookup_results() {
        let lookup = async { Ok(vec![Entity::new(Key::new("Task", 1), Default::default())]) };
        let items: Vec<_> = entity_stream(lookup).collect().await;
        assert_eq!(items.len(), 1);

        let failing = async { Err::<Vec<Entity>, _>(Error::Transport("down".into())) };
        let items: Vec<_> = entity_stream(failing).collect().await;
        assert!(matches!(items.as_slice(), [Err(Error::Transport(_))]));
    }
}
