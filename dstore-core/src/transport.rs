/// Transport seam
///
/// The client never talks to the network itself. Every store call goes
/// through a `Transport`, which owns endpoint selection, authentication,
/// timeouts and retries of transient failures.

use crate::error::Result;
use crate::rpc::{RpcRequest, RpcResponse};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one RPC and wait for its response.
    ///
    /// Implementations report failures as [`crate::Error::Transport`]; the
    /// response variant must match the request's method.
    async fn send_rpc(&self, request: RpcRequest) -> Result<RpcResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_rpc(&self, request: RpcRequest) -> Result<RpcResponse> {
        (**self).send_rpc(request).await
    }
}
