//! Loopback transport backed by a [`ServiceHost`].
//!
//! Request streams are pumped through a bounded channel on their own task, so
//! the two directions of a duplex call progress independently. Every failure
//! leaves the channel as a terminal status, the way a network transport would
//! report it.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use contractrpc_core::{
    BoxFuture, CallHead, CallTransport, CancellationToken, PayloadStream, RpcError, Status,
    StreamingResponse, UnaryResponse,
};

use crate::host::ServiceHost;

const DEFAULT_BUFFER: usize = 16;

/// An in-process [`CallTransport`].
///
/// ```rust,ignore
/// let channel = InMemoryChannel::new(host);
/// let client = ContractClient::builder(channel).build();
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryChannel {
    host: Arc<ServiceHost>,
    buffer: usize,
}

impl InMemoryChannel {
    pub fn new(host: ServiceHost) -> Self {
        Self::from_shared(Arc::new(host))
    }

    pub fn from_shared(host: Arc<ServiceHost>) -> Self {
        Self {
            host,
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Capacity of the request-stream channel. At least one.
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn host(&self) -> &Arc<ServiceHost> {
        &self.host
    }
}

/// Move request messages onto a task of their own so the caller's stream is
/// driven independently of the handler. Must be called from within a runtime.
fn pump(buffer: usize, messages: PayloadStream, token: CancellationToken) -> PayloadStream {
    let (tx, mut rx) = mpsc::channel(buffer);
    tokio::spawn(async move {
        let mut messages = messages;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => Some(Err(RpcError::Cancelled)),
                item = messages.next() => item,
            };
            let Some(item) = next else {
                break;
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });
    async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
    .boxed()
}

fn cancelled() -> RpcError {
    Status::cancelled("call cancelled").into()
}

/// Run `call` unless the token fires first.
async fn guarded<T, F>(token: &CancellationToken, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    if token.is_cancelled() {
        return Err(cancelled());
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(cancelled()),
        result = call => result.map_err(RpcError::into_status_error),
    }
}

/// Forward response messages until the stream ends, fails, or the token fires.
fn cancellable(messages: PayloadStream, token: CancellationToken) -> PayloadStream {
    async_stream::stream! {
        let mut messages = messages;
        loop {
            let (next, stop) = tokio::select! {
                biased;
                _ = token.cancelled() => (Some(Err(cancelled())), true),
                item = messages.next() => (item, false),
            };
            match next {
                Some(Ok(bytes)) => yield Ok(bytes),
                Some(Err(error)) => {
                    yield Err(error.into_status_error());
                    break;
                }
                None => break,
            }
            if stop {
                break;
            }
        }
    }
    .boxed()
}

impl CallTransport for InMemoryChannel {
    fn unary(
        &self,
        head: CallHead,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<UnaryResponse, RpcError>> {
        let host = self.host.clone();
        Box::pin(async move {
            let token = head.cancellation.clone();
            guarded(&token, host.handle_unary(head, payload)).await
        })
    }

    fn client_streaming(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> BoxFuture<'static, Result<UnaryResponse, RpcError>> {
        let host = self.host.clone();
        let buffer = self.buffer;
        Box::pin(async move {
            let token = head.cancellation.clone();
            let messages = pump(buffer, messages, token.clone());
            guarded(&token, host.handle_client_streaming(head, messages)).await
        })
    }

    fn server_streaming(
        &self,
        head: CallHead,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<StreamingResponse, RpcError>> {
        let host = self.host.clone();
        Box::pin(async move {
            let token = head.cancellation.clone();
            let response = guarded(&token, host.handle_server_streaming(head, payload)).await?;
            Ok(StreamingResponse {
                headers: response.headers,
                messages: cancellable(response.messages, token),
            })
        })
    }

    fn duplex(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> BoxFuture<'static, Result<StreamingResponse, RpcError>> {
        let host = self.host.clone();
        let buffer = self.buffer;
        Box::pin(async move {
            let token = head.cancellation.clone();
            let messages = pump(buffer, messages, token.clone());
            let response = guarded(&token, host.handle_duplex(head, messages)).await?;
            Ok(StreamingResponse {
                headers: response.headers,
                messages: cancellable(response.messages, token),
            })
        })
    }
}
