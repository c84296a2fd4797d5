//! Low-level call primitive.
//!
//! A [`CallTransport`] moves encoded payloads for one of the four call shapes.
//! It knows nothing about contracts or envelopes: requests and responses are
//! plain [`Bytes`], headers and trailers are [`Metadata`], and terminal
//! failures are [`RpcError::Status`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::contract::CallKind;
use crate::error::RpcError;
use crate::metadata::Metadata;

/// Boxed future type used by transports and async filters.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A stream of encoded messages. An `Err` item ends the stream with that error.
pub type PayloadStream = BoxStream<'static, Result<Bytes, RpcError>>;

/// Wire identity of an operation, written `/service/operation`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodPath {
    service: String,
    operation: String,
}

impl MethodPath {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Parse `/service/operation`. The leading slash is optional.
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (service, operation) = trimmed.rsplit_once('/')?;
        if service.is_empty() || operation.is_empty() {
            return None;
        }
        Some(Self::new(service, operation))
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.operation)
    }
}

/// Everything a transport needs to start a call besides the payload.
#[derive(Clone, Debug)]
pub struct CallHead {
    pub path: MethodPath,
    pub kind: CallKind,
    pub metadata: Metadata,
    pub cancellation: CancellationToken,
    pub deadline: Option<Instant>,
}

/// Response to a call with a single response message.
#[derive(Clone, Debug, Default)]
pub struct UnaryResponse {
    pub headers: Metadata,
    pub payload: Bytes,
    pub trailers: Metadata,
}

/// Response to a call with a streamed response.
///
/// Headers are available as soon as the call resolves, before any message.
pub struct StreamingResponse {
    pub headers: Metadata,
    pub messages: PayloadStream,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Transport primitive for the four call shapes.
pub trait CallTransport: Send + Sync + 'static {
    fn unary(&self, head: CallHead, payload: Bytes)
    -> BoxFuture<'static, Result<UnaryResponse, RpcError>>;

    fn client_streaming(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> BoxFuture<'static, Result<UnaryResponse, RpcError>>;

    fn server_streaming(
        &self,
        head: CallHead,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<StreamingResponse, RpcError>>;

    fn duplex(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> BoxFuture<'static, Result<StreamingResponse, RpcError>>;
}

impl<T: CallTransport + ?Sized> CallTransport for Arc<T> {
    fn unary(
        &self,
        head: CallHead,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<UnaryResponse, RpcError>> {
        (**self).unary(head, payload)
    }

    fn client_streaming(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> BoxFuture<'static, Result<UnaryResponse, RpcError>> {
        (**self).client_streaming(head, messages)
    }

    fn server_streaming(
        &self,
        head: CallHead,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<StreamingResponse, RpcError>> {
        (**self).server_streaming(head, payload)
    }

    fn duplex(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> BoxFuture<'static, Result<StreamingResponse, RpcError>> {
        (**self).duplex(head, messages)
    }
}
