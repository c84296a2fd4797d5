//! The generic call invoker.
//!
//! [`CallInvoker`] is the innermost step of the client filter pipeline. It
//! packs the positional arguments into envelopes per the operation
//! descriptor, calls the matching [`CallTransport`] method, and unpacks the
//! response into positional [`Returns`].
//!
//! | Kind            | Request                         | Response                        |
//! |-----------------|---------------------------------|---------------------------------|
//! | Unary           | body envelope                   | body envelope                   |
//! | ClientStreaming | header envelope + element stream| body envelope                   |
//! | ServerStreaming | body envelope                   | header envelope + element stream|
//! | Duplex          | header envelope + element stream| header envelope + element stream|
//!
//! Header envelopes travel in metadata ([`REQUEST_HEADER_KEY`],
//! [`RESPONSE_HEADER_KEY`]). Streams are lazy in both directions.
//!
//! [`CallTransport`]: contractrpc_core::CallTransport

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::time::Instant;

use contractrpc_core::{
    AsyncTerminal, BoxFuture, CallHead, CallKind, CancellationToken, FilterContext,
    Metadata, OperationDescriptor, PayloadStream, REQUEST_HEADER_KEY, RESPONSE_HEADER_KEY,
    ReturnValue, Returns, RpcError, Status, StreamingResponse, UnaryResponse, ValueStream,
};

use crate::client::ClientInner;
use crate::streaming::Cancellable;

/// Cancellation and deadline of one call.
#[derive(Clone, Debug)]
pub(crate) struct CallScope {
    /// The caller's token. Fault reconstruction checks this one.
    pub(crate) cancellation: CancellationToken,
    /// Child of the caller's token handed to the transport. Also fired when
    /// the deadline passes.
    pub(crate) token: CancellationToken,
    pub(crate) deadline: Option<Instant>,
}

impl CallScope {
    pub(crate) fn new(cancellation: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token: cancellation.child_token(),
            cancellation,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }
}

fn deadline_exceeded() -> RpcError {
    Status::deadline_exceeded("deadline exceeded").into()
}

pub(crate) struct CallInvoker<'c> {
    client: &'c ClientInner,
    scope: CallScope,
}

impl<'c> CallInvoker<'c> {
    pub(crate) fn new(client: &'c ClientInner, scope: CallScope) -> Self {
        Self { client, scope }
    }

    async fn execute(&self, ctx: &mut FilterContext) -> Result<Returns, RpcError> {
        let operation = ctx.operation().clone();
        let head = CallHead {
            path: operation.path(),
            kind: operation.kind(),
            metadata: self.request_metadata(&operation, ctx)?,
            cancellation: self.scope.token.clone(),
            deadline: self.scope.deadline.map(Instant::into_std),
        };
        tracing::debug!(path = %head.path, kind = %head.kind, "sending call");

        let transport = &self.client.transport;
        match operation.kind() {
            CallKind::Unary => {
                let payload = self.request_body(&operation, ctx)?;
                let response = self.guard(transport.unary(head, payload)).await?;
                self.unary_returns(&operation, response)
            }
            CallKind::ClientStreaming => {
                let messages = self.request_stream(&operation, ctx)?;
                let response = self.guard(transport.client_streaming(head, messages)).await?;
                self.unary_returns(&operation, response)
            }
            CallKind::ServerStreaming => {
                let payload = self.request_body(&operation, ctx)?;
                let response = self.guard(transport.server_streaming(head, payload)).await?;
                self.streaming_returns(&operation, response)
            }
            CallKind::Duplex => {
                let messages = self.request_stream(&operation, ctx)?;
                let response = self.guard(transport.duplex(head, messages)).await?;
                self.streaming_returns(&operation, response)
            }
        }
    }

    /// Await the transport unless the call is cancelled or times out first.
    async fn guard<T>(&self, call: BoxFuture<'static, Result<T, RpcError>>) -> Result<T, RpcError> {
        let token = &self.scope.token;
        let call = async {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(RpcError::Cancelled),
                result = call => result,
            }
        };
        match self.scope.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    Err(deadline_exceeded())
                }
            },
            None => call.await,
        }
    }

    // ========================================================================
    // Request
    // ========================================================================

    fn request_metadata(
        &self,
        operation: &OperationDescriptor,
        ctx: &FilterContext,
    ) -> Result<Metadata, RpcError> {
        let mut metadata = ctx.metadata().clone();
        metadata.strip_reserved();
        if let Some(accessor) = operation.request_header_accessor() {
            let arguments = ctx.request().arguments();
            let mut header = accessor.create_new();
            for (slot, &index) in operation.request_header_indexes().iter().enumerate() {
                accessor.set(&mut header, slot, arguments.value(index)?)?;
            }
            let encoded = self.client.codec.encode(&header, &accessor)?;
            metadata.insert_bin(REQUEST_HEADER_KEY, &encoded)?;
        }
        Ok(metadata)
    }

    fn request_body(&self, operation: &OperationDescriptor, ctx: &FilterContext) -> Result<Bytes, RpcError> {
        let arguments = ctx.request().arguments();
        let accessor = operation.request_body_accessor();
        let mut body = accessor.create_new();
        for (slot, &index) in operation.request_body_indexes().iter().enumerate() {
            accessor.set(&mut body, slot, arguments.value(index)?)?;
        }
        self.client.codec.encode(&body, &accessor)
    }

    fn request_stream(
        &self,
        operation: &OperationDescriptor,
        ctx: &mut FilterContext,
    ) -> Result<PayloadStream, RpcError> {
        let (Some(index), Some(descriptor)) =
            (operation.request_stream_index(), operation.request_stream())
        else {
            return Err(RpcError::Protocol(format!(
                "{} has no request stream",
                operation.path()
            )));
        };
        let values = ctx.request_mut().arguments_mut().take_stream(index)?;
        descriptor.validate(&values)?;
        let encoded = self.client.codec.encode_stream(descriptor, values);
        Ok(Cancellable::new(encoded, self.scope.token.clone(), self.scope.deadline).boxed())
    }

    // ========================================================================
    // Response
    // ========================================================================

    fn unary_returns(
        &self,
        operation: &OperationDescriptor,
        response: UnaryResponse,
    ) -> Result<Returns, RpcError> {
        let mut returns = Returns::with_len(operation.response_arity());
        self.read_response_headers(operation, &response.headers, &mut returns)?;
        let accessor = operation.response_body_accessor();
        let body = self.client.codec.decode(&response.payload, &accessor)?;
        for (slot, &index) in operation.response_body_indexes().iter().enumerate() {
            returns.set(index, ReturnValue::Value(accessor.get(&body, slot)?.clone()));
        }
        Ok(returns)
    }

    fn streaming_returns(
        &self,
        operation: &Arc<OperationDescriptor>,
        response: StreamingResponse,
    ) -> Result<Returns, RpcError> {
        let mut returns = Returns::with_len(operation.response_arity());
        self.read_response_headers(operation, &response.headers, &mut returns)?;
        let (Some(index), Some(descriptor)) =
            (operation.response_stream_index(), operation.response_stream())
        else {
            return Err(RpcError::Protocol(format!(
                "{} has no response stream",
                operation.path()
            )));
        };

        let messages = Cancellable::new(
            response.messages,
            self.scope.token.clone(),
            self.scope.deadline,
        )
        .boxed();
        let decoded = self.client.codec.decode_stream(descriptor, messages);

        let faults = self.client.faults.clone();
        let cancellation = self.scope.cancellation.clone();
        let op = operation.clone();
        let values = ValueStream::from_values(
            descriptor.element_type().clone(),
            decoded.map(move |item| item.map_err(|error| faults.intercept(&op, &cancellation, error))),
        );
        returns.set(index, ReturnValue::Stream(values));
        Ok(returns)
    }

    fn read_response_headers(
        &self,
        operation: &OperationDescriptor,
        headers: &Metadata,
        returns: &mut Returns,
    ) -> Result<(), RpcError> {
        let Some(accessor) = operation.response_header_accessor() else {
            return Ok(());
        };
        let raw = headers.get_bin(RESPONSE_HEADER_KEY).ok_or_else(|| {
            RpcError::Protocol(format!(
                "{} expects a response header envelope in {RESPONSE_HEADER_KEY}",
                operation.path()
            ))
        })??;
        let header = self.client.codec.decode(&raw, &accessor)?;
        for (slot, &index) in operation.response_header_indexes().iter().enumerate() {
            returns.set(index, ReturnValue::Value(accessor.get(&header, slot)?.clone()));
        }
        Ok(())
    }
}

impl AsyncTerminal for CallInvoker<'_> {
    fn call<'a>(&'a self, ctx: &'a mut FilterContext) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            let operation = ctx.operation().clone();
            match self.execute(ctx).await {
                Ok(returns) => {
                    ctx.response_mut().set_returns(returns);
                    Ok(())
                }
                Err(error) => Err(self.client.faults.intercept(
                    &operation,
                    &self.scope.cancellation,
                    error,
                )),
            }
        })
    }
}
