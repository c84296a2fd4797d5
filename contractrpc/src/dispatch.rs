//! Call dispatch.
//!
//! Decodes an incoming call into positional [`Arguments`], runs the route's
//! filter pipeline around the bound handler, and encodes the [`Returns`]
//! back into a response. Errors leaving a call, including errors inside a
//! response stream, pass through the host's fault interceptor.

use bytes::Bytes;
use futures::StreamExt;

use contractrpc_core::{
    Argument, Arguments, CallHead, CallKind, FilterContext, Metadata, OperationDescriptor,
    ParameterType, PayloadStream, REQUEST_HEADER_KEY, RESPONSE_HEADER_KEY, Returns, RpcError,
    ServerCallContext, Status, StreamingResponse, UnaryResponse,
};

use crate::handler::{AsyncHandlerTerminal, Handler, SyncHandlerTerminal};
use crate::host::{Route, ServiceHost};

/// A call that found its route.
struct Call<'h> {
    route: &'h Route,
    handler: &'h Handler,
    server: ServerCallContext,
}

impl ServiceHost {
    /// Handle a call with one request and one response message.
    pub async fn handle_unary(&self, head: CallHead, payload: Bytes) -> Result<UnaryResponse, RpcError> {
        let call = self.begin(&head, CallKind::Unary)?;
        let outcome = async {
            let returns = self.invoke(&call, &head, Some(payload), None).await?;
            self.unary_response(&call, &returns)
        }
        .await;
        outcome.map_err(|error| self.fault_interceptor.intercept(&call.server, error))
    }

    /// Handle a call with a streamed request and one response message.
    pub async fn handle_client_streaming(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> Result<UnaryResponse, RpcError> {
        let call = self.begin(&head, CallKind::ClientStreaming)?;
        let outcome = async {
            let returns = self.invoke(&call, &head, None, Some(messages)).await?;
            self.unary_response(&call, &returns)
        }
        .await;
        outcome.map_err(|error| self.fault_interceptor.intercept(&call.server, error))
    }

    /// Handle a call with one request message and a streamed response.
    pub async fn handle_server_streaming(
        &self,
        head: CallHead,
        payload: Bytes,
    ) -> Result<StreamingResponse, RpcError> {
        let call = self.begin(&head, CallKind::ServerStreaming)?;
        let outcome = async {
            let returns = self.invoke(&call, &head, Some(payload), None).await?;
            self.streaming_response(&call, returns)
        }
        .await;
        outcome.map_err(|error| self.fault_interceptor.intercept(&call.server, error))
    }

    /// Handle a call streamed in both directions.
    pub async fn handle_duplex(
        &self,
        head: CallHead,
        messages: PayloadStream,
    ) -> Result<StreamingResponse, RpcError> {
        let call = self.begin(&head, CallKind::Duplex)?;
        let outcome = async {
            let returns = self.invoke(&call, &head, None, Some(messages)).await?;
            self.streaming_response(&call, returns)
        }
        .await;
        outcome.map_err(|error| self.fault_interceptor.intercept(&call.server, error))
    }

    fn begin(&self, head: &CallHead, kind: CallKind) -> Result<Call<'_>, RpcError> {
        let Some(route) = self.routes.get(&head.path) else {
            return Err(Status::unimplemented(format!("unknown method {}", head.path)).into());
        };
        let Some(handler) = route.handler.as_ref() else {
            return Err(Status::unimplemented(format!("{} is not implemented", head.path)).into());
        };
        if route.operation.kind() != kind {
            return Err(Status::invalid_argument(format!(
                "{} is a {} operation, called as {}",
                head.path,
                route.operation.kind(),
                kind
            ))
            .into());
        }

        let mut metadata = head.metadata.clone();
        metadata.strip_reserved();
        let server = ServerCallContext::new(
            head.path.clone(),
            metadata,
            head.cancellation.clone(),
            head.deadline,
        );
        tracing::debug!(path = %head.path, %kind, "dispatching call");
        Ok(Call {
            route,
            handler,
            server,
        })
    }

    async fn invoke(
        &self,
        call: &Call<'_>,
        head: &CallHead,
        payload: Option<Bytes>,
        messages: Option<PayloadStream>,
    ) -> Result<Returns, RpcError> {
        let arguments = self.arguments(call, head, payload, messages)?;
        let operation = &call.route.operation;
        let pipeline = call.route.filters.resolve(operation);
        let mut ctx = FilterContext::new(
            operation.clone(),
            arguments,
            call.server.metadata().clone(),
        )
        .with_server_context(call.server.clone());

        match call.handler {
            Handler::Sync(handler) => pipeline.invoke(&mut ctx, &SyncHandlerTerminal(handler))?,
            Handler::Async(handler) => {
                pipeline
                    .invoke_async(&mut ctx, &AsyncHandlerTerminal(handler))
                    .await?
            }
        }
        Ok(ctx.into_returns())
    }

    // ========================================================================
    // Unmarshalling
    // ========================================================================

    fn arguments(
        &self,
        call: &Call<'_>,
        head: &CallHead,
        payload: Option<Bytes>,
        messages: Option<PayloadStream>,
    ) -> Result<Arguments, RpcError> {
        let operation = &call.route.operation;
        let mut arguments = Arguments::with_len(operation.parameter_count());

        if let Some(payload) = payload {
            let accessor = operation.request_body_accessor();
            let body = self.codec.decode(&payload, &accessor)?;
            for (slot, &index) in operation.request_body_indexes().iter().enumerate() {
                arguments.set(index, Argument::Value(accessor.get(&body, slot)?.clone()));
            }
        }

        if let Some(accessor) = operation.request_header_accessor() {
            let raw = head.metadata.get_bin(REQUEST_HEADER_KEY).ok_or_else(|| {
                RpcError::Protocol(format!(
                    "{} expects a request header envelope in {REQUEST_HEADER_KEY}",
                    operation.path()
                ))
            })??;
            let header = self.codec.decode(&raw, &accessor)?;
            for (slot, &index) in operation.request_header_indexes().iter().enumerate() {
                arguments.set(index, Argument::Value(accessor.get(&header, slot)?.clone()));
            }
        }

        if let (Some(index), Some(descriptor)) =
            (operation.request_stream_index(), operation.request_stream())
        {
            let stream = match messages {
                Some(messages) => self.codec.decode_stream(descriptor, messages),
                None => descriptor.create_empty(),
            };
            arguments.set(index, Argument::Stream(stream));
        }

        let parameters = operation.method().parameters();
        for &index in operation.context_indexes() {
            let argument = match parameters.get(index).map(|p| p.ty()) {
                Some(ParameterType::Cancellation) => {
                    Argument::Cancellation(call.server.cancellation().clone())
                }
                _ => Argument::Server(call.server.clone()),
            };
            arguments.set(index, argument);
        }

        Ok(arguments)
    }

    // ========================================================================
    // Marshalling
    // ========================================================================

    fn unary_response(&self, call: &Call<'_>, returns: &Returns) -> Result<UnaryResponse, RpcError> {
        let operation = &call.route.operation;
        let headers = self.response_headers(operation, returns)?;
        let accessor = operation.response_body_accessor();
        let mut body = accessor.create_new();
        for (slot, &index) in operation.response_body_indexes().iter().enumerate() {
            accessor.set(&mut body, slot, returns.value(index)?)?;
        }
        Ok(UnaryResponse {
            headers,
            payload: self.codec.encode(&body, &accessor)?,
            trailers: Metadata::new(),
        })
    }

    fn streaming_response(
        &self,
        call: &Call<'_>,
        mut returns: Returns,
    ) -> Result<StreamingResponse, RpcError> {
        let operation = &call.route.operation;
        let headers = self.response_headers(operation, &returns)?;
        let (Some(index), Some(descriptor)) =
            (operation.response_stream_index(), operation.response_stream())
        else {
            return Err(RpcError::Protocol(format!(
                "{} has no response stream",
                operation.path()
            )));
        };
        let values = returns.take_stream(index)?;
        descriptor.validate(&values)?;

        let interceptor = self.fault_interceptor.clone();
        let server = call.server.clone();
        let messages = self
            .codec
            .encode_stream(descriptor, values)
            .map(move |item| item.map_err(|error| interceptor.intercept(&server, error)))
            .boxed();
        Ok(StreamingResponse { headers, messages })
    }

    fn response_headers(
        &self,
        operation: &OperationDescriptor,
        returns: &Returns,
    ) -> Result<Metadata, RpcError> {
        let mut headers = Metadata::new();
        if let Some(accessor) = operation.response_header_accessor() {
            let mut envelope = accessor.create_new();
            for (slot, &index) in operation.response_header_indexes().iter().enumerate() {
                accessor.set(&mut envelope, slot, returns.value(index)?)?;
            }
            let encoded = self.codec.encode(&envelope, &accessor)?;
            headers.insert_bin(RESPONSE_HEADER_KEY, &encoded)?;
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use contractrpc_core::{
        CancellationToken, Code, Fault, InterfaceDescriptor, MethodDescriptor, MethodPath,
        ReturnItemDescriptor, ServiceContract, ValueStream,
    };
    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;
    use crate::fault::FnFaultHandler;
    use crate::handler::ServiceBinding;

    struct Calculator;

    impl ServiceContract for Calculator {
        fn describe() -> InterfaceDescriptor {
            InterfaceDescriptor::service("ICalculator")
                .namespace("demo")
                .method(
                    MethodDescriptor::operation("Add")
                        .param::<i32>("a")
                        .param::<i32>("b")
                        .returns::<i32>(),
                )
                .method(
                    MethodDescriptor::operation("Sum")
                        .param::<String>("label")
                        .stream_param::<i32>("values")
                        .returns::<String>(),
                )
                .method(
                    MethodDescriptor::operation("Range")
                        .param::<i32>("count")
                        .context("ctx")
                        .returns_tuple(vec![
                            ReturnItemDescriptor::value::<i32>().named("total"),
                            ReturnItemDescriptor::stream::<i32>().named("values"),
                        ]),
                )
                .method(
                    MethodDescriptor::operation("Fail")
                        .returns::<i32>(),
                )
        }
    }

    async fn add(args: Arguments) -> Result<Returns, RpcError> {
        let a: i32 = args.value_at(0)?;
        let b: i32 = args.value_at(1)?;
        Ok(Returns::single(a + b))
    }

    async fn sum(mut args: Arguments) -> Result<Returns, RpcError> {
        let label: String = args.value_at(0)?;
        let values: Vec<i32> = args.take_stream(1)?.into_typed::<i32>().try_collect().await?;
        Ok(Returns::single(format!("{label}={}", values.iter().sum::<i32>())))
    }

    async fn range(args: Arguments) -> Result<Returns, RpcError> {
        let count: i32 = args.value_at(0)?;
        assert!(args.server_context().is_some());
        Ok(Returns::unit()
            .with_value(count)
            .with_stream(ValueStream::from_iter(0..count)))
    }

    async fn fail(_args: Arguments) -> Result<Returns, RpcError> {
        Err(RpcError::application_message("no luck"))
    }

    fn host() -> ServiceHost {
        let binding = ServiceBinding::for_contract::<Calculator>()
            .unwrap()
            .on("Add", add)
            .on("Sum", sum)
            .on("Range", range)
            .on("Fail", fail);
        ServiceHost::builder()
            .fault_handler(FnFaultHandler::new(|_ctx: &ServerCallContext, error: &RpcError| {
                Some(Fault::new(Code::FailedPrecondition, error.to_string()))
            }))
            .service(binding)
            .unwrap()
            .build()
    }

    fn head(operation: &str, kind: CallKind) -> CallHead {
        CallHead {
            path: MethodPath::new("demo.Calculator", operation),
            kind,
            metadata: Metadata::new(),
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    fn payloads(values: Vec<serde_json::Value>) -> PayloadStream {
        futures::stream::iter(
            values
                .into_iter()
                .map(|v| Ok(Bytes::from(serde_json::to_vec(&v).unwrap()))),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_unary_envelopes() {
        let response = host()
            .handle_unary(head("Add", CallKind::Unary), Bytes::from_static(br#"{"Value1":2,"Value2":3}"#))
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(body, json!({"Value1": 5}));
        assert!(response.headers.is_empty());
    }

    #[tokio::test]
    async fn test_client_streaming_reads_header_envelope() {
        let mut head = head("Sum", CallKind::ClientStreaming);
        head.metadata
            .insert_bin(REQUEST_HEADER_KEY, br#"{"Value1":"total"}"#)
            .unwrap();
        let messages = payloads(vec![json!({"Value1": 1}), json!({"Value1": 2}), json!({"Value1": 4})]);
        let response = host().handle_client_streaming(head, messages).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(body, json!({"Value1": "total=7"}));
    }

    #[tokio::test]
    async fn test_missing_header_envelope() {
        let err = host()
            .handle_client_streaming(head("Sum", CallKind::ClientStreaming), payloads(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert!(err.to_string().contains(REQUEST_HEADER_KEY));
    }

    #[tokio::test]
    async fn test_server_streaming_headers_then_elements() {
        let response = host()
            .handle_server_streaming(head("Range", CallKind::ServerStreaming), Bytes::from_static(br#"{"Value1":3}"#))
            .await
            .unwrap();
        let header = response.headers.get_bin(RESPONSE_HEADER_KEY).unwrap().unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header).unwrap();
        assert_eq!(header, json!({"Value1": 3}));

        let elements: Vec<Bytes> = response.messages.try_collect().await.unwrap();
        let elements: Vec<serde_json::Value> = elements
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect();
        assert_eq!(
            elements,
            vec![json!({"Value1": 0}), json!({"Value1": 1}), json!({"Value1": 2})]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_mismatched_calls() {
        let host = host();
        let mut unknown = head("Missing", CallKind::Unary);
        unknown.path = MethodPath::new("demo.Calculator", "Missing");
        let err = host.handle_unary(unknown, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);

        let err = host
            .handle_unary(head("Range", CallKind::Unary), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unbound_operation_is_unimplemented() {
        let binding = ServiceBinding::for_contract::<Calculator>().unwrap().on("Add", add);
        let host = Arc::new(ServiceHost::builder().service(binding).unwrap().build());
        let err = host
            .handle_unary(head("Fail", CallKind::Unary), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_fault() {
        let err = host()
            .handle_unary(head("Fail", CallKind::Unary), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        let RpcError::Status { status, .. } = err else {
            panic!("expected status error");
        };
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(status.message(), Some("no luck"));
    }
}
