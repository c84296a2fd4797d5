//! Payload codec trait and the default JSON implementation.
//!
//! A [`PayloadCodec`] turns envelopes into bytes and back. Envelopes are
//! always encoded through the [`MessageAccessor`] of their shape, so a codec
//! can key slots by name. Standalone values (fault details) go through
//! [`PayloadCodec::encode_value`].

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;

use crate::error::RpcError;
use crate::message::{Message, MessageAccessor, Value};
use crate::stream::{StreamDescriptor, ValueStream};
use crate::transport::PayloadStream;

/// Codec trait for envelope payloads.
///
/// # Example
///
/// ```ignore
/// use contractrpc_core::{PayloadCodec, Message, MessageAccessor, RpcError, Value};
/// use bytes::Bytes;
///
/// struct CborCodec;
///
/// impl PayloadCodec for CborCodec {
///     fn name(&self) -> &'static str { "cbor" }
///     // ...
/// }
/// ```
pub trait PayloadCodec: Send + Sync + 'static {
    /// Codec name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Encode an envelope.
    fn encode(&self, message: &Message, accessor: &MessageAccessor) -> Result<Bytes, RpcError>;

    /// Decode an envelope of the accessor's shape.
    fn decode(&self, data: &[u8], accessor: &MessageAccessor) -> Result<Message, RpcError>;

    /// Encode a single value.
    fn encode_value(&self, value: &Value) -> Result<Bytes, RpcError>;

    /// Decode a single value.
    fn decode_value(&self, data: &[u8]) -> Result<Value, RpcError>;
}

/// A boxed codec for type-erased storage.
#[derive(Clone)]
pub struct BoxedCodec(Arc<dyn PayloadCodec>);

impl BoxedCodec {
    /// Create a new boxed codec.
    pub fn new<C: PayloadCodec>(codec: C) -> Self {
        BoxedCodec(Arc::new(codec))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn encode(&self, message: &Message, accessor: &MessageAccessor) -> Result<Bytes, RpcError> {
        self.0.encode(message, accessor)
    }

    pub fn decode(&self, data: &[u8], accessor: &MessageAccessor) -> Result<Message, RpcError> {
        self.0.decode(data, accessor)
    }

    pub fn encode_value(&self, value: &Value) -> Result<Bytes, RpcError> {
        self.0.encode_value(value)
    }

    pub fn decode_value(&self, data: &[u8]) -> Result<Value, RpcError> {
        self.0.decode_value(data)
    }

    /// Encode each element of `values` lazily, in its one-slot envelope.
    pub fn encode_stream(&self, descriptor: &StreamDescriptor, values: ValueStream) -> PayloadStream {
        let codec = self.clone();
        let descriptor = descriptor.clone();
        let accessor = descriptor.accessor();
        values
            .map(move |item| {
                let value = item?;
                tracing::trace!(element = %descriptor.element_type(), "encoding stream element");
                codec.encode(&descriptor.wrap(value), &accessor)
            })
            .boxed()
    }

    /// Decode each message of `messages` lazily into a stream element.
    pub fn decode_stream(&self, descriptor: &StreamDescriptor, messages: PayloadStream) -> ValueStream {
        let codec = self.clone();
        let descriptor = descriptor.clone();
        let accessor = descriptor.accessor();
        let element_type = descriptor.element_type().clone();
        ValueStream::from_values(
            element_type,
            messages.map(move |item| {
                let bytes = item?;
                tracing::trace!(element = %descriptor.element_type(), "decoding stream element");
                descriptor.unwrap(codec.decode(&bytes, &accessor)?)
            }),
        )
    }
}

impl Default for BoxedCodec {
    fn default() -> Self {
        BoxedCodec::new(JsonCodec)
    }
}

impl std::fmt::Debug for BoxedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCodec").field(&self.name()).finish()
    }
}

/// JSON codec.
///
/// An envelope is a JSON object keyed by slot name (`{"Value1": .., "Value2": ..}`).
/// Missing keys decode as empty slots; unknown keys are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &Message, accessor: &MessageAccessor) -> Result<Bytes, RpcError> {
        accessor.check(message)?;
        let object: serde_json::Map<String, Value> = accessor
            .names()
            .iter()
            .cloned()
            .zip(message.values().iter().cloned())
            .collect();
        serde_json::to_vec(&object)
            .map(Bytes::from)
            .map_err(|e| RpcError::Encode(e.to_string()))
    }

    fn decode(&self, data: &[u8], accessor: &MessageAccessor) -> Result<Message, RpcError> {
        let mut object: serde_json::Map<String, Value> =
            serde_json::from_slice(data).map_err(|e| RpcError::Decode(e.to_string()))?;
        let values = accessor
            .names()
            .iter()
            .map(|name| object.remove(name).unwrap_or(Value::Null))
            .collect();
        Ok(Message::from_values(values))
    }

    fn encode_value(&self, value: &Value) -> Result<Bytes, RpcError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| RpcError::Encode(e.to_string()))
    }

    fn decode_value(&self, data: &[u8]) -> Result<Value, RpcError> {
        serde_json::from_slice(data).map_err(|e| RpcError::Decode(e.to_string()))
    }
}
