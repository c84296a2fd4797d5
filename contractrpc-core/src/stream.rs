//! Streamed sequences.
//!
//! A [`ValueStream`] is a lazy, forward-only sequence of slot values tagged
//! with its element type. A [`StreamDescriptor`] describes one streamed
//! parameter or return item: the element type plus the one-slot envelope each
//! element travels in.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RpcError;
use crate::message::{Message, MessageAccessor, MessageDescriptor, TypeDescriptor, Value};

/// A lazy sequence of values of one declared element type.
pub struct ValueStream {
    element_type: TypeDescriptor,
    inner: BoxStream<'static, Result<Value, RpcError>>,
}

impl ValueStream {
    /// Stream of serializable items. Serialization happens as items are pulled.
    pub fn from_stream<T, S>(items: S) -> Self
    where
        T: Serialize + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Self::from_result_stream(items.map(Ok::<T, RpcError>))
    }

    /// Stream of fallible items. An `Err` item is passed through as-is.
    pub fn from_result_stream<T, S>(items: S) -> Self
    where
        T: Serialize + 'static,
        S: Stream<Item = Result<T, RpcError>> + Send + 'static,
    {
        let inner = items.map(|item| {
            item.and_then(|v| serde_json::to_value(&v).map_err(|e| RpcError::Encode(e.to_string())))
        });
        Self {
            element_type: TypeDescriptor::of::<T>(),
            inner: inner.boxed(),
        }
    }

    /// Stream over an in-memory sequence.
    pub fn from_iter<T, I>(items: I) -> Self
    where
        T: Serialize + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items))
    }

    /// Stream of already-converted values with an explicit element type.
    pub fn from_values<S>(element_type: TypeDescriptor, values: S) -> Self
    where
        S: Stream<Item = Result<Value, RpcError>> + Send + 'static,
    {
        Self {
            element_type,
            inner: values.boxed(),
        }
    }

    /// A stream that ends immediately.
    pub fn empty(element_type: TypeDescriptor) -> Self {
        Self::from_values(element_type, stream::empty())
    }

    pub fn element_type(&self) -> &TypeDescriptor {
        &self.element_type
    }

    /// Transform each element lazily, keeping the element type.
    pub fn map_values<F>(self, mut f: F) -> Self
    where
        F: FnMut(Value) -> Result<Value, RpcError> + Send + 'static,
    {
        Self {
            element_type: self.element_type,
            inner: self.inner.map(move |item| item.and_then(&mut f)).boxed(),
        }
    }

    /// Deserialize each element as `T`.
    pub fn into_typed<T>(self) -> BoxStream<'static, Result<T, RpcError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let expected = TypeDescriptor::of::<T>().to_string();
        self.inner
            .map(move |item| {
                let value = item?;
                serde_json::from_value(value.clone()).map_err(|e| RpcError::InvalidCast {
                    expected: expected.clone(),
                    actual: format!("{value} ({e})"),
                })
            })
            .boxed()
    }
}

impl Stream for ValueStream {
    type Item = Result<Value, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStream")
            .field("element_type", &self.element_type)
            .finish_non_exhaustive()
    }
}

/// Element type and per-element envelope of a streamed parameter or result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamDescriptor {
    element_type: TypeDescriptor,
    envelope: MessageDescriptor,
}

impl StreamDescriptor {
    pub fn new(element_type: TypeDescriptor) -> Self {
        let envelope = MessageDescriptor::new(vec![element_type.clone()]);
        Self {
            element_type,
            envelope,
        }
    }

    pub fn element_type(&self) -> &TypeDescriptor {
        &self.element_type
    }

    pub fn envelope(&self) -> &MessageDescriptor {
        &self.envelope
    }

    pub fn accessor(&self) -> Arc<MessageAccessor> {
        MessageAccessor::for_descriptor(&self.envelope)
    }

    /// Check that a stream carries the declared element type.
    pub fn validate(&self, candidate: &ValueStream) -> Result<(), RpcError> {
        if candidate.element_type() != &self.element_type {
            return Err(RpcError::InvalidCast {
                expected: format!("stream of {}", self.element_type),
                actual: format!("stream of {}", candidate.element_type()),
            });
        }
        Ok(())
    }

    /// An empty stream of the declared element type.
    pub fn create_empty(&self) -> ValueStream {
        ValueStream::empty(self.element_type.clone())
    }

    /// Put one element into its envelope.
    pub fn wrap(&self, value: Value) -> Message {
        Message::from_values(vec![value])
    }

    /// Take one element out of its envelope.
    pub fn unwrap(&self, message: Message) -> Result<Value, RpcError> {
        self.accessor().check(&message)?;
        Ok(message.into_values().into_iter().next().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_from_iter_preserves_order() {
        let stream = ValueStream::from_iter(vec![1, 2, 3]);
        assert_eq!(stream.element_type(), &TypeDescriptor::of::<i32>());
        let items: Vec<i32> = stream.into_typed::<i32>().try_collect().await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_map_is_lazy_and_keeps_type() {
        let stream = ValueStream::from_iter(vec![1, 2]).map_values(|v| {
            Ok(Value::from(v.as_i64().unwrap_or_default() * 10))
        });
        assert_eq!(stream.element_type(), &TypeDescriptor::of::<i32>());
        let items: Vec<i64> = stream.into_typed::<i64>().try_collect().await.unwrap();
        assert_eq!(items, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_error_items_pass_through() {
        let source = futures::stream::iter(vec![Ok(1), Err(RpcError::Cancelled)]);
        let mut stream = ValueStream::from_result_stream(source);
        assert_eq!(stream.next().await.unwrap().unwrap(), Value::from(1));
        assert!(stream.next().await.unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_validate_element_type() {
        let descriptor = StreamDescriptor::new(TypeDescriptor::of::<String>());
        assert!(descriptor.validate(&ValueStream::from_iter(vec!["a"])).is_err());
        assert!(
            descriptor
                .validate(&ValueStream::from_iter(vec![String::from("a")]))
                .is_ok()
        );
        assert!(descriptor.validate(&descriptor.create_empty()).is_ok());
    }

    #[test]
    fn test_wrap_unwrap() {
        let descriptor = StreamDescriptor::new(TypeDescriptor::of::<i32>());
        let message = descriptor.wrap(Value::from(7));
        assert_eq!(message.len(), 1);
        assert_eq!(descriptor.unwrap(message).unwrap(), Value::from(7));
        assert!(descriptor.unwrap(Message::with_arity(2)).is_err());
    }

    #[tokio::test]
    async fn test_into_typed_reports_invalid_cast() {
        let stream = ValueStream::from_iter(vec!["x"]);
        let result: Result<Vec<i32>, _> = stream.into_typed::<i32>().try_collect().await;
        assert!(matches!(result, Err(RpcError::InvalidCast { .. })));
    }
}
