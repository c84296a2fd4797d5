//! Call arguments and results.
//!
//! [`Arguments`] holds one entry per declared parameter, in declaration order.
//! [`Returns`] holds one entry per declared return item. Both are positional;
//! the operation descriptor says which position is a header, a body slot, the
//! stream, or a context parameter.

use std::mem;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::message::Value;
use crate::options::{CallOptions, ServerCallContext};
use crate::stream::ValueStream;

/// One positional argument.
#[derive(Debug, Default)]
pub enum Argument {
    #[default]
    Empty,
    Value(Value),
    Stream(ValueStream),
    /// Client call-context parameter.
    Options(CallOptions),
    /// Server call-context parameter.
    Server(ServerCallContext),
    Cancellation(CancellationToken),
}

/// Positional call arguments.
///
/// # Example
///
/// ```ignore
/// let args = Arguments::new()
///     .with_value(2)
///     .with_value("two")
///     .with_stream(ValueStream::from_iter(vec![1, 2, 3]));
/// ```
#[derive(Debug, Default)]
pub struct Arguments {
    items: Vec<Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments with `len` empty positions.
    pub fn with_len(len: usize) -> Self {
        let mut items = Vec::with_capacity(len);
        items.resize_with(len, Default::default);
        Self { items }
    }

    pub fn push(&mut self, argument: Argument) {
        self.items.push(argument);
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.push(Argument::Value(value.into()));
        self
    }

    pub fn with_serialized<T: Serialize>(mut self, value: &T) -> Result<Self, RpcError> {
        let value = serde_json::to_value(value).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.push(Argument::Value(value));
        Ok(self)
    }

    pub fn with_stream(mut self, stream: ValueStream) -> Self {
        self.push(Argument::Stream(stream));
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.push(Argument::Options(options));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.push(Argument::Cancellation(token));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Argument> {
        self.items.get(index)
    }

    /// Replace the argument at `index`, growing with empty positions if needed.
    pub fn set(&mut self, index: usize, argument: Argument) {
        if index >= self.items.len() {
            self.items.resize_with(index + 1, Default::default);
        }
        self.items[index] = argument;
    }

    /// The value at `index`. Empty positions read as `Null`.
    pub fn value(&self, index: usize) -> Result<Value, RpcError> {
        match self.items.get(index) {
            None | Some(Argument::Empty) => Ok(Value::Null),
            Some(Argument::Value(value)) => Ok(value.clone()),
            Some(other) => Err(RpcError::InvalidCast {
                expected: "value".to_string(),
                actual: kind_of(other).to_string(),
            }),
        }
    }

    /// Deserialize the value at `index`.
    pub fn value_at<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.value(index)?;
        serde_json::from_value(value.clone()).map_err(|e| RpcError::InvalidCast {
            expected: std::any::type_name::<T>().to_string(),
            actual: format!("{value} ({e})"),
        })
    }

    /// Take the stream at `index`, leaving the position empty.
    pub fn take_stream(&mut self, index: usize) -> Result<ValueStream, RpcError> {
        let Some(slot) = self.items.get_mut(index) else {
            return Err(RpcError::Protocol(format!("no argument at position {index}")));
        };
        match mem::take(slot) {
            Argument::Stream(stream) => Ok(stream),
            other => {
                let actual = kind_of(&other);
                *slot = other;
                Err(RpcError::InvalidCast {
                    expected: "stream".to_string(),
                    actual: actual.to_string(),
                })
            }
        }
    }

    /// Arguments for the real call.
    ///
    /// Values and context are copied so filters still see them afterwards;
    /// streams can only be consumed once and are moved out.
    pub fn take_for_call(&mut self) -> Arguments {
        let items = self
            .items
            .iter_mut()
            .map(|item| match item {
                Argument::Stream(_) => mem::take(item),
                Argument::Empty => Argument::Empty,
                Argument::Value(value) => Argument::Value(value.clone()),
                Argument::Options(options) => Argument::Options(options.clone()),
                Argument::Server(ctx) => Argument::Server(ctx.clone()),
                Argument::Cancellation(token) => Argument::Cancellation(token.clone()),
            })
            .collect();
        Arguments { items }
    }

    /// The client call options, if any position carries them.
    pub fn options(&self) -> Option<&CallOptions> {
        self.items.iter().find_map(|item| match item {
            Argument::Options(options) => Some(options),
            _ => None,
        })
    }

    /// The server call context, if any position carries it.
    pub fn server_context(&self) -> Option<&ServerCallContext> {
        self.items.iter().find_map(|item| match item {
            Argument::Server(ctx) => Some(ctx),
            _ => None,
        })
    }

    /// The call's cancellation token.
    ///
    /// An explicit cancellation argument wins over call options, which win
    /// over the server context.
    pub fn cancellation(&self) -> Option<CancellationToken> {
        let explicit = self.items.iter().find_map(|item| match item {
            Argument::Cancellation(token) => Some(token.clone()),
            _ => None,
        });
        explicit
            .or_else(|| self.options().and_then(|o| o.get_cancellation().cloned()))
            .or_else(|| self.server_context().map(|ctx| ctx.cancellation().clone()))
    }
}

fn kind_of(argument: &Argument) -> &'static str {
    match argument {
        Argument::Empty => "empty",
        Argument::Value(_) => "value",
        Argument::Stream(_) => "stream",
        Argument::Options(_) => "call options",
        Argument::Server(_) => "server call context",
        Argument::Cancellation(_) => "cancellation token",
    }
}

/// One positional return item.
#[derive(Debug, Default)]
pub enum ReturnValue {
    #[default]
    Empty,
    Value(Value),
    Stream(ValueStream),
}

/// Positional call results.
#[derive(Debug, Default)]
pub struct Returns {
    items: Vec<ReturnValue>,
}

impl Returns {
    /// No results.
    pub fn unit() -> Self {
        Self::default()
    }

    /// Results with `len` empty positions.
    pub fn with_len(len: usize) -> Self {
        let mut items = Vec::with_capacity(len);
        items.resize_with(len, Default::default);
        Self { items }
    }

    /// A single value result.
    pub fn single(value: impl Into<Value>) -> Self {
        Self::unit().with_value(value)
    }

    /// A single serialized result.
    pub fn serialized<T: Serialize>(value: &T) -> Result<Self, RpcError> {
        Self::unit().with_serialized(value)
    }

    /// A single stream result.
    pub fn stream(stream: ValueStream) -> Self {
        Self::unit().with_stream(stream)
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.items.push(ReturnValue::Value(value.into()));
        self
    }

    pub fn with_serialized<T: Serialize>(mut self, value: &T) -> Result<Self, RpcError> {
        let value = serde_json::to_value(value).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.items.push(ReturnValue::Value(value));
        Ok(self)
    }

    pub fn with_stream(mut self, stream: ValueStream) -> Self {
        self.items.push(ReturnValue::Stream(stream));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ReturnValue> {
        self.items.get(index)
    }

    /// Replace the item at `index`, growing with empty positions if needed.
    pub fn set(&mut self, index: usize, value: ReturnValue) {
        if index >= self.items.len() {
            self.items.resize_with(index + 1, Default::default);
        }
        self.items[index] = value;
    }

    /// The value at `index`. Empty positions read as `Null`.
    pub fn value(&self, index: usize) -> Result<Value, RpcError> {
        match self.items.get(index) {
            None | Some(ReturnValue::Empty) => Ok(Value::Null),
            Some(ReturnValue::Value(value)) => Ok(value.clone()),
            Some(ReturnValue::Stream(_)) => Err(RpcError::InvalidCast {
                expected: "value".to_string(),
                actual: "stream".to_string(),
            }),
        }
    }

    /// Deserialize the value at `index`.
    pub fn value_at<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.value(index)?;
        serde_json::from_value(value.clone()).map_err(|e| RpcError::InvalidCast {
            expected: std::any::type_name::<T>().to_string(),
            actual: format!("{value} ({e})"),
        })
    }

    /// Take the stream at `index`, leaving the position empty.
    pub fn take_stream(&mut self, index: usize) -> Result<ValueStream, RpcError> {
        let Some(slot) = self.items.get_mut(index) else {
            return Err(RpcError::Protocol(format!("no result at position {index}")));
        };
        match mem::take(slot) {
            ReturnValue::Stream(stream) => Ok(stream),
            other => {
                *slot = other;
                Err(RpcError::InvalidCast {
                    expected: "stream".to_string(),
                    actual: "value".to_string(),
                })
            }
        }
    }

    /// Deserialize the first result.
    pub fn into_value<T: DeserializeOwned>(self) -> Result<T, RpcError> {
        self.value_at(0)
    }
}
