//! Fault model shared by both sides of a call.
//!
//! A server turns an implementation error into a [`Fault`] (code, message and
//! an optional typed detail). The detail travels in trailing metadata:
//!
//! - [`FAULT_DETAIL_TYPE_KEY`]: the detail's type name (text)
//! - [`FAULT_DETAIL_KEY`]: the detail payload, encoded with the active codec (binary)
//!
//! The client reads the two fields back with [`read_fault_detail`] and resolves
//! the type name through a [`FaultDetailRegistry`] to build a [`FaultError`].
//! When either field is missing there is no structured detail.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::BoxedCodec;
use crate::error::{Code, RpcError, Status};
use crate::message::Value;
use crate::metadata::Metadata;

/// Trailer key carrying the fault detail's type name.
pub const FAULT_DETAIL_TYPE_KEY: &str = "x-fault-detail-type";

/// Trailer key carrying the encoded fault detail.
pub const FAULT_DETAIL_KEY: &str = "x-fault-detail-bin";

/// A structured fault detail: a type name plus its value.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultDetail {
    type_name: String,
    value: Value,
}

impl FaultDetail {
    /// Detail from a serializable value, named by its Rust type.
    pub fn new<T: Serialize + 'static>(detail: &T) -> Result<Self, RpcError> {
        let value = serde_json::to_value(detail).map_err(|e| RpcError::Encode(e.to_string()))?;
        Ok(Self {
            type_name: std::any::type_name::<T>().to_string(),
            value,
        })
    }

    /// Detail with an explicit type name.
    pub fn named<S: Into<String>>(type_name: S, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A fault produced by a server fault handler.
#[derive(Clone, Debug)]
pub struct Fault {
    code: Code,
    message: String,
    detail: Option<FaultDetail>,
}

impl Fault {
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: FaultDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&FaultDetail> {
        self.detail.as_ref()
    }

    /// Write the detail fields into trailing metadata. No-op without a detail.
    pub fn write_trailers(&self, codec: &BoxedCodec, trailers: &mut Metadata) -> Result<(), RpcError> {
        let Some(detail) = &self.detail else {
            return Ok(());
        };
        let payload = codec.encode_value(&detail.value)?;
        trailers.insert(FAULT_DETAIL_TYPE_KEY, &detail.type_name)?;
        trailers.insert_bin(FAULT_DETAIL_KEY, &payload)?;
        Ok(())
    }

    /// The terminal status error carrying this fault.
    ///
    /// A detail that cannot be encoded is dropped; code and message still go out.
    pub fn into_error(self, codec: &BoxedCodec) -> RpcError {
        let mut trailers = Metadata::new();
        if let Err(e) = self.write_trailers(codec, &mut trailers) {
            tracing::warn!(error = %e, "dropping fault detail that could not be encoded");
            trailers = Metadata::new();
        }
        RpcError::Status {
            status: Status::new(self.code, self.message),
            trailers,
        }
    }
}

/// Read the fault detail fields from trailing metadata.
///
/// Returns `None` unless both fields are present.
pub fn read_fault_detail(
    trailers: &Metadata,
    codec: &BoxedCodec,
) -> Option<Result<(String, Value), RpcError>> {
    let type_name = trailers.get(FAULT_DETAIL_TYPE_KEY)?;
    let payload = trailers.get_bin(FAULT_DETAIL_KEY)?;
    Some(
        payload
            .and_then(|bytes| codec.decode_value(&bytes))
            .map(|value| (type_name.to_string(), value)),
    )
}

/// An application fault reconstructed on the receiving side.
///
/// The raw detail value is always kept; the typed detail is present when the
/// detail type was registered with the client.
#[derive(Clone)]
pub struct FaultError {
    status: Status,
    detail_type: String,
    raw_detail: Value,
    detail: Option<Arc<dyn Any + Send + Sync>>,
    trailers: Metadata,
}

impl FaultError {
    pub fn new(
        status: Status,
        detail_type: String,
        raw_detail: Value,
        detail: Option<Arc<dyn Any + Send + Sync>>,
        trailers: Metadata,
    ) -> Self {
        Self {
            status,
            detail_type,
            raw_detail,
            detail,
            trailers,
        }
    }

    pub fn code(&self) -> Code {
        self.status.code()
    }

    pub fn message(&self) -> &str {
        self.status.message().unwrap_or_default()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn detail_type(&self) -> &str {
        &self.detail_type
    }

    pub fn raw_detail(&self) -> &Value {
        &self.raw_detail
    }

    /// The typed detail, if it was resolved and is a `T`.
    pub fn detail<T: Any>(&self) -> Option<&T> {
        self.detail.as_deref()?.downcast_ref::<T>()
    }

    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }
}

impl fmt::Debug for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultError")
            .field("status", &self.status)
            .field("detail_type", &self.detail_type)
            .field("raw_detail", &self.raw_detail)
            .field("resolved", &self.detail.is_some())
            .finish()
    }
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.status, self.detail_type)
    }
}

type DetailDecoder =
    Arc<dyn Fn(Value) -> Result<Arc<dyn Any + Send + Sync>, RpcError> + Send + Sync>;

/// Maps fault detail type names to typed decoders.
#[derive(Clone, Default)]
pub struct FaultDetailRegistry {
    decoders: HashMap<String, DetailDecoder>,
}

impl FaultDetailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its Rust type name, the name [`FaultDetail::new`] writes.
    pub fn register<T>(&mut self)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.register_as::<T>(std::any::type_name::<T>());
    }

    /// Register `T` under an explicit type name.
    pub fn register_as<T>(&mut self, type_name: impl Into<String>)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let decoder: DetailDecoder = Arc::new(|value| {
            let typed: T =
                serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))?;
            Ok(Arc::new(typed) as Arc<dyn Any + Send + Sync>)
        });
        self.decoders.insert(type_name.into(), decoder);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    /// Decode a detail value of a registered type.
    ///
    /// Returns `None` when the type name is unknown.
    pub fn resolve(
        &self,
        type_name: &str,
        value: &Value,
    ) -> Option<Result<Arc<dyn Any + Send + Sync>, RpcError>> {
        let decoder = self.decoders.get(type_name)?;
        Some(decoder(value.clone()))
    }
}

impl fmt::Debug for FaultDetailRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}
