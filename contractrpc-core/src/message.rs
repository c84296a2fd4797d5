//! Message envelopes.
//!
//! Any number of scalar values that travel together (header parameters,
//! body parameters, a single stream element) are carried in one [`Message`]:
//! an ordered list of nullable slots. Its shape is a [`MessageDescriptor`],
//! and a [`MessageAccessor`] reads and writes slots by index.
//!
//! Descriptor identity is structural: two descriptors with the same slot-type
//! sequence are equal, and [`MessageAccessor::for_descriptor`] hands out the
//! same accessor instance for both.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RpcError;

/// A slot value. `Null` is an empty slot.
pub type Value = serde_json::Value;

/// Identifies the declared type of a slot, parameter or stream element.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDescriptor {
    name: Cow<'static, str>,
}

impl TypeDescriptor {
    /// Descriptor for a Rust type, named by [`std::any::type_name`].
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            name: Cow::Borrowed(std::any::type_name::<T>()),
        }
    }

    /// Descriptor with an explicit name.
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Cow::Owned(name.into()),
        }
    }

    /// Full type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name with module paths removed, generics kept.
    ///
    /// `core::option::Option<alloc::string::String>` becomes `Option<String>`.
    pub fn short_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut ident = String::new();
        for ch in self.name.chars() {
            match ch {
                ':' => ident.clear(),
                c if c.is_alphanumeric() || c == '_' => ident.push(c),
                c => {
                    out.push_str(&ident);
                    ident.clear();
                    out.push(c);
                }
            }
        }
        out.push_str(&ident);
        out
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDescriptor({})", self.name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Shape of an envelope: an ordered list of slot types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageDescriptor {
    slots: Arc<[TypeDescriptor]>,
}

impl MessageDescriptor {
    pub fn new(slots: Vec<TypeDescriptor>) -> Self {
        Self {
            slots: slots.into(),
        }
    }

    /// The canonical "no payload" shape.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[TypeDescriptor] {
        &self.slots
    }
}

/// An envelope: ordered nullable slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    values: Vec<Value>,
}

impl Message {
    /// Envelope with `arity` empty slots.
    pub fn with_arity(arity: usize) -> Self {
        Self {
            values: vec![Value::Null; arity],
        }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Reads and writes the slots of envelopes of one shape.
///
/// Accessors are stateless; obtain them through [`MessageAccessor::for_descriptor`]
/// so every call using a shape shares one instance.
#[derive(Debug)]
pub struct MessageAccessor {
    descriptor: MessageDescriptor,
    names: Vec<String>,
}

static ACCESSORS: OnceLock<RwLock<HashMap<MessageDescriptor, Arc<MessageAccessor>>>> =
    OnceLock::new();

impl MessageAccessor {
    /// The shared accessor for a descriptor.
    pub fn for_descriptor(descriptor: &MessageDescriptor) -> Arc<MessageAccessor> {
        let accessors = ACCESSORS.get_or_init(Default::default);
        if let Some(accessor) = accessors.read().get(descriptor) {
            return accessor.clone();
        }
        accessors
            .write()
            .entry(descriptor.clone())
            .or_insert_with(|| Arc::new(MessageAccessor::new(descriptor.clone())))
            .clone()
    }

    fn new(descriptor: MessageDescriptor) -> Self {
        let names = (1..=descriptor.arity())
            .map(|i| format!("Value{i}"))
            .collect();
        Self { descriptor, names }
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Slot names, `Value1..ValueN`.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// A fresh envelope with every slot empty.
    pub fn create_new(&self) -> Message {
        Message::with_arity(self.descriptor.arity())
    }

    pub fn get<'m>(&self, message: &'m Message, index: usize) -> Result<&'m Value, RpcError> {
        self.check(message)?;
        message.values.get(index).ok_or_else(|| self.out_of_range(index))
    }

    /// Read a slot and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, message: &Message, index: usize) -> Result<T, RpcError> {
        let value = self.get(message, index)?;
        serde_json::from_value(value.clone()).map_err(|e| RpcError::InvalidCast {
            expected: self.descriptor.slots[index].to_string(),
            actual: format!("{value} ({e})"),
        })
    }

    pub fn set(&self, message: &mut Message, index: usize, value: Value) -> Result<(), RpcError> {
        self.check(message)?;
        let err = self.out_of_range(index);
        let slot = message.values.get_mut(index).ok_or(err)?;
        *slot = value;
        Ok(())
    }

    /// Serialize a value into a slot.
    pub fn set_from<T: Serialize>(
        &self,
        message: &mut Message,
        index: usize,
        value: &T,
    ) -> Result<(), RpcError> {
        let value = serde_json::to_value(value).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.set(message, index, value)
    }

    /// Verify that an envelope has this accessor's arity.
    pub fn check(&self, message: &Message) -> Result<(), RpcError> {
        if message.len() != self.descriptor.arity() {
            return Err(RpcError::Protocol(format!(
                "envelope has {} slots, expected {}",
                message.len(),
                self.descriptor.arity()
            )));
        }
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> RpcError {
        RpcError::Protocol(format!(
            "slot {index} out of range for envelope of {} slots",
            self.descriptor.arity()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(TypeDescriptor::of::<i32>().short_name(), "i32");
        assert_eq!(TypeDescriptor::of::<String>().short_name(), "String");
        assert_eq!(
            TypeDescriptor::of::<Option<String>>().short_name(),
            "Option<String>"
        );
        assert_eq!(
            TypeDescriptor::of::<Option<(i32, u8)>>().short_name(),
            "Option<(i32, u8)>"
        );
    }

    #[test]
    fn test_descriptor_equality_is_structural() {
        let a = MessageDescriptor::new(vec![TypeDescriptor::of::<i32>(), TypeDescriptor::of::<String>()]);
        let b = MessageDescriptor::new(vec![TypeDescriptor::of::<i32>(), TypeDescriptor::of::<String>()]);
        let c = MessageDescriptor::new(vec![TypeDescriptor::of::<String>(), TypeDescriptor::of::<i32>()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Arc::ptr_eq(
            &MessageAccessor::for_descriptor(&a),
            &MessageAccessor::for_descriptor(&b)
        ));
    }

    #[test]
    fn test_accessor_get_set() {
        let descriptor =
            MessageDescriptor::new(vec![TypeDescriptor::of::<i32>(), TypeDescriptor::of::<String>()]);
        let accessor = MessageAccessor::for_descriptor(&descriptor);
        assert_eq!(accessor.names(), ["Value1", "Value2"]);

        let mut message = accessor.create_new();
        assert_eq!(accessor.get(&message, 0).unwrap(), &Value::Null);

        accessor.set_from(&mut message, 0, &42).unwrap();
        accessor.set(&mut message, 1, Value::from("hi")).unwrap();
        assert_eq!(accessor.get_as::<i32>(&message, 0).unwrap(), 42);
        assert_eq!(accessor.get_as::<String>(&message, 1).unwrap(), "hi");
    }

    #[test]
    fn test_accessor_rejects_bad_index_and_arity() {
        let descriptor = MessageDescriptor::new(vec![TypeDescriptor::of::<i32>()]);
        let accessor = MessageAccessor::for_descriptor(&descriptor);
        let mut message = accessor.create_new();
        assert!(matches!(
            accessor.set(&mut message, 3, Value::Null),
            Err(RpcError::Protocol(_))
        ));
        assert!(matches!(
            accessor.get(&Message::with_arity(2), 0),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn test_get_as_reports_invalid_cast() {
        let descriptor = MessageDescriptor::new(vec![TypeDescriptor::of::<i32>()]);
        let accessor = MessageAccessor::for_descriptor(&descriptor);
        let message = Message::from_values(vec![Value::from("not a number")]);
        assert!(matches!(
            accessor.get_as::<i32>(&message, 0),
            Err(RpcError::InvalidCast { .. })
        ));
    }

    #[test]
    fn test_empty_descriptor() {
        let accessor = MessageAccessor::for_descriptor(&MessageDescriptor::empty());
        assert!(accessor.names().is_empty());
        assert!(accessor.create_new().is_empty());
    }
}
