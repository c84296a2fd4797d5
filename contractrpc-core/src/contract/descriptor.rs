//! Contract registration DSL.
//!
//! Contracts are described explicitly: an [`InterfaceDescriptor`] lists its
//! methods as [`MethodDescriptor`]s, and a type opts in by implementing
//! [`ServiceContract`].
//!
//! ```ignore
//! struct Calculator;
//!
//! impl ServiceContract for Calculator {
//!     fn describe() -> InterfaceDescriptor {
//!         InterfaceDescriptor::service("ICalculator")
//!             .namespace("demo")
//!             .method(
//!                 MethodDescriptor::operation("Add")
//!                     .param::<i32>("a")
//!                     .param::<i32>("b")
//!                     .returns::<i32>(),
//!             )
//!             .method(
//!                 MethodDescriptor::operation("Sum")
//!                     .stream_param::<i32>("values")
//!                     .context("options")
//!                     .returns::<i64>(),
//!             )
//!     }
//! }
//! ```

use crate::message::TypeDescriptor;

/// A type that describes a service contract.
pub trait ServiceContract: 'static {
    fn describe() -> InterfaceDescriptor;
}

/// Declared kind of a method parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// A plain value.
    Value(TypeDescriptor),
    /// A streamed sequence of elements.
    Stream(TypeDescriptor),
    /// Call options on the client, server call context on the server.
    CallContext,
    /// A cancellation token.
    Cancellation,
    /// An out/by-reference parameter. Never supported.
    Reference(TypeDescriptor),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParameterDescriptor {
    name: String,
    ty: ParameterType,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ParameterType {
        &self.ty
    }
}

/// One item of a tuple return.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReturnItemDescriptor {
    name: Option<String>,
    ty: TypeDescriptor,
    is_stream: bool,
}

impl ReturnItemDescriptor {
    pub fn value<T: ?Sized + 'static>() -> Self {
        Self {
            name: None,
            ty: TypeDescriptor::of::<T>(),
            is_stream: false,
        }
    }

    pub fn stream<T: ?Sized + 'static>() -> Self {
        Self {
            name: None,
            ty: TypeDescriptor::of::<T>(),
            is_stream: true,
        }
    }

    /// Name the item. Unnamed items are called `Item1..ItemN`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn is_stream(&self) -> bool {
        self.is_stream
    }
}

/// Declared return shape of a method.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    #[default]
    Unit,
    Value(TypeDescriptor),
    Stream(TypeDescriptor),
    Tuple(Vec<ReturnItemDescriptor>),
}

/// A method of a contract interface.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    name: String,
    name_override: Option<String>,
    is_operation: bool,
    is_async: bool,
    is_generic: bool,
    parameters: Vec<ParameterDescriptor>,
    returns: ReturnShape,
}

impl MethodDescriptor {
    /// A method marked as an RPC operation. Async unless [`sync`](Self::sync) is called.
    pub fn operation(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_override: None,
            is_operation: true,
            is_async: true,
            is_generic: false,
            parameters: Vec::new(),
            returns: ReturnShape::Unit,
        }
    }

    /// A method that is not an RPC operation.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            is_operation: false,
            ..Self::operation(name)
        }
    }

    pub fn param<T: ?Sized + 'static>(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterType::Value(TypeDescriptor::of::<T>()))
    }

    pub fn stream_param<T: ?Sized + 'static>(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterType::Stream(TypeDescriptor::of::<T>()))
    }

    pub fn context(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterType::CallContext)
    }

    pub fn cancellation(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterType::Cancellation)
    }

    pub fn reference<T: ?Sized + 'static>(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterType::Reference(TypeDescriptor::of::<T>()))
    }

    pub fn parameter(mut self, name: impl Into<String>, ty: ParameterType) -> Self {
        self.parameters.push(ParameterDescriptor::new(name, ty));
        self
    }

    pub fn returns<T: ?Sized + 'static>(mut self) -> Self {
        self.returns = ReturnShape::Value(TypeDescriptor::of::<T>());
        self
    }

    pub fn returns_stream<T: ?Sized + 'static>(mut self) -> Self {
        self.returns = ReturnShape::Stream(TypeDescriptor::of::<T>());
        self
    }

    pub fn returns_tuple(mut self, items: Vec<ReturnItemDescriptor>) -> Self {
        self.returns = ReturnShape::Tuple(items);
        self
    }

    /// Mark the method synchronous.
    pub fn sync(mut self) -> Self {
        self.is_async = false;
        self
    }

    /// Mark the method generic over its own type parameters.
    pub fn generic(mut self) -> Self {
        self.is_generic = true;
        self
    }

    /// Use `name` as the wire operation name.
    pub fn name_override(mut self, name: impl Into<String>) -> Self {
        self.name_override = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire operation name.
    pub fn operation_name(&self) -> &str {
        self.name_override.as_deref().unwrap_or(&self.name)
    }

    pub fn is_operation(&self) -> bool {
        self.is_operation
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn is_generic(&self) -> bool {
        self.is_generic
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn return_shape(&self) -> &ReturnShape {
        &self.returns
    }
}

/// A contract interface: methods plus the interfaces it extends.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceDescriptor {
    name: String,
    namespace: Option<String>,
    service_name: Option<String>,
    is_service: bool,
    generic_args: Vec<TypeDescriptor>,
    methods: Vec<MethodDescriptor>,
    extends: Vec<InterfaceDescriptor>,
}

impl InterfaceDescriptor {
    /// An interface marked as a service contract.
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            service_name: None,
            is_service: true,
            generic_args: Vec::new(),
            methods: Vec::new(),
            extends: Vec::new(),
        }
    }

    /// An interface that is not a service contract. Its methods are never exposed.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            is_service: false,
            ..Self::service(name)
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Use `name` as the service name instead of the derived one.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn generic_arg<T: ?Sized + 'static>(mut self) -> Self {
        self.generic_args.push(TypeDescriptor::of::<T>());
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn extends(mut self, parent: InterfaceDescriptor) -> Self {
        self.extends.push(parent);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn get_service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn is_service(&self) -> bool {
        self.is_service
    }

    pub fn generic_args(&self) -> &[TypeDescriptor] {
        &self.generic_args
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn parents(&self) -> &[InterfaceDescriptor] {
        &self.extends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_builder() {
        let method = MethodDescriptor::operation("Add")
            .param::<i32>("a")
            .context("options")
            .returns::<i32>()
            .name_override("Plus");
        assert_eq!(method.name(), "Add");
        assert_eq!(method.operation_name(), "Plus");
        assert!(method.is_operation());
        assert!(method.is_async());
        assert_eq!(method.parameters().len(), 2);
        assert_eq!(method.parameters()[1].ty(), &ParameterType::CallContext);
        assert_eq!(
            method.return_shape(),
            &ReturnShape::Value(TypeDescriptor::of::<i32>())
        );
    }

    #[test]
    fn test_plain_markers() {
        assert!(!MethodDescriptor::plain("Dispose").is_operation());
        assert!(!MethodDescriptor::operation("Ping").sync().is_async());
        assert!(!InterfaceDescriptor::plain("IDisposable").is_service());
        assert!(InterfaceDescriptor::service("IPing").is_service());
    }
}
