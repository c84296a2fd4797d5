//! Handler binding.
//!
//! A [`ServiceBinding`] attaches implementations to the operations of one
//! contract. Handlers take positional [`Arguments`] and produce positional
//! [`Returns`]; context parameters arrive as [`Argument::Server`] or
//! [`Argument::Cancellation`].
//!
//! ```ignore
//! let binding = ServiceBinding::for_contract::<Calculator>()?
//!     .on("Add", |args: Arguments| async move {
//!         let a: i32 = args.value_at(0)?;
//!         let b: i32 = args.value_at(1)?;
//!         Ok(Returns::single(a + b))
//!     })
//!     .on_sync("Negate", |args: Arguments| {
//!         Ok(Returns::single(-args.value_at::<i32>(0)?))
//!     });
//! ```
//!
//! [`Argument::Server`]: contractrpc_core::Argument::Server
//! [`Argument::Cancellation`]: contractrpc_core::Argument::Cancellation

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use contractrpc_core::{
    Arguments, AsyncTerminal, BoxFuture, ContractDescription, ContractError, Filter,
    FilterCollection, FilterContext, MethodPath, OperationDescriptor, Returns, RpcError,
    ServiceContract, SyncTerminal,
};

/// An asynchronous operation implementation.
pub type AsyncHandler =
    Arc<dyn Fn(Arguments) -> BoxFuture<'static, Result<Returns, RpcError>> + Send + Sync>;

/// A synchronous operation implementation.
pub type SyncHandler = Arc<dyn Fn(Arguments) -> Result<Returns, RpcError> + Send + Sync>;

/// A bound implementation.
#[derive(Clone)]
pub enum Handler {
    Async(AsyncHandler),
    Sync(SyncHandler),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Async(_) => f.write_str("Handler::Async"),
            Handler::Sync(_) => f.write_str("Handler::Sync"),
        }
    }
}

/// Implementations for the operations of one contract.
pub struct ServiceBinding {
    description: Arc<ContractDescription>,
    handlers: HashMap<MethodPath, Handler>,
    filters: FilterCollection,
    errors: Vec<ContractError>,
}

impl ServiceBinding {
    /// Binding for contract `C`, using its cached description.
    pub fn for_contract<C: ServiceContract + ?Sized>() -> Result<Self, ContractError> {
        Ok(Self::from_description(ContractDescription::of::<C>()?))
    }

    pub fn from_description(description: Arc<ContractDescription>) -> Self {
        Self {
            description,
            handlers: HashMap::new(),
            filters: FilterCollection::new(),
            errors: Vec::new(),
        }
    }

    /// Bind an async implementation to an operation (by operation or method name).
    pub fn on<F, Fut>(self, operation: &str, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Returns, RpcError>> + Send + 'static,
    {
        let handler: AsyncHandler =
            Arc::new(move |args: Arguments| -> BoxFuture<'static, Result<Returns, RpcError>> {
                Box::pin(handler(args))
            });
        self.bind(operation, Handler::Async(handler))
    }

    /// Bind a synchronous implementation. Only synchronous operations accept one.
    pub fn on_sync<F>(self, operation: &str, handler: F) -> Self
    where
        F: Fn(Arguments) -> Result<Returns, RpcError> + Send + Sync + 'static,
    {
        self.bind(operation, Handler::Sync(Arc::new(handler)))
    }

    /// Add a filter for this contract's operations only.
    pub fn filter<F: Filter + 'static>(mut self, priority: i32, filter: F) -> Self {
        self.filters.add(priority, filter);
        self
    }

    /// Add a per-call filter factory for this contract's operations only.
    pub fn filter_factory<F>(mut self, priority: i32, factory: F) -> Self
    where
        F: Fn(&OperationDescriptor) -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.add_factory(priority, factory);
        self
    }

    pub fn description(&self) -> &Arc<ContractDescription> {
        &self.description
    }

    pub(crate) fn into_parts(
        self,
    ) -> Result<(Arc<ContractDescription>, HashMap<MethodPath, Handler>, FilterCollection), ContractError>
    {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        Ok((self.description, self.handlers, self.filters))
    }

    fn bind(mut self, name: &str, handler: Handler) -> Self {
        let Some(operation) = self.description.find_by_name(name) else {
            self.errors
                .push(ContractError::UnknownOperation(name.to_string()));
            return self;
        };
        if matches!(handler, Handler::Sync(_)) && operation.is_async() {
            self.errors.push(ContractError::InvalidBinding {
                operation: operation.path().to_string(),
                reason: "synchronous handler bound to an asynchronous operation".to_string(),
            });
            return self;
        }
        let path = operation.path();
        self.handlers.insert(path, handler);
        self
    }
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("contract", &self.description.contract_name())
            .field("handlers", &self.handlers.len())
            .field("filters", &self.filters)
            .finish()
    }
}

// ============================================================================
// Pipeline Terminals
// ============================================================================

pub(crate) struct AsyncHandlerTerminal<'h>(pub(crate) &'h AsyncHandler);

impl AsyncTerminal for AsyncHandlerTerminal<'_> {
    fn call<'a>(&'a self, ctx: &'a mut FilterContext) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            let arguments = ctx.request_mut().arguments_mut().take_for_call();
            let returns = (self.0)(arguments).await?;
            ctx.response_mut().set_returns(returns);
            Ok(())
        })
    }
}

pub(crate) struct SyncHandlerTerminal<'h>(pub(crate) &'h SyncHandler);

impl SyncTerminal for SyncHandlerTerminal<'_> {
    fn call(&self, ctx: &mut FilterContext) -> Result<(), RpcError> {
        let arguments = ctx.request_mut().arguments_mut().take_for_call();
        let returns = (self.0)(arguments)?;
        ctx.response_mut().set_returns(returns);
        Ok(())
    }
}
