//! Filter pipeline.
//!
//! Filters wrap the real call: the call invoker on the client, the handler on
//! the server. Each filter receives the [`FilterContext`] and a continuation
//! ([`Next`] or [`AsyncNext`]). The continuation is consumed when run, so a
//! filter calls the rest of the chain at most once. A filter may also return
//! without calling it, but must then provide the response itself
//! ([`ResponseContext::mark_provided`]).
//!
//! # Example
//!
//! ```ignore
//! use contractrpc_core::{AsyncNext, BoxFuture, Filter, FilterContext, Next, RpcError};
//!
//! struct Timing;
//!
//! impl Filter for Timing {
//!     fn invoke(&self, ctx: &mut FilterContext, next: Next<'_>) -> Result<(), RpcError> {
//!         let start = std::time::Instant::now();
//!         let result = next.run(ctx);
//!         tracing::info!(elapsed = ?start.elapsed(), "call finished");
//!         result
//!     }
//!
//!     fn invoke_async<'a>(
//!         &'a self,
//!         ctx: &'a mut FilterContext,
//!         next: AsyncNext<'a>,
//!     ) -> BoxFuture<'a, Result<(), RpcError>> {
//!         Box::pin(async move {
//!             let start = std::time::Instant::now();
//!             let result = next.run(ctx).await;
//!             tracing::info!(elapsed = ?start.elapsed(), "call finished");
//!             result
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::call::{Argument, Arguments, ReturnValue, Returns};
use crate::contract::OperationDescriptor;
use crate::error::RpcError;
use crate::message::Value;
use crate::metadata::Metadata;
use crate::options::ServerCallContext;
use crate::stream::ValueStream;
use crate::transport::BoxFuture;

static NULL: Value = Value::Null;

// ============================================================================
// Filter Trait
// ============================================================================

/// A filter around the real call.
///
/// Synchronous operations run through [`invoke`](Filter::invoke), everything
/// else through [`invoke_async`](Filter::invoke_async).
pub trait Filter: Send + Sync {
    fn invoke(&self, ctx: &mut FilterContext, next: Next<'_>) -> Result<(), RpcError>;

    fn invoke_async<'a>(
        &'a self,
        ctx: &'a mut FilterContext,
        next: AsyncNext<'a>,
    ) -> BoxFuture<'a, Result<(), RpcError>>;
}

/// The innermost step of a synchronous pipeline.
pub trait SyncTerminal: Send + Sync {
    fn call(&self, ctx: &mut FilterContext) -> Result<(), RpcError>;
}

impl<F> SyncTerminal for F
where
    F: Fn(&mut FilterContext) -> Result<(), RpcError> + Send + Sync,
{
    fn call(&self, ctx: &mut FilterContext) -> Result<(), RpcError> {
        self(ctx)
    }
}

/// The innermost step of an asynchronous pipeline.
pub trait AsyncTerminal: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut FilterContext) -> BoxFuture<'a, Result<(), RpcError>>;
}

// ============================================================================
// Continuations
// ============================================================================

/// The rest of a synchronous chain.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    terminal: &'a dyn SyncTerminal,
}

impl<'a> Next<'a> {
    /// Run the remaining filters and the terminal.
    pub fn run(self, ctx: &mut FilterContext) -> Result<(), RpcError> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.invoke(
                ctx,
                Next {
                    filters: rest,
                    terminal: self.terminal,
                },
            ),
            None => {
                ctx.state = CallState::Called;
                self.terminal.call(ctx)?;
                ctx.state = CallState::Completed;
                Ok(())
            }
        }
    }
}

/// The rest of an asynchronous chain.
pub struct AsyncNext<'a> {
    filters: &'a [Arc<dyn Filter>],
    terminal: &'a dyn AsyncTerminal,
}

impl<'a> AsyncNext<'a> {
    /// Run the remaining filters and the terminal.
    ///
    /// The context is reborrowed, so a filter can keep using it once the
    /// returned future completes.
    pub fn run<'b>(self, ctx: &'b mut FilterContext) -> BoxFuture<'b, Result<(), RpcError>>
    where
        'a: 'b,
    {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.invoke_async(
                ctx,
                AsyncNext {
                    filters: rest,
                    terminal: self.terminal,
                },
            ),
            None => {
                let terminal = self.terminal;
                Box::pin(async move {
                    ctx.state = CallState::Called;
                    terminal.call(ctx).await?;
                    ctx.state = CallState::Completed;
                    Ok(())
                })
            }
        }
    }
}

// ============================================================================
// Filter Context
// ============================================================================

/// Progress of the real call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    NotCalled,
    Called,
    Completed,
}

/// Request side of a call, addressed by parameter name.
pub struct RequestContext {
    operation: Arc<OperationDescriptor>,
    arguments: Arguments,
}

impl RequestContext {
    /// Parameter names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operation.parameter_names()
    }

    pub fn len(&self) -> usize {
        self.operation.parameter_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.operation.parameter_names().position(|n| n == name)
    }

    /// The value of a parameter. `None` for unknown names and non-value parameters.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.arguments.get(self.index_of(name)?) {
            Some(Argument::Value(value)) => Some(value),
            Some(Argument::Empty) | None => Some(&NULL),
            Some(_) => None,
        }
    }

    pub fn value_at<T: DeserializeOwned>(&self, name: &str) -> Result<T, RpcError> {
        let index = self.require(name)?;
        self.arguments.value_at(index)
    }

    /// Replace the value of a value parameter.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RpcError> {
        let index = self.require(name)?;
        let is_value = self.operation.request_body_indexes().contains(&index)
            || self.operation.request_header_indexes().contains(&index);
        if !is_value {
            return Err(RpcError::Protocol(format!("parameter '{name}' is not a value")));
        }
        self.arguments.set(index, Argument::Value(value.into()));
        Ok(())
    }

    /// Take the request stream out, leaving the slot empty.
    pub fn take_stream(&mut self) -> Result<ValueStream, RpcError> {
        let index = self.stream_index()?;
        self.arguments.take_stream(index)
    }

    /// Replace the request stream. The new stream must have the declared element type.
    pub fn set_stream(&mut self, stream: ValueStream) -> Result<(), RpcError> {
        let index = self.stream_index()?;
        if let Some(descriptor) = self.operation.request_stream() {
            descriptor.validate(&stream)?;
        }
        self.arguments.set(index, Argument::Stream(stream));
        Ok(())
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Arguments {
        &mut self.arguments
    }

    fn require(&self, name: &str) -> Result<usize, RpcError> {
        self.index_of(name)
            .ok_or_else(|| RpcError::Protocol(format!("unknown parameter '{name}'")))
    }

    fn stream_index(&self) -> Result<usize, RpcError> {
        self.operation
            .request_stream_index()
            .ok_or_else(|| RpcError::Protocol("operation has no request stream".to_string()))
    }
}

impl Index<&str> for RequestContext {
    type Output = Value;

    /// # Panics
    ///
    /// Panics if `name` is not a value parameter.
    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(value) => value,
            None => panic!("no value parameter named '{name}'"),
        }
    }
}

/// Response side of a call, addressed by return-item name.
pub struct ResponseContext {
    operation: Arc<OperationDescriptor>,
    returns: Returns,
    provided: bool,
}

impl ResponseContext {
    /// Return item names, in declaration order.
    pub fn names(&self) -> &[String] {
        self.operation.response_names()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    /// The value of a return item. `None` for unknown names and streams.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.returns.get(self.index_of(name)?) {
            Some(ReturnValue::Value(value)) => Some(value),
            Some(ReturnValue::Empty) | None => Some(&NULL),
            Some(ReturnValue::Stream(_)) => None,
        }
    }

    pub fn value_at<T: DeserializeOwned>(&self, name: &str) -> Result<T, RpcError> {
        let index = self.require(name)?;
        self.returns.value_at(index)
    }

    /// Replace the value of a return item.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RpcError> {
        let index = self.require(name)?;
        if self.operation.response_stream_index() == Some(index) {
            return Err(RpcError::Protocol(format!("return item '{name}' is a stream")));
        }
        self.returns.set(index, ReturnValue::Value(value.into()));
        Ok(())
    }

    /// Take the response stream out, leaving the slot empty.
    pub fn take_stream(&mut self) -> Result<ValueStream, RpcError> {
        let index = self.stream_index()?;
        self.returns.take_stream(index)
    }

    /// Replace the response stream. The new stream must have the declared element type.
    pub fn set_stream(&mut self, stream: ValueStream) -> Result<(), RpcError> {
        let index = self.stream_index()?;
        if let Some(descriptor) = self.operation.response_stream() {
            descriptor.validate(&stream)?;
        }
        self.returns.set(index, ReturnValue::Stream(stream));
        Ok(())
    }

    pub fn returns(&self) -> &Returns {
        &self.returns
    }

    pub fn returns_mut(&mut self) -> &mut Returns {
        &mut self.returns
    }

    /// Replace every result at once.
    pub fn set_returns(&mut self, returns: Returns) {
        self.returns = returns;
    }

    pub fn take_returns(&mut self) -> Returns {
        std::mem::take(&mut self.returns)
    }

    /// Declare the response complete without running the real call.
    pub fn mark_provided(&mut self) {
        self.provided = true;
    }

    pub fn is_provided(&self) -> bool {
        self.provided
    }

    fn require(&self, name: &str) -> Result<usize, RpcError> {
        self.index_of(name)
            .ok_or_else(|| RpcError::Protocol(format!("unknown return item '{name}'")))
    }

    fn stream_index(&self) -> Result<usize, RpcError> {
        self.operation
            .response_stream_index()
            .ok_or_else(|| RpcError::Protocol("operation has no response stream".to_string()))
    }
}

impl Index<&str> for ResponseContext {
    type Output = Value;

    /// # Panics
    ///
    /// Panics if `name` is not a value return item.
    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(value) => value,
            None => panic!("no value return item named '{name}'"),
        }
    }
}

/// Everything a filter can see and change about one call.
pub struct FilterContext {
    operation: Arc<OperationDescriptor>,
    request: RequestContext,
    response: ResponseContext,
    state: CallState,
    metadata: Metadata,
    server_context: Option<ServerCallContext>,
}

impl FilterContext {
    pub fn new(operation: Arc<OperationDescriptor>, arguments: Arguments, metadata: Metadata) -> Self {
        Self {
            request: RequestContext {
                operation: operation.clone(),
                arguments,
            },
            response: ResponseContext {
                operation: operation.clone(),
                returns: Returns::unit(),
                provided: false,
            },
            operation,
            state: CallState::NotCalled,
            metadata,
            server_context: None,
        }
    }

    pub fn with_server_context(mut self, server_context: ServerCallContext) -> Self {
        self.server_context = Some(server_context);
        self
    }

    pub fn operation(&self) -> &Arc<OperationDescriptor> {
        &self.operation
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestContext {
        &mut self.request
    }

    pub fn response(&self) -> &ResponseContext {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseContext {
        &mut self.response
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Request metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Present on the server side only.
    pub fn server_context(&self) -> Option<&ServerCallContext> {
        self.server_context.as_ref()
    }

    /// Take the final results out of the context.
    pub fn into_returns(self) -> Returns {
        self.response.returns
    }
}

impl fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterContext")
            .field("operation", &self.operation.path())
            .field("state", &self.state)
            .field("provided", &self.response.provided)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registration and Resolution
// ============================================================================

/// Builds the filter instance for one call of an operation.
pub type FilterFactory = Arc<dyn Fn(&OperationDescriptor) -> Arc<dyn Filter> + Send + Sync>;

/// Ordered `(priority, factory)` registrations.
///
/// Lower priorities run further out. Equal priorities keep registration order.
#[derive(Clone, Default)]
pub struct FilterCollection {
    registrations: Vec<(i32, FilterFactory)>,
}

impl FilterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared filter instance.
    pub fn add<F: Filter + 'static>(&mut self, priority: i32, filter: F) {
        self.add_shared(priority, Arc::new(filter));
    }

    pub fn add_shared(&mut self, priority: i32, filter: Arc<dyn Filter>) {
        self.add_factory(priority, move |_| filter.clone());
    }

    /// Register a factory invoked for every call.
    pub fn add_factory<F>(&mut self, priority: i32, factory: F)
    where
        F: Fn(&OperationDescriptor) -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.registrations.push((priority, Arc::new(factory)));
    }

    /// Append every registration of `other`, after the existing ones.
    pub fn extend(&mut self, other: &FilterCollection) {
        self.registrations.extend(other.registrations.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Order the registrations and instantiate the filters for one call.
    pub fn resolve(&self, operation: &OperationDescriptor) -> FilterPipeline {
        let mut ordered: Vec<&(i32, FilterFactory)> = self.registrations.iter().collect();
        ordered.sort_by_key(|(priority, _)| *priority);
        let filters: Vec<Arc<dyn Filter>> =
            ordered.into_iter().map(|(_, factory)| factory(operation)).collect();
        tracing::debug!(
            path = %operation.path(),
            filters = filters.len(),
            "filter pipeline resolved"
        );
        FilterPipeline { filters }
    }
}

impl fmt::Debug for FilterCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let priorities: Vec<i32> = self.registrations.iter().map(|(p, _)| *p).collect();
        f.debug_struct("FilterCollection")
            .field("priorities", &priorities)
            .finish()
    }
}

/// Resolved filters for one call, outermost first.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterPipeline {
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the synchronous chain around `terminal`.
    pub fn invoke(&self, ctx: &mut FilterContext, terminal: &dyn SyncTerminal) -> Result<(), RpcError> {
        Next {
            filters: &self.filters,
            terminal,
        }
        .run(ctx)?;
        ensure_response(ctx)
    }

    /// Run the asynchronous chain around `terminal`.
    pub async fn invoke_async(
        &self,
        ctx: &mut FilterContext,
        terminal: &dyn AsyncTerminal,
    ) -> Result<(), RpcError> {
        AsyncNext {
            filters: &self.filters,
            terminal,
        }
        .run(ctx)
        .await?;
        ensure_response(ctx)
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filters", &self.filters.len())
            .finish()
    }
}

fn ensure_response(ctx: &FilterContext) -> Result<(), RpcError> {
    if ctx.state == CallState::NotCalled && !ctx.response.provided {
        return Err(RpcError::Pipeline(format!(
            "a filter on {} returned without calling next or providing a response",
            ctx.operation.path()
        )));
    }
    Ok(())
}
