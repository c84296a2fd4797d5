//! # contractrpc
//!
//! Host service contracts described with [`contractrpc_core`].
//!
//! A contract type implements [`ServiceContract`]; its operations are bound to
//! implementations with a [`ServiceBinding`], and one or more bindings are
//! combined into a [`ServiceHost`]. The host decodes incoming calls, runs the
//! filter pipeline around each handler and turns handler errors into faults.
//!
//! ## Features
//!
//! - **All four call shapes:** unary, client streaming, server streaming and duplex.
//! - **Filters:** host-wide and per-contract, ordered by priority.
//! - **Faults:** a pluggable [`ServerFaultHandler`] maps implementation errors
//!   to a status code, message and typed detail carried in trailers.
//! - **Loopback transport:** [`InMemoryChannel`] serves a host in-process.
//!
//! ## Example
//!
//! ```rust,ignore
//! use contractrpc::prelude::*;
//!
//! struct Calculator;
//!
//! impl ServiceContract for Calculator {
//!     fn describe() -> InterfaceDescriptor {
//!         InterfaceDescriptor::service("ICalculator").method(
//!             MethodDescriptor::operation("Add")
//!                 .param::<i32>("a")
//!                 .param::<i32>("b")
//!                 .returns::<i32>(),
//!         )
//!     }
//! }
//!
//! let binding = ServiceBinding::for_contract::<Calculator>()?
//!     .on("Add", |args: Arguments| async move {
//!         Ok::<_, RpcError>(Returns::single(args.value_at::<i32>(0)? + args.value_at::<i32>(1)?))
//!     });
//! let host = ServiceHost::builder().service(binding)?.build();
//! let channel = InMemoryChannel::new(host);
//! ```

mod dispatch;
pub mod fault;
pub mod handler;
pub mod host;
pub mod memory;

pub use fault::{DefaultFaultHandler, FaultInterceptor, FnFaultHandler, ServerFaultHandler};
pub use handler::{AsyncHandler, Handler, ServiceBinding, SyncHandler};
pub use host::{ServiceHost, ServiceHostBuilder};
pub use memory::InMemoryChannel;

// Re-export the shared model
pub use contractrpc_core::{
    self as core, Arguments, CallOptions, Code, ContractError, Fault, FaultDetail, Filter,
    FilterContext, InterfaceDescriptor, MethodDescriptor, Returns, RpcError, ServerCallContext,
    ServiceContract, Status, ValueStream,
};
pub use futures;
pub use serde;

pub mod prelude {
    //! A prelude for `contractrpc` providing the most common types.
    pub use crate::fault::{FnFaultHandler, ServerFaultHandler};
    pub use crate::handler::ServiceBinding;
    pub use crate::host::ServiceHost;
    pub use crate::memory::InMemoryChannel;
    pub use contractrpc_core::{
        Arguments, AsyncNext, BoxFuture, Code, Fault, FaultDetail, Filter, FilterContext,
        InterfaceDescriptor, MethodDescriptor, Next, ReturnItemDescriptor, Returns, RpcError,
        ServerCallContext, ServiceContract, ValueStream,
    };
}
