//! Contract-driven RPC client.
//!
//! This crate invokes operations of contracts described with
//! [`contractrpc_core`] over any [`CallTransport`], such as the in-process
//! `contractrpc::InMemoryChannel`.
//!
//! ## Features
//!
//! - Unary, client streaming, server streaming and duplex calls
//! - Lazy request and response streams, cancelled with the call
//! - Client-wide and per-service filters
//! - Typed fault details reconstructed from trailers
//! - Default and per-call timeouts and metadata
//!
//! ## Example
//!
//! ```ignore
//! use contractrpc_client::ContractClient;
//! use contractrpc_core::{Arguments, CallOptions};
//!
//! let client = ContractClient::builder(channel).build();
//! let calculator = client.proxy::<Calculator>()?;
//!
//! let sum: i32 = calculator
//!     .call("Add", Arguments::new().with_value(2).with_value(3))
//!     .await?
//!     .into_value()?;
//! ```
//!
//! ## Streaming Example
//!
//! ```ignore
//! use futures::TryStreamExt;
//!
//! let mut returns = calculator
//!     .call("Range", Arguments::new().with_value(10))
//!     .await?;
//! let values: Vec<i32> = returns.take_stream(0)?.into_typed::<i32>().try_collect().await?;
//! ```
//!
//! [`CallTransport`]: contractrpc_core::CallTransport

mod builder;
mod client;
mod fault;
mod invoker;
mod streaming;

pub use builder::ClientBuilder;
pub use client::{ContractClient, ServiceProxy};
pub use fault::{ClientFaultContext, ClientFaultHandler};
pub use streaming::Cancellable;

// Re-export the shared model
pub use contractrpc_core::{
    self as core, Arguments, CallOptions, CancellationToken, Code, FaultError, Returns, RpcError,
    ValueStream,
};
