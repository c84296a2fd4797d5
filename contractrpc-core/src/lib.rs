//! Core types for contractrpc.
//!
//! This crate provides the contract model and call machinery shared by the
//! server (`contractrpc`) and client (`contractrpc-client`) crates.
//!
//! ## Modules
//!
//! - [`contract`]: Contract registration DSL and the contract description builder
//! - [`message`]: Message envelopes and interned accessors
//! - [`stream`]: Streamed sequences and stream descriptors
//! - [`codec`]: Payload codec trait and the JSON codec
//! - [`call`]: Positional call arguments and results
//! - [`filter`]: Filter pipeline
//! - [`fault`]: Fault model carried in trailing metadata
//! - [`transport`]: Transport primitive for the four call shapes
//! - [`error`]: Status codes and error types
//! - [`metadata`]: Call headers and trailers
//! - [`options`]: Per-call options and server call context

pub mod call;
pub mod codec;
pub mod contract;
pub mod error;
pub mod fault;
pub mod filter;
pub mod message;
pub mod metadata;
pub mod options;
pub mod stream;
pub mod transport;

pub use call::*;
pub use codec::*;
pub use contract::*;
pub use error::*;
pub use fault::*;
pub use filter::*;
pub use message::*;
pub use metadata::*;
pub use options::*;
pub use stream::*;
pub use transport::*;

pub use tokio_util::sync::CancellationToken;
