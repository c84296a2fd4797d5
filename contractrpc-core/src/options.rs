//! Per-call configuration.
//!
//! - [`CallOptions`]: client-side settings for one call (timeout, metadata, cancellation)
//! - [`ServerCallContext`]: what a server-side implementation can see about the current call

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::metadata::Metadata;
use crate::transport::MethodPath;

/// Options for configuring an individual call.
///
/// Passed to an operation through its call-context parameter.
///
/// # Example
///
/// ```ignore
/// use contractrpc_core::{Arguments, CallOptions};
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("authorization", "Bearer token123")?;
///
/// let args = Arguments::new().with_value(1).with_options(options);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    metadata: Metadata,
    cancellation: Option<CancellationToken>,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for this call. Overrides the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add a text metadata entry.
    ///
    /// Keys under the reserved `x-call-` and `x-fault-` prefixes are
    /// overwritten by the engine.
    pub fn header(mut self, key: &str, value: &str) -> Result<Self, RpcError> {
        self.metadata.insert(key, value)?;
        Ok(self)
    }

    /// Replace all metadata for this call.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Cancel the call when this token fires.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn get_cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }
}

/// Server-side view of the call being handled.
#[derive(Debug, Clone)]
pub struct ServerCallContext {
    path: MethodPath,
    metadata: Metadata,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    fault_finalized: Arc<AtomicBool>,
}

impl ServerCallContext {
    pub fn new(
        path: MethodPath,
        metadata: Metadata,
        cancellation: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            path,
            metadata,
            cancellation,
            deadline,
            fault_finalized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &MethodPath {
        &self.path
    }

    /// Request metadata, with engine-reserved entries removed.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Claim the right to finalize this call's fault.
    ///
    /// Returns `true` exactly once per call; clones share the marker.
    pub fn try_finalize_fault(&self) -> bool {
        !self.fault_finalized.swap(true, Ordering::AcqRel)
    }
}
