//! Receive side of the fault protocol.
//!
//! Every error produced by a call, including errors inside a response stream,
//! passes through [`FaultReceiver::intercept`]:
//!
//! 1. If the caller's cancellation token already fired, the result is
//!    [`RpcError::Cancelled`] and nothing else runs.
//! 2. A status error whose trailers carry both fault fields becomes
//!    [`RpcError::Fault`], with the detail resolved through the
//!    [`FaultDetailRegistry`].
//! 3. The optional [`ClientFaultHandler`] may replace the result.

use std::sync::Arc;

use contractrpc_core::{
    BoxedCodec, CancellationToken, FaultDetailRegistry, FaultError, OperationDescriptor, RpcError,
    read_fault_detail,
};

/// What a [`ClientFaultHandler`] sees.
#[derive(Debug)]
pub struct ClientFaultContext<'a> {
    pub operation: &'a OperationDescriptor,
    pub error: &'a RpcError,
}

/// Replaces call errors on the client.
///
/// # Example
///
/// ```ignore
/// struct HideInternals;
///
/// impl ClientFaultHandler for HideInternals {
///     fn process_fault(&self, ctx: &ClientFaultContext<'_>) -> Option<RpcError> {
///         (ctx.error.code() == Code::Internal)
///             .then(|| RpcError::status(Code::Unavailable, "try again later"))
///     }
/// }
/// ```
pub trait ClientFaultHandler: Send + Sync + 'static {
    /// `Some` replaces the error, `None` keeps it.
    fn process_fault(&self, ctx: &ClientFaultContext<'_>) -> Option<RpcError>;
}

impl<F> ClientFaultHandler for F
where
    F: Fn(&ClientFaultContext<'_>) -> Option<RpcError> + Send + Sync + 'static,
{
    fn process_fault(&self, ctx: &ClientFaultContext<'_>) -> Option<RpcError> {
        self(ctx)
    }
}

#[derive(Clone)]
pub(crate) struct FaultReceiver {
    registry: FaultDetailRegistry,
    handler: Option<Arc<dyn ClientFaultHandler>>,
    codec: BoxedCodec,
}

impl FaultReceiver {
    pub(crate) fn new(
        registry: FaultDetailRegistry,
        handler: Option<Arc<dyn ClientFaultHandler>>,
        codec: BoxedCodec,
    ) -> Self {
        Self {
            registry,
            handler,
            codec,
        }
    }

    pub(crate) fn intercept(
        &self,
        operation: &OperationDescriptor,
        cancellation: &CancellationToken,
        error: RpcError,
    ) -> RpcError {
        if cancellation.is_cancelled() {
            return RpcError::Cancelled;
        }
        let error = self.reconstruct(error);
        match &self.handler {
            Some(handler) => handler
                .process_fault(&ClientFaultContext {
                    operation,
                    error: &error,
                })
                .unwrap_or(error),
            None => error,
        }
    }

    fn reconstruct(&self, error: RpcError) -> RpcError {
        let RpcError::Status { status, trailers } = error else {
            return error;
        };
        let (detail_type, raw_detail) = match read_fault_detail(&trailers, &self.codec) {
            None => return RpcError::Status { status, trailers },
            Some(Err(e)) => {
                tracing::warn!(error = %e, "fault detail could not be decoded");
                return RpcError::Status { status, trailers };
            }
            Some(Ok(detail)) => detail,
        };
        let detail = match self.registry.resolve(&detail_type, &raw_detail) {
            None => {
                tracing::warn!(detail_type = %detail_type, "unknown fault detail type");
                None
            }
            Some(Err(e)) => {
                tracing::warn!(detail_type = %detail_type, error = %e, "fault detail has the wrong shape");
                None
            }
            Some(Ok(detail)) => Some(detail),
        };
        RpcError::Fault(FaultError::new(
            status,
            detail_type,
            raw_detail,
            detail,
            trailers,
        ))
    }
}

impl std::fmt::Debug for FaultReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultReceiver")
            .field("registry", &self.registry)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}
