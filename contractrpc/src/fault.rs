//! Server-side fault interception.
//!
//! Every error leaving a dispatched call, including errors inside a response
//! stream, goes through the [`FaultInterceptor`]. It finalizes at most one
//! fault per call; errors seen after that pass through unchanged.

use std::sync::Arc;

use contractrpc_core::{BoxedCodec, Fault, RpcError, ServerCallContext, Status};

/// Turns implementation errors into faults.
pub trait ServerFaultHandler: Send + Sync + 'static {
    /// Return `None` to re-raise the error as it is.
    fn provide_fault(&self, ctx: &ServerCallContext, error: &RpcError) -> Option<Fault>;
}

/// Produces no faults; errors are reported with their own code and message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFaultHandler;

impl ServerFaultHandler for DefaultFaultHandler {
    fn provide_fault(&self, _ctx: &ServerCallContext, _error: &RpcError) -> Option<Fault> {
        None
    }
}

/// A fault handler backed by a closure.
///
/// ```ignore
/// let handler = FnFaultHandler::new(|_ctx: &ServerCallContext, error: &RpcError| {
///     Some(Fault::new(Code::FailedPrecondition, error.to_string()))
/// });
/// ```
pub struct FnFaultHandler<F> {
    f: F,
}

impl<F> FnFaultHandler<F>
where
    F: Fn(&ServerCallContext, &RpcError) -> Option<Fault> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ServerFaultHandler for FnFaultHandler<F>
where
    F: Fn(&ServerCallContext, &RpcError) -> Option<Fault> + Send + Sync + 'static,
{
    fn provide_fault(&self, ctx: &ServerCallContext, error: &RpcError) -> Option<Fault> {
        (self.f)(ctx, error)
    }
}

impl<F> std::fmt::Debug for FnFaultHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFaultHandler").finish()
    }
}

/// The send side of the fault protocol.
#[derive(Clone)]
pub struct FaultInterceptor {
    handler: Arc<dyn ServerFaultHandler>,
    codec: BoxedCodec,
}

impl FaultInterceptor {
    pub fn new(handler: Arc<dyn ServerFaultHandler>, codec: BoxedCodec) -> Self {
        Self { handler, codec }
    }

    /// Finalize the error leaving a call.
    ///
    /// - already finalized for this call: unchanged
    /// - status errors: unchanged
    /// - cancellation: `Canceled`
    /// - otherwise: the handler's fault, or the error itself when it has none
    pub fn intercept(&self, ctx: &ServerCallContext, error: RpcError) -> RpcError {
        if !ctx.try_finalize_fault() {
            return error;
        }
        match error {
            RpcError::Status { .. } => error,
            RpcError::Cancelled => Status::cancelled("call cancelled").into(),
            other => match self.handler.provide_fault(ctx, &other) {
                Some(fault) => {
                    tracing::warn!(
                        path = %ctx.path(),
                        code = %fault.code(),
                        detail = fault.detail().map(|d| d.type_name()),
                        "fault produced: {}",
                        fault.message()
                    );
                    fault.into_error(&self.codec)
                }
                None => other,
            },
        }
    }
}

impl std::fmt::Debug for FaultInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInterceptor")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
