//! Status codes and the error type shared by every layer of a call.
//!
//! - [`Code`]: RPC status codes
//! - [`Status`]: terminal status of a call (code + message)
//! - [`RpcError`]: everything a call can fail with
//! - [`ContractError`]: structurally invalid contract input

use std::fmt;
use std::sync::Arc;

use crate::fault::FaultError;
use crate::metadata::Metadata;

/// RPC status codes, matching the canonical gRPC/Connect code table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a call as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

/// Everything a call can fail with.
///
/// Classification problems in a contract are never reported through this
/// type; they end up as diagnostics on the
/// [`ContractDescription`](crate::contract::ContractDescription).
#[derive(Clone, Debug, thiserror::Error)]
pub enum RpcError {
    /// Terminal status reported by the transport, with its trailing metadata.
    #[error("{status}")]
    Status { status: Status, trailers: Metadata },

    /// Application fault reconstructed on the receiving side.
    #[error("{0}")]
    Fault(FaultError),

    /// The call's cancellation signal fired.
    #[error("call cancelled")]
    Cancelled,

    /// Payload encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value or stream did not have the declared type.
    #[error("invalid cast: expected {expected}, got {actual}")]
    InvalidCast { expected: String, actual: String },

    /// Malformed call shape (missing header envelope, wrong arity, unknown slot).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A filter misused the pipeline.
    #[error("filter pipeline error: {0}")]
    Pipeline(String),

    /// Raised by a service implementation.
    #[error("{0}")]
    Application(Arc<dyn std::error::Error + Send + Sync>),
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        RpcError::Status {
            status,
            trailers: Metadata::new(),
        }
    }
}

impl RpcError {
    /// Terminal status without trailers.
    pub fn status<S: Into<String>>(code: Code, message: S) -> Self {
        Status::new(code, message).into()
    }

    /// Wrap an implementation error.
    pub fn application<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RpcError::Application(Arc::new(error))
    }

    /// Wrap an implementation error given as a plain message.
    pub fn application_message<S: Into<String>>(message: S) -> Self {
        RpcError::Application(Arc::new(ApplicationMessage(message.into())))
    }

    /// The code a transport would report for this error.
    ///
    /// - Status/Fault: their own code
    /// - Cancelled: `Canceled`
    /// - Protocol: `InvalidArgument`
    /// - Application: `Unknown`
    /// - everything else: `Internal`
    pub fn code(&self) -> Code {
        match self {
            RpcError::Status { status, .. } => status.code(),
            RpcError::Fault(fault) => fault.code(),
            RpcError::Cancelled => Code::Canceled,
            RpcError::Protocol(_) => Code::InvalidArgument,
            RpcError::Application(_) => Code::Unknown,
            RpcError::Encode(_)
            | RpcError::Decode(_)
            | RpcError::InvalidCast { .. }
            | RpcError::Pipeline(_) => Code::Internal,
        }
    }

    /// Whether this error is a cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }

    /// Convert into a terminal status error, keeping trailers if present.
    pub fn into_status_error(self) -> RpcError {
        match self {
            RpcError::Status { .. } => self,
            RpcError::Fault(fault) => RpcError::Status {
                status: fault.status().clone(),
                trailers: fault.trailers().clone(),
            },
            other => {
                let code = other.code();
                RpcError::status(code, other.to_string())
            }
        }
    }
}

#[derive(Debug)]
struct ApplicationMessage(String);

impl fmt::Display for ApplicationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ApplicationMessage {}

/// Structurally invalid contract input.
///
/// Individual bad operations never produce this error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("invalid interface: {0}")]
    InvalidInterface(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid binding for {operation}: {reason}")]
    InvalidBinding { operation: String, reason: String },
}
