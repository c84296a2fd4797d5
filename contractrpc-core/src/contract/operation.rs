use std::fmt;
use std::sync::Arc;

use super::descriptor::MethodDescriptor;
use crate::message::{MessageAccessor, MessageDescriptor};
use crate::stream::StreamDescriptor;
use crate::transport::MethodPath;

/// Wire call shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Duplex,
}

impl CallKind {
    pub fn from_streams(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => CallKind::Unary,
            (true, false) => CallKind::ClientStreaming,
            (false, true) => CallKind::ServerStreaming,
            (true, true) => CallKind::Duplex,
        }
    }

    pub fn has_request_stream(&self) -> bool {
        matches!(self, CallKind::ClientStreaming | CallKind::Duplex)
    }

    pub fn has_response_stream(&self) -> bool {
        matches!(self, CallKind::ServerStreaming | CallKind::Duplex)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallKind::Unary => "unary",
            CallKind::ClientStreaming => "client_streaming",
            CallKind::ServerStreaming => "server_streaming",
            CallKind::Duplex => "duplex",
        };
        f.write_str(name)
    }
}

/// One RPC operation, derived from a contract method.
///
/// Parameter indexes point into the method's parameter list; return indexes
/// point into its return items. Built once per contract and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub(crate) service_name: String,
    pub(crate) operation_name: String,
    pub(crate) kind: CallKind,
    pub(crate) is_async: bool,
    pub(crate) method: MethodDescriptor,

    pub(crate) request_header_indexes: Vec<usize>,
    pub(crate) request_body_indexes: Vec<usize>,
    pub(crate) request_stream_index: Option<usize>,
    pub(crate) context_indexes: Vec<usize>,

    pub(crate) response_names: Vec<String>,
    pub(crate) response_header_indexes: Vec<usize>,
    pub(crate) response_body_indexes: Vec<usize>,
    pub(crate) response_stream_index: Option<usize>,

    pub(crate) request_body: MessageDescriptor,
    pub(crate) request_header: Option<MessageDescriptor>,
    pub(crate) request_stream: Option<StreamDescriptor>,
    pub(crate) response_body: MessageDescriptor,
    pub(crate) response_header: Option<MessageDescriptor>,
    pub(crate) response_stream: Option<StreamDescriptor>,
}

impl OperationDescriptor {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn path(&self) -> MethodPath {
        MethodPath::new(&self.service_name, &self.operation_name)
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// Parameter names, in declaration order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.method.parameters().iter().map(|p| p.name())
    }

    pub fn parameter_count(&self) -> usize {
        self.method.parameters().len()
    }

    pub fn request_header_indexes(&self) -> &[usize] {
        &self.request_header_indexes
    }

    pub fn request_body_indexes(&self) -> &[usize] {
        &self.request_body_indexes
    }

    pub fn request_stream_index(&self) -> Option<usize> {
        self.request_stream_index
    }

    pub fn context_indexes(&self) -> &[usize] {
        &self.context_indexes
    }

    /// Return item names: `result` for a single return, tuple names otherwise.
    pub fn response_names(&self) -> &[String] {
        &self.response_names
    }

    pub fn response_arity(&self) -> usize {
        self.response_names.len()
    }

    pub fn response_header_indexes(&self) -> &[usize] {
        &self.response_header_indexes
    }

    pub fn response_body_indexes(&self) -> &[usize] {
        &self.response_body_indexes
    }

    pub fn response_stream_index(&self) -> Option<usize> {
        self.response_stream_index
    }

    pub fn request_body(&self) -> &MessageDescriptor {
        &self.request_body
    }

    pub fn request_header(&self) -> Option<&MessageDescriptor> {
        self.request_header.as_ref()
    }

    pub fn request_stream(&self) -> Option<&StreamDescriptor> {
        self.request_stream.as_ref()
    }

    pub fn response_body(&self) -> &MessageDescriptor {
        &self.response_body
    }

    pub fn response_header(&self) -> Option<&MessageDescriptor> {
        self.response_header.as_ref()
    }

    pub fn response_stream(&self) -> Option<&StreamDescriptor> {
        self.response_stream.as_ref()
    }

    pub fn request_body_accessor(&self) -> Arc<MessageAccessor> {
        MessageAccessor::for_descriptor(&self.request_body)
    }

    pub fn response_body_accessor(&self) -> Arc<MessageAccessor> {
        MessageAccessor::for_descriptor(&self.response_body)
    }

    pub fn request_header_accessor(&self) -> Option<Arc<MessageAccessor>> {
        self.request_header.as_ref().map(MessageAccessor::for_descriptor)
    }

    pub fn response_header_accessor(&self) -> Option<Arc<MessageAccessor>> {
        self.response_header.as_ref().map(MessageAccessor::for_descriptor)
    }
}

/// How serious a diagnostic is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// A message recorded while building a contract description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// A method that is not exposed, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotSupportedOperation {
    pub interface_name: String,
    pub method: MethodDescriptor,
    pub reason: String,
    pub severity: Severity,
}
