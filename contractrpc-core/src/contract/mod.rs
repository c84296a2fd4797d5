//! Contract analysis.
//!
//! [`ContractDescription::build`] expands a contract interface (plus every
//! interface it extends), classifies each method into an
//! [`OperationDescriptor`], and records methods that cannot be exposed as
//! [`NotSupportedOperation`]s instead of failing. [`ContractDescription::of`]
//! caches the result per contract type.

mod descriptor;
mod naming;
mod operation;

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

pub use descriptor::{
    InterfaceDescriptor, MethodDescriptor, ParameterDescriptor, ParameterType,
    ReturnItemDescriptor, ReturnShape, ServiceContract,
};
pub use naming::service_name;
pub use operation::{
    CallKind, Diagnostic, NotSupportedOperation, OperationDescriptor, Severity,
};

use crate::error::ContractError;
use crate::message::{MessageDescriptor, TypeDescriptor};
use crate::stream::StreamDescriptor;
use crate::transport::MethodPath;

/// A service discovered on a contract and its exposed operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescription {
    name: String,
    operations: Vec<Arc<OperationDescriptor>>,
}

impl ServiceDescription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[Arc<OperationDescriptor>] {
        &self.operations
    }
}

/// The analyzed form of a contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractDescription {
    contract_name: String,
    services: Vec<ServiceDescription>,
    not_supported: Vec<NotSupportedOperation>,
    diagnostics: Vec<Diagnostic>,
}

static CONTRACTS: OnceLock<RwLock<HashMap<TypeId, Arc<ContractDescription>>>> = OnceLock::new();

impl ContractDescription {
    /// The cached description of contract `C`, built on first use.
    pub fn of<C: ServiceContract + ?Sized>() -> Result<Arc<Self>, ContractError> {
        let contracts = CONTRACTS.get_or_init(Default::default);
        let id = TypeId::of::<C>();
        if let Some(found) = contracts.read().get(&id) {
            return Ok(found.clone());
        }
        let built = Arc::new(Self::build(&C::describe())?);
        Ok(contracts.write().entry(id).or_insert(built).clone())
    }

    /// Analyze a contract interface.
    ///
    /// Only structurally invalid input (an empty interface or method name)
    /// fails; methods that cannot be exposed are recorded as not supported.
    pub fn build(root: &InterfaceDescriptor) -> Result<Self, ContractError> {
        validate(root)?;

        let mut interfaces = Vec::new();
        expand(root, &mut HashSet::new(), &mut interfaces);

        let mut services: Vec<ServiceDescription> = Vec::new();
        let mut not_supported = Vec::new();
        let mut candidates: Vec<(usize, &InterfaceDescriptor, OperationDescriptor)> = Vec::new();

        for interface in interfaces {
            if !interface.is_service() {
                for method in interface.methods() {
                    not_supported.push(NotSupportedOperation {
                        interface_name: interface.name().to_string(),
                        method: method.clone(),
                        reason: format!("{} is not a service contract", interface.name()),
                        severity: Severity::Info,
                    });
                }
                continue;
            }

            let name = service_name(interface);
            let service_index = match services.iter().position(|s| s.name == name) {
                Some(index) => index,
                None => {
                    services.push(ServiceDescription {
                        name: name.clone(),
                        operations: Vec::new(),
                    });
                    services.len() - 1
                }
            };

            for method in interface.methods() {
                if !method.is_operation() {
                    not_supported.push(NotSupportedOperation {
                        interface_name: interface.name().to_string(),
                        method: method.clone(),
                        reason: "method is not marked as an operation".to_string(),
                        severity: Severity::Info,
                    });
                    continue;
                }
                match classify(&name, method) {
                    Ok(operation) => candidates.push((service_index, interface, operation)),
                    Err(reason) => not_supported.push(NotSupportedOperation {
                        interface_name: interface.name().to_string(),
                        method: method.clone(),
                        reason,
                        severity: Severity::Error,
                    }),
                }
            }
        }

        let mut declared: HashMap<MethodPath, usize> = HashMap::new();
        for (_, _, operation) in &candidates {
            *declared.entry(operation.path()).or_default() += 1;
        }
        for (service_index, interface, operation) in candidates {
            let path = operation.path();
            match declared.get(&path).copied().unwrap_or_default() {
                count if count > 1 => not_supported.push(NotSupportedOperation {
                    interface_name: interface.name().to_string(),
                    method: operation.method,
                    reason: format!("operation {path} is declared {count} times"),
                    severity: Severity::Error,
                }),
                _ => services[service_index].operations.push(Arc::new(operation)),
            }
        }

        let diagnostics: Vec<Diagnostic> = not_supported
            .iter()
            .map(|ns| Diagnostic {
                severity: ns.severity,
                message: format!(
                    "{}.{} is not exposed: {}",
                    ns.interface_name,
                    ns.method.name(),
                    ns.reason
                ),
            })
            .collect();
        for diagnostic in diagnostics.iter().filter(|d| d.severity == Severity::Error) {
            tracing::warn!(contract = %root.name(), "{}", diagnostic.message);
        }

        let description = Self {
            contract_name: root.name().to_string(),
            services,
            not_supported,
            diagnostics,
        };
        tracing::debug!(
            contract = %description.contract_name,
            services = description.services.len(),
            operations = description.operations().count(),
            not_supported = description.not_supported.len(),
            "contract description built"
        );
        Ok(description)
    }

    /// Name of the root interface.
    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn services(&self) -> &[ServiceDescription] {
        &self.services
    }

    pub fn not_supported(&self) -> &[NotSupportedOperation] {
        &self.not_supported
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Every exposed operation, service by service.
    pub fn operations(&self) -> impl Iterator<Item = &Arc<OperationDescriptor>> {
        self.services.iter().flat_map(|s| s.operations.iter())
    }

    pub fn find_operation(&self, service: &str, operation: &str) -> Option<&Arc<OperationDescriptor>> {
        self.operations()
            .find(|op| op.service_name() == service && op.operation_name() == operation)
    }

    /// Find an operation by wire operation name or method name, across services.
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<OperationDescriptor>> {
        self.operations()
            .find(|op| op.operation_name() == name)
            .or_else(|| self.operations().find(|op| op.method().name() == name))
    }
}

fn validate(interface: &InterfaceDescriptor) -> Result<(), ContractError> {
    if interface.name().trim().is_empty() {
        return Err(ContractError::InvalidInterface(
            "interface name is empty".to_string(),
        ));
    }
    if interface.methods().iter().any(|m| m.name().trim().is_empty()) {
        return Err(ContractError::InvalidInterface(format!(
            "{} declares a method with an empty name",
            interface.name()
        )));
    }
    interface.parents().iter().try_for_each(validate)
}

/// Root first, then inherited interfaces depth-first, each (name, generic args) once.
fn expand<'a>(
    interface: &'a InterfaceDescriptor,
    seen: &mut HashSet<(&'a str, &'a [TypeDescriptor])>,
    out: &mut Vec<&'a InterfaceDescriptor>,
) {
    if !seen.insert((interface.name(), interface.generic_args())) {
        return;
    }
    out.push(interface);
    for parent in interface.parents() {
        expand(parent, seen, out);
    }
}

#[derive(Default)]
struct ReturnItems {
    names: Vec<String>,
    header: Vec<(usize, TypeDescriptor)>,
    body: Vec<(usize, TypeDescriptor)>,
    stream: Option<(usize, TypeDescriptor)>,
}

fn classify_returns(shape: &ReturnShape) -> Result<ReturnItems, String> {
    let mut items = ReturnItems::default();
    match shape {
        ReturnShape::Unit => {}
        ReturnShape::Value(ty) => {
            items.names.push("result".to_string());
            items.body.push((0, ty.clone()));
        }
        ReturnShape::Stream(ty) => {
            items.names.push("result".to_string());
            items.stream = Some((0, ty.clone()));
        }
        ReturnShape::Tuple(tuple) => {
            let streams = tuple.iter().filter(|item| item.is_stream()).count();
            if streams > 1 {
                return Err("return tuple contains more than one stream".to_string());
            }
            for (index, item) in tuple.iter().enumerate() {
                items.names.push(
                    item.name()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Item{}", index + 1)),
                );
                let entry = (index, item.ty().clone());
                if item.is_stream() {
                    items.stream = Some(entry);
                } else if streams == 1 {
                    items.header.push(entry);
                } else {
                    items.body.push(entry);
                }
            }
        }
    }
    Ok(items)
}

fn classify(service_name: &str, method: &MethodDescriptor) -> Result<OperationDescriptor, String> {
    if method.is_generic() {
        return Err("generic methods are not supported".to_string());
    }

    let mut values: Vec<(usize, TypeDescriptor)> = Vec::new();
    let mut context_indexes = Vec::new();
    let mut request_stream: Option<(usize, TypeDescriptor)> = None;
    for (index, parameter) in method.parameters().iter().enumerate() {
        match parameter.ty() {
            ParameterType::CallContext | ParameterType::Cancellation => context_indexes.push(index),
            ParameterType::Stream(ty) => {
                if request_stream.is_some() {
                    return Err(format!(
                        "more than one stream parameter ('{}')",
                        parameter.name()
                    ));
                }
                request_stream = Some((index, ty.clone()));
            }
            ParameterType::Reference(_) => {
                return Err(format!(
                    "parameter '{}' is passed by reference, which is not supported",
                    parameter.name()
                ));
            }
            ParameterType::Value(ty) => values.push((index, ty.clone())),
        }
    }

    let returns = classify_returns(method.return_shape())?;
    if !method.is_async() && (request_stream.is_some() || returns.stream.is_some()) {
        return Err("synchronous methods cannot stream".to_string());
    }

    let (request_header, request_body) = if request_stream.is_some() {
        (values, Vec::new())
    } else {
        (Vec::new(), values)
    };

    Ok(OperationDescriptor {
        service_name: service_name.to_string(),
        operation_name: method.operation_name().to_string(),
        kind: CallKind::from_streams(request_stream.is_some(), returns.stream.is_some()),
        is_async: method.is_async(),
        method: method.clone(),

        request_header_indexes: indexes(&request_header),
        request_body_indexes: indexes(&request_body),
        request_stream_index: request_stream.as_ref().map(|(i, _)| *i),
        context_indexes,

        response_names: returns.names,
        response_header_indexes: indexes(&returns.header),
        response_body_indexes: indexes(&returns.body),
        response_stream_index: returns.stream.as_ref().map(|(i, _)| *i),

        request_body: envelope(&request_body),
        request_header: optional_envelope(&request_header),
        request_stream: request_stream.map(|(_, ty)| StreamDescriptor::new(ty)),
        response_body: envelope(&returns.body),
        response_header: optional_envelope(&returns.header),
        response_stream: returns.stream.map(|(_, ty)| StreamDescriptor::new(ty)),
    })
}

fn indexes(items: &[(usize, TypeDescriptor)]) -> Vec<usize> {
    items.iter().map(|(i, _)| *i).collect()
}

fn envelope(items: &[(usize, TypeDescriptor)]) -> MessageDescriptor {
    MessageDescriptor::new(items.iter().map(|(_, ty)| ty.clone()).collect())
}

fn optional_envelope(items: &[(usize, TypeDescriptor)]) -> Option<MessageDescriptor> {
    (!items.is_empty()).then(|| envelope(items))
}
