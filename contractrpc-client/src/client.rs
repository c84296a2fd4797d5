//! Contract client implementation.
//!
//! This module provides [`ContractClient`], which invokes contract operations
//! over any [`CallTransport`], and [`ServiceProxy`], a view of the client
//! bound to one contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contractrpc_core::{
    Arguments, BoxedCodec, CallTransport, CancellationToken, ContractDescription,
    ContractError, FilterCollection, FilterContext, FilterPipeline, Metadata, OperationDescriptor,
    Returns, RpcError, ServiceContract, Status,
};

use crate::builder::ClientBuilder;
use crate::fault::FaultReceiver;
use crate::invoker::{CallInvoker, CallScope};

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn CallTransport>,
    pub(crate) codec: BoxedCodec,
    pub(crate) filters: FilterCollection,
    pub(crate) service_filters: HashMap<String, FilterCollection>,
    pub(crate) faults: FaultReceiver,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) default_metadata: Metadata,
}

/// Invokes contract operations over a transport.
///
/// Cheap to clone; clones share configuration.
///
/// # Example
///
/// ```ignore
/// use contractrpc_client::ContractClient;
///
/// let client = ContractClient::builder(channel).build();
/// let calculator = client.proxy::<Calculator>()?;
///
/// let sum: i32 = calculator
///     .call("Add", Arguments::new().with_value(2).with_value(3))
///     .await?
///     .into_value()?;
/// ```
#[derive(Clone)]
pub struct ContractClient {
    inner: Arc<ClientInner>,
}

impl ContractClient {
    pub fn builder<T: CallTransport>(transport: T) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn codec(&self) -> &BoxedCodec {
        &self.inner.codec
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout
    }

    /// A view of this client bound to contract `C`.
    pub fn proxy<C: ServiceContract + ?Sized>(&self) -> Result<ServiceProxy, ContractError> {
        Ok(ServiceProxy {
            client: self.clone(),
            description: ContractDescription::of::<C>()?,
        })
    }

    /// Invoke one operation.
    ///
    /// `arguments` holds one entry per declared parameter. Call options and
    /// cancellation are read from the call-context positions; metadata is the
    /// client default overlaid with the call's own.
    pub async fn invoke(
        &self,
        operation: &Arc<OperationDescriptor>,
        arguments: Arguments,
    ) -> Result<Returns, RpcError> {
        let options = arguments.options();
        let timeout = options
            .and_then(|o| o.get_timeout())
            .or(self.inner.default_timeout);
        let mut metadata = self.inner.default_metadata.clone();
        if let Some(options) = options {
            metadata.merge(options.get_metadata());
        }
        metadata.strip_reserved();
        let cancellation = arguments
            .cancellation()
            .unwrap_or_else(CancellationToken::new);

        let pipeline = self.pipeline(operation);
        tracing::debug!(
            path = %operation.path(),
            kind = %operation.kind(),
            filters = pipeline.len(),
            "invoking operation"
        );
        let invoker = CallInvoker::new(&self.inner, CallScope::new(cancellation, timeout));
        let mut ctx = FilterContext::new(operation.clone(), arguments, metadata);
        pipeline.invoke_async(&mut ctx, &invoker).await?;
        Ok(ctx.into_returns())
    }

    fn pipeline(&self, operation: &OperationDescriptor) -> FilterPipeline {
        match self.inner.service_filters.get(operation.service_name()) {
            Some(service_filters) => {
                let mut filters = self.inner.filters.clone();
                filters.extend(service_filters);
                filters.resolve(operation)
            }
            None => self.inner.filters.resolve(operation),
        }
    }
}

impl std::fmt::Debug for ContractClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractClient")
            .field("codec", &self.inner.codec)
            .field("filters", &self.inner.filters)
            .field("service_filters", &self.inner.service_filters.keys().collect::<Vec<_>>())
            .field("faults", &self.inner.faults)
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}

/// A [`ContractClient`] bound to one contract, calling operations by name.
#[derive(Clone, Debug)]
pub struct ServiceProxy {
    client: ContractClient,
    description: Arc<ContractDescription>,
}

impl ServiceProxy {
    pub fn description(&self) -> &Arc<ContractDescription> {
        &self.description
    }

    pub fn client(&self) -> &ContractClient {
        &self.client
    }

    /// Look up an exposed operation by operation or method name.
    pub fn operation(&self, name: &str) -> Option<&Arc<OperationDescriptor>> {
        self.description.find_by_name(name)
    }

    /// Invoke the operation named `name`.
    ///
    /// Methods the contract does not expose fail with `Unimplemented`.
    pub async fn call(&self, name: &str, arguments: Arguments) -> Result<Returns, RpcError> {
        let Some(operation) = self.operation(name) else {
            return Err(self.not_exposed(name));
        };
        self.client.invoke(operation, arguments).await
    }

    fn not_exposed(&self, name: &str) -> RpcError {
        let reason = self
            .description
            .not_supported()
            .iter()
            .find(|ns| ns.method.name() == name)
            .map(|ns| format!("{}.{name} is not exposed: {}", ns.interface_name, ns.reason));
        let message = reason.unwrap_or_else(|| {
            format!(
                "{} has no operation named {name}",
                self.description.contract_name()
            )
        });
        Status::unimplemented(message).into()
    }
}
