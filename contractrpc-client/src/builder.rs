//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`ContractClient`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contractrpc_core::{
    BoxedCodec, CallTransport, ContractDescription, ContractError, FaultDetailRegistry, Filter,
    FilterCollection, Metadata, OperationDescriptor, PayloadCodec, RpcError, ServiceContract,
};
use serde::de::DeserializeOwned;

use crate::client::{ClientInner, ContractClient};
use crate::fault::{ClientFaultHandler, FaultReceiver};

/// Builder for creating a [`ContractClient`].
///
/// # Example
///
/// ```ignore
/// use contractrpc_client::ContractClient;
/// use std::time::Duration;
///
/// let client = ContractClient::builder(channel)
///     .timeout(Duration::from_secs(5))
///     .header("x-tenant", "acme")?
///     .filter(0, Logging)
///     .fault_detail::<QuotaExceeded>()
///     .build();
/// ```
pub struct ClientBuilder {
    transport: Arc<dyn CallTransport>,
    codec: BoxedCodec,
    filters: FilterCollection,
    service_filters: HashMap<String, FilterCollection>,
    registry: FaultDetailRegistry,
    fault_handler: Option<Arc<dyn ClientFaultHandler>>,
    /// Default timeout for every call. Call options override it.
    default_timeout: Option<Duration>,
    /// Metadata sent with every call. Call options add to it.
    default_metadata: Metadata,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("codec", &self.codec)
            .field("filters", &self.filters)
            .field("service_filters", &self.service_filters.keys().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .field("fault_handler", &self.fault_handler.is_some())
            .field("default_timeout", &self.default_timeout)
            .field("default_metadata", &self.default_metadata)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder over the given transport.
    pub fn new<T: CallTransport>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            codec: BoxedCodec::default(),
            filters: FilterCollection::new(),
            service_filters: HashMap::new(),
            registry: FaultDetailRegistry::new(),
            fault_handler: None,
            default_timeout: None,
            default_metadata: Metadata::new(),
        }
    }

    /// Payload codec. Must match the server's. Defaults to JSON.
    pub fn codec<C: PayloadCodec>(mut self, codec: C) -> Self {
        self.codec = BoxedCodec::new(codec);
        self
    }

    /// Add a filter around every call.
    pub fn filter<F: Filter + 'static>(mut self, priority: i32, filter: F) -> Self {
        self.filters.add(priority, filter);
        self
    }

    /// Add a per-call filter factory around every call.
    pub fn filter_factory<F>(mut self, priority: i32, factory: F) -> Self
    where
        F: Fn(&OperationDescriptor) -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.add_factory(priority, factory);
        self
    }

    /// Add a filter around calls to one service, by wire service name.
    pub fn service_filter<F: Filter + 'static>(
        mut self,
        service: impl Into<String>,
        priority: i32,
        filter: F,
    ) -> Self {
        self.service_filters
            .entry(service.into())
            .or_default()
            .add(priority, filter);
        self
    }

    /// Add a filter around calls to every service of contract `C`.
    pub fn contract_filter<C, F>(mut self, priority: i32, filter: F) -> Result<Self, ContractError>
    where
        C: ServiceContract + ?Sized,
        F: Filter + 'static,
    {
        let description = ContractDescription::of::<C>()?;
        let filter: Arc<dyn Filter> = Arc::new(filter);
        for service in description.services() {
            self.service_filters
                .entry(service.name().to_string())
                .or_default()
                .add_shared(priority, filter.clone());
        }
        Ok(self)
    }

    /// Handler that may replace call errors.
    pub fn fault_handler<H: ClientFaultHandler>(mut self, handler: H) -> Self {
        self.fault_handler = Some(Arc::new(handler));
        self
    }

    /// Resolve fault details named after `T` into typed values.
    pub fn fault_detail<T>(mut self) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.registry.register::<T>();
        self
    }

    /// Resolve fault details named `type_name` into `T`.
    pub fn fault_detail_as<T>(mut self, type_name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.registry.register_as::<T>(type_name);
        self
    }

    /// Default timeout for every call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Metadata entry sent with every call.
    pub fn header(mut self, key: &str, value: &str) -> Result<Self, RpcError> {
        self.default_metadata.insert(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> ContractClient {
        ContractClient::from_inner(ClientInner {
            faults: FaultReceiver::new(self.registry, self.fault_handler, self.codec.clone()),
            transport: self.transport,
            codec: self.codec,
            filters: self.filters,
            service_filters: self.service_filters,
            default_timeout: self.default_timeout,
            default_metadata: self.default_metadata,
        })
    }
}
