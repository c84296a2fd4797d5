//! Service host and its builder.
//!
//! [`ServiceHostBuilder`] combines one or more [`ServiceBinding`]s with the
//! host-wide codec, filters and fault handler into an immutable
//! [`ServiceHost`]. Dispatch lives in [`crate::dispatch`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use contractrpc::{ServiceBinding, ServiceHost};
//!
//! let host = ServiceHost::builder()
//!     .filter(0, LoggingFilter)
//!     .service(calculator_binding)?
//!     .service(greeter_binding)?
//!     .build();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use contractrpc_core::{
    BoxedCodec, ContractError, Filter, FilterCollection, MethodPath, OperationDescriptor,
    PayloadCodec,
};

use crate::fault::{DefaultFaultHandler, FaultInterceptor, ServerFaultHandler};
use crate::handler::{Handler, ServiceBinding};

/// One hosted operation.
#[derive(Debug)]
pub(crate) struct Route {
    pub(crate) operation: Arc<OperationDescriptor>,
    pub(crate) handler: Option<Handler>,
    pub(crate) filters: FilterCollection,
}

/// An immutable set of hosted operations.
#[derive(Debug)]
pub struct ServiceHost {
    pub(crate) codec: BoxedCodec,
    pub(crate) fault_interceptor: FaultInterceptor,
    pub(crate) routes: HashMap<MethodPath, Route>,
}

impl ServiceHost {
    pub fn builder() -> ServiceHostBuilder {
        ServiceHostBuilder::new()
    }

    pub fn codec(&self) -> &BoxedCodec {
        &self.codec
    }

    /// Hosted paths, sorted.
    pub fn paths(&self) -> Vec<&MethodPath> {
        let mut paths: Vec<&MethodPath> = self.routes.keys().collect();
        paths.sort();
        paths
    }

    pub fn operation(&self, path: &MethodPath) -> Option<&Arc<OperationDescriptor>> {
        self.routes.get(path).map(|route| &route.operation)
    }

    /// Whether an implementation is bound to `path`.
    pub fn is_bound(&self, path: &MethodPath) -> bool {
        self.routes
            .get(path)
            .is_some_and(|route| route.handler.is_some())
    }
}

/// Builder for [`ServiceHost`].
pub struct ServiceHostBuilder {
    codec: BoxedCodec,
    filters: FilterCollection,
    fault_handler: Arc<dyn ServerFaultHandler>,
    bindings: Vec<(Arc<[Arc<OperationDescriptor>]>, HashMap<MethodPath, Handler>, FilterCollection)>,
}

impl Default for ServiceHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHostBuilder {
    pub fn new() -> Self {
        Self {
            codec: BoxedCodec::default(),
            filters: FilterCollection::new(),
            fault_handler: Arc::new(DefaultFaultHandler),
            bindings: Vec::new(),
        }
    }

    /// Payload codec. Defaults to JSON.
    pub fn codec<C: PayloadCodec>(mut self, codec: C) -> Self {
        self.codec = BoxedCodec::new(codec);
        self
    }

    /// Add a filter for every hosted operation.
    pub fn filter<F: Filter + 'static>(mut self, priority: i32, filter: F) -> Self {
        self.filters.add(priority, filter);
        self
    }

    /// Add a per-call filter factory for every hosted operation.
    pub fn filter_factory<F>(mut self, priority: i32, factory: F) -> Self
    where
        F: Fn(&OperationDescriptor) -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.add_factory(priority, factory);
        self
    }

    pub fn fault_handler<H: ServerFaultHandler>(mut self, handler: H) -> Self {
        self.fault_handler = Arc::new(handler);
        self
    }

    /// Host a contract.
    ///
    /// Fails with the binding's first deferred error, or when one of its
    /// paths is already hosted.
    pub fn service(mut self, binding: ServiceBinding) -> Result<Self, ContractError> {
        let (description, handlers, filters) = binding.into_parts()?;
        let operations: Arc<[Arc<OperationDescriptor>]> =
            description.operations().cloned().collect();
        for operation in operations.iter() {
            let path = operation.path();
            let taken = self
                .bindings
                .iter()
                .any(|(existing, _, _)| existing.iter().any(|op| op.path() == path));
            if taken {
                return Err(ContractError::InvalidBinding {
                    operation: path.to_string(),
                    reason: "path is already hosted".to_string(),
                });
            }
        }
        tracing::debug!(
            contract = description.contract_name(),
            operations = operations.len(),
            bound = handlers.len(),
            "contract hosted"
        );
        self.bindings.push((operations, handlers, filters));
        Ok(self)
    }

    pub fn build(self) -> ServiceHost {
        let mut routes = HashMap::new();
        for (operations, mut handlers, contract_filters) in self.bindings {
            for operation in operations.iter() {
                let path = operation.path();
                let mut filters = self.filters.clone();
                filters.extend(&contract_filters);
                let route = Route {
                    operation: operation.clone(),
                    handler: handlers.remove(&path),
                    filters,
                };
                routes.insert(path, route);
            }
        }
        ServiceHost {
            fault_interceptor: FaultInterceptor::new(self.fault_handler, self.codec.clone()),
            codec: self.codec,
            routes,
        }
    }
}

impl std::fmt::Debug for ServiceHostBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHostBuilder")
            .field("codec", &self.codec)
            .field("filters", &self.filters)
            .field("contracts", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contractrpc_core::{
        Arguments, InterfaceDescriptor, MethodDescriptor, Returns, RpcError, ServiceContract,
    };

    struct Echo;

    impl ServiceContract for Echo {
        fn describe() -> InterfaceDescriptor {
            InterfaceDescriptor::service("IEcho")
                .method(MethodDescriptor::operation("Say").param::<String>("text").returns::<String>())
                .method(MethodDescriptor::operation("Shout").param::<String>("text").returns::<String>())
        }
    }

    #[test]
    fn test_build_routes() {
        let binding = ServiceBinding::for_contract::<Echo>()
            .unwrap()
            .on("Say", |args: Arguments| async move {
                Ok::<_, RpcError>(Returns::single(args.value(0)?))
            });
        let host = ServiceHost::builder().service(binding).unwrap().build();

        let paths: Vec<String> = host.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/Echo/Say", "/Echo/Shout"]);
        assert!(host.is_bound(&MethodPath::new("Echo", "Say")));
        assert!(!host.is_bound(&MethodPath::new("Echo", "Shout")));
        assert_eq!(host.codec().name(), "json");
    }

    #[test]
    fn test_duplicate_contract_rejected() {
        let result = ServiceHost::builder()
            .service(ServiceBinding::for_contract::<Echo>().unwrap())
            .unwrap()
            .service(ServiceBinding::for_contract::<Echo>().unwrap());
        assert!(matches!(result, Err(ContractError::InvalidBinding { .. })));
    }
}
