// In crates/discovery/src/resolver.rs

use async_trait::async_trait;

use core_types::ServiceInfo;

use crate::{Result, ServiceDiscovery};

/// Resolves a named downstream service to a live instance.
///
/// Consumers (the inter-service client manager, the configuration client)
/// depend on this trait rather than on the registry client directly, so tests
/// can substitute a stub resolver.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    /// Returns a live instance of `service_name`, or `None` on a discovery miss.
    async fn get_service(&self, service_name: &str) -> Result<Option<ServiceInfo>>;
}

#[async_trait]
impl ServiceResolver for ServiceDiscovery {
    async fn get_service(&self, service_name: &str) -> Result<Option<ServiceInfo>> {
        ServiceDiscovery::get_service(self, service_name).await
    }
}
