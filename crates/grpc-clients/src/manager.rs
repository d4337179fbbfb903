// In crates/grpc-clients/src/manager.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

use app_config::Settings;
use discovery::ServiceResolver;

use crate::client::ClientStats;
use crate::error::{Error, Result};
use crate::pool::ChannelPool;
use crate::test_coordinator::TestCoordinatorClient;
use crate::trading_engine::TradingEngineClient;

/// Single entry point for obtaining ready-to-use downstream clients.
///
/// Clients are created lazily on first request, resolved through the service
/// registry when one is configured (or the static fallback endpoints
/// otherwise), connected, and cached. Teardown is centralized here: clients
/// only flag themselves disconnected, and `cleanup` drops the shared channel
/// pool.
pub struct InterServiceClientManager {
    settings: Arc<Settings>,
    resolver: Option<Arc<dyn ServiceResolver>>,
    pool: Arc<ChannelPool>,
    trading: Mutex<Option<Arc<TradingEngineClient>>>,
    coordinator: Mutex<Option<Arc<TestCoordinatorClient>>>,
    connection_pool_size: AtomicUsize,
    initialized_at: std::sync::Mutex<Option<Instant>>,
}

/// Pool-wide statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub uptime_seconds: f64,
    pub active_clients: usize,
    pub connection_pool_size: usize,
    pub total_channels: usize,
    pub client_stats: HashMap<String, ClientStats>,
}

impl InterServiceClientManager {
    pub fn new(
        settings: Arc<Settings>,
        resolver: Option<Arc<dyn ServiceResolver>>,
        pool: Arc<ChannelPool>,
    ) -> Self {
        Self {
            settings,
            resolver,
            pool,
            trading: Mutex::new(None),
            coordinator: Mutex::new(None),
            connection_pool_size: AtomicUsize::new(0),
            initialized_at: std::sync::Mutex::new(None),
        }
    }

    /// Records the uptime baseline. Clients are created on demand, never here.
    pub fn initialize(&self) {
        tracing::info!("Initializing inter-service client manager");
        *self.started_at() = Some(Instant::now());
    }

    fn started_at(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.initialized_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves a target's gRPC endpoint.
    ///
    /// `use_fallback = true` explicitly bypasses discovery; a manager without
    /// a configured resolver always uses the static fallback. Transient
    /// discovery errors propagate as connection failures rather than silently
    /// falling back.
    async fn resolve_endpoint(
        &self,
        service_name: &str,
        fallback: (String, u16),
        use_fallback: bool,
    ) -> Result<(String, u16)> {
        match &self.resolver {
            Some(resolver) if !use_fallback => {
                let info = resolver
                    .get_service(service_name)
                    .await
                    .map_err(|e| Error::ConnectionFailed(e.to_string()))?
                    .ok_or_else(|| Error::ServiceNotFound(service_name.to_string()))?;
                Ok((info.host, info.grpc_port))
            }
            _ => Ok(fallback),
        }
    }

    /// Gets or creates the trading engine client.
    pub async fn get_trading_engine_client(
        &self,
        use_fallback: bool,
    ) -> Result<Arc<TradingEngineClient>> {
        let mut slot = self.trading.lock().await;
        if let Some(client) = slot.as_ref() {
            if client.is_connected() {
                return Ok(Arc::clone(client));
            }
        }

        let (host, port) = self
            .resolve_endpoint(
                TradingEngineClient::SERVICE_NAME,
                (
                    self.settings.fallback.trading_engine_host.clone(),
                    self.settings.fallback.trading_engine_grpc_port,
                ),
                use_fallback,
            )
            .await?;

        let client = Arc::new(TradingEngineClient::new(
            &host,
            port,
            Arc::clone(&self.pool),
            &self.settings.grpc,
        ));
        client.connect().await.map_err(into_connect_error)?;

        *slot = Some(Arc::clone(&client));
        self.connection_pool_size.fetch_add(1, Ordering::SeqCst);
        tracing::info!(host = %host, port, "Trading engine client created");
        Ok(client)
    }

    /// Gets or creates the test coordinator client.
    pub async fn get_test_coordinator_client(
        &self,
        use_fallback: bool,
    ) -> Result<Arc<TestCoordinatorClient>> {
        let mut slot = self.coordinator.lock().await;
        if let Some(client) = slot.as_ref() {
            if client.is_connected() {
                return Ok(Arc::clone(client));
            }
        }

        let (host, port) = self
            .resolve_endpoint(
                TestCoordinatorClient::SERVICE_NAME,
                (
                    self.settings.fallback.test_coordinator_host.clone(),
                    self.settings.fallback.test_coordinator_grpc_port,
                ),
                use_fallback,
            )
            .await?;

        let client = Arc::new(TestCoordinatorClient::new(
            &host,
            port,
            Arc::clone(&self.pool),
            &self.settings.grpc,
        ));
        client.connect().await.map_err(into_connect_error)?;

        *slot = Some(Arc::clone(&client));
        self.connection_pool_size.fetch_add(1, Ordering::SeqCst);
        tracing::info!(host = %host, port, "Test coordinator client created");
        Ok(client)
    }

    pub async fn manager_stats(&self) -> ManagerStats {
        let uptime = self
            .started_at()
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let mut client_stats = HashMap::new();
        if let Some(client) = self.trading.lock().await.as_ref() {
            client_stats.insert("trading-engine".to_string(), client.stats());
        }
        if let Some(client) = self.coordinator.lock().await.as_ref() {
            client_stats.insert("test-coordinator".to_string(), client.stats());
        }

        ManagerStats {
            uptime_seconds: (uptime * 100.0).round() / 100.0,
            active_clients: client_stats.len(),
            connection_pool_size: self.connection_pool_size.load(Ordering::SeqCst),
            total_channels: self.pool.len().await,
            client_stats,
        }
    }

    /// Disconnects every cached client, drops the shared channel pool, and
    /// resets all counters. Safe to call with clients that never connected,
    /// and safe to call more than once.
    pub async fn cleanup(&self) {
        tracing::info!("Cleaning up inter-service client manager");

        if let Some(client) = self.trading.lock().await.take() {
            client.disconnect();
        }
        if let Some(client) = self.coordinator.lock().await.take() {
            client.disconnect();
        }

        self.pool.clear().await;
        self.connection_pool_size.store(0, Ordering::SeqCst);

        tracing::info!("Inter-service client manager cleanup complete");
    }
}

/// Connect-time failures keep their "Service not found" identity when they
/// have one; everything else is a connection failure.
fn into_connect_error(err: Error) -> Error {
    match err {
        e @ (Error::ServiceNotFound(_) | Error::ConnectionFailed(_)) => e,
        other => Error::ConnectionFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::ServiceInfo;

    struct EmptyRegistry;

    #[async_trait]
    impl ServiceResolver for EmptyRegistry {
        async fn get_service(&self, _service_name: &str) -> discovery::Result<Option<ServiceInfo>> {
            Ok(None)
        }
    }

    struct UnreachableRegistry;

    #[async_trait]
    impl ServiceResolver for UnreachableRegistry {
        async fn get_service(&self, service_name: &str) -> discovery::Result<Option<ServiceInfo>> {
            // Nothing listens on port 1; connect must fail, not discovery.
            Ok(Some(ServiceInfo {
                name: service_name.to_string(),
                version: "1.0.0".to_string(),
                host: "127.0.0.1".to_string(),
                http_port: 1,
                grpc_port: 1,
                status: "healthy".to_string(),
                last_heartbeat: chrono::Utc::now().timestamp(),
            }))
        }
    }

    struct FailingRegistry;

    #[async_trait]
    impl ServiceResolver for FailingRegistry {
        async fn get_service(&self, _service_name: &str) -> discovery::Result<Option<ServiceInfo>> {
            Err(discovery::Error::Query("registry store is down".to_string()))
        }
    }

    fn manager(resolver: Option<Arc<dyn ServiceResolver>>) -> InterServiceClientManager {
        let settings = Arc::new(Settings::default());
        let pool = Arc::new(ChannelPool::new(&settings.grpc));
        InterServiceClientManager::new(settings, resolver, pool)
    }

    #[tokio::test]
    async fn discovery_miss_reports_service_not_found() {
        let manager = manager(Some(Arc::new(EmptyRegistry)));
        manager.initialize();

        let err = manager.get_trading_engine_client(false).await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(_)));
        assert!(
            err.to_string()
                .contains("Service not found: trading-system-engine")
        );
    }

    #[tokio::test]
    async fn unreachable_target_reports_connection_failed() {
        let manager = manager(Some(Arc::new(UnreachableRegistry)));
        manager.initialize();

        let err = manager.get_trading_engine_client(false).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(err.to_string().contains("Connection failed"));
    }

    #[tokio::test]
    async fn transient_discovery_errors_do_not_fall_back() {
        let manager = manager(Some(Arc::new(FailingRegistry)));
        manager.initialize();

        let err = manager.get_trading_engine_client(false).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(err.to_string().contains("registry store is down"));
    }

    #[tokio::test]
    async fn cleanup_resets_pool_state_after_failed_connects() {
        let manager = manager(Some(Arc::new(UnreachableRegistry)));
        manager.initialize();

        // The failed connect still created a pooled (lazy) channel.
        let _ = manager.get_trading_engine_client(false).await;
        assert_eq!(manager.pool.len().await, 1);

        manager.cleanup().await;
        let stats = manager.manager_stats().await;
        assert_eq!(stats.active_clients, 0);
        assert_eq!(stats.connection_pool_size, 0);
        assert_eq!(stats.total_channels, 0);

        // Cleanup twice must be harmless.
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn stats_before_initialize_report_zero_uptime() {
        let manager = manager(None);
        let stats = manager.manager_stats().await;
        assert_eq!(stats.uptime_seconds, 0.0);
        assert_eq!(stats.active_clients, 0);
    }
}
