//! End-to-end tests against an in-process gRPC health server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_stream::wrappers::TcpListenerStream;

use app_config::Settings;
use grpc_clients::{ChannelPool, InterServiceClientManager};

/// Serves the standard `grpc.health.v1.Health` service on an ephemeral port.
async fn spawn_health_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let (mut reporter, health_service) = tonic_health::server::health_reporter();
    reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(health_service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("health server");
    });

    addr
}

fn manager_for(addr: SocketAddr) -> InterServiceClientManager {
    let mut settings = Settings::default();
    // Point both fallback endpoints at the in-process server.
    settings.fallback.trading_engine_host = addr.ip().to_string();
    settings.fallback.trading_engine_grpc_port = addr.port();
    settings.fallback.test_coordinator_host = addr.ip().to_string();
    settings.fallback.test_coordinator_grpc_port = addr.port();

    let settings = Arc::new(settings);
    let pool = Arc::new(ChannelPool::new(&settings.grpc));
    // No resolver configured: the manager must use the static fallback.
    InterServiceClientManager::new(settings, None, pool)
}

#[tokio::test]
async fn second_request_returns_the_cached_client() {
    let addr = spawn_health_server().await;
    let manager = manager_for(addr);
    manager.initialize();

    let first = manager.get_trading_engine_client(false).await.unwrap();
    let second = manager.get_trading_engine_client(false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_connected());
}

#[tokio::test]
async fn clients_to_the_same_address_share_one_channel() {
    let addr = spawn_health_server().await;
    let manager = manager_for(addr);
    manager.initialize();

    manager.get_trading_engine_client(false).await.unwrap();
    manager.get_test_coordinator_client(false).await.unwrap();

    let stats = manager.manager_stats().await;
    assert_eq!(stats.active_clients, 2);
    assert_eq!(stats.connection_pool_size, 2);
    // Both logical clients target the same host:port, so exactly one
    // shared channel exists.
    assert_eq!(stats.total_channels, 1);
}

#[tokio::test]
async fn calls_flow_through_the_connected_client() {
    let addr = spawn_health_server().await;
    let manager = manager_for(addr);
    manager.initialize();

    let client = manager.get_trading_engine_client(false).await.unwrap();
    let status = client.get_strategy_status("alpha-1").await.unwrap();
    assert_eq!(status.status, "ACTIVE");

    let health = client.health_check().await;
    assert_eq!(health.status, "SERVING");
    assert!(health.timestamp.is_some());

    let stats = client.stats();
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.circuit_breaker_state, "CLOSED");
}

#[tokio::test]
async fn cleanup_then_reconnect_builds_a_fresh_client() {
    let addr = spawn_health_server().await;
    let manager = manager_for(addr);
    manager.initialize();

    let before = manager.get_trading_engine_client(false).await.unwrap();
    manager.cleanup().await;

    let stats = manager.manager_stats().await;
    assert_eq!(stats.active_clients, 0);
    assert_eq!(stats.connection_pool_size, 0);
    assert_eq!(stats.total_channels, 0);
    assert!(!before.is_connected());

    let after = manager.get_trading_engine_client(false).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.is_connected());
}

#[tokio::test]
async fn use_fallback_bypasses_a_missing_registry_entry() {
    use async_trait::async_trait;
    use core_types::ServiceInfo;
    use discovery::ServiceResolver;

    struct EmptyRegistry;

    #[async_trait]
    impl ServiceResolver for EmptyRegistry {
        async fn get_service(&self, _service_name: &str) -> discovery::Result<Option<ServiceInfo>> {
            Ok(None)
        }
    }

    let addr = spawn_health_server().await;
    let mut settings = Settings::default();
    settings.fallback.trading_engine_host = addr.ip().to_string();
    settings.fallback.trading_engine_grpc_port = addr.port();
    let settings = Arc::new(settings);
    let pool = Arc::new(ChannelPool::new(&settings.grpc));
    let manager = InterServiceClientManager::new(settings, Some(Arc::new(EmptyRegistry)), pool);
    manager.initialize();

    // Discovery would miss; the explicit fallback flag must bypass it.
    let err = manager.get_trading_engine_client(false).await.unwrap_err();
    assert!(err.to_string().contains("Service not found"));

    let client = manager.get_trading_engine_client(true).await.unwrap();
    assert!(client.is_connected());
}
