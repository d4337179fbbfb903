// In crates/grpc-clients/src/test_coordinator.rs

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tonic::transport::Channel;

use app_config::types::GrpcSettings;
use core_types::{ChaosEvent, HealthResponse, ScenarioStatus, utc_timestamp};

use crate::client::{ClientCore, ClientStats};
use crate::error::Result;
use crate::pool::ChannelPool;

/// The RPC surface of the test coordinator. See
/// [`crate::trading_engine::TradingEngineApi`] for the two-implementation
/// scheme.
#[async_trait]
pub trait TestCoordinatorApi: Send + Sync {
    async fn current_scenario_status(&self, channel: Channel) -> Result<ScenarioStatus>;
    async fn simulate_chaos_event(
        &self,
        channel: Channel,
        event_type: &str,
        target_service: &str,
    ) -> Result<ChaosEvent>;
}

/// Fixed-response implementation used while the coordinator's wire schema is
/// not wired up.
pub struct FallbackTestCoordinatorApi;

#[async_trait]
impl TestCoordinatorApi for FallbackTestCoordinatorApi {
    async fn current_scenario_status(&self, _channel: Channel) -> Result<ScenarioStatus> {
        Ok(ScenarioStatus {
            scenario_id: "test_scenario_001".to_string(),
            status: "RUNNING".to_string(),
            start_time: utc_timestamp(),
            end_time: None,
            progress: Some(0.75),
            current_phase: Some("chaos_injection".to_string()),
        })
    }

    async fn simulate_chaos_event(
        &self,
        _channel: Channel,
        event_type: &str,
        target_service: &str,
    ) -> Result<ChaosEvent> {
        Ok(ChaosEvent {
            event_type: event_type.to_string(),
            target_service: target_service.to_string(),
            event_id: format!("chaos_{}", Utc::now().timestamp()),
            timestamp: utc_timestamp(),
            parameters: None,
            severity: "medium".to_string(),
        })
    }
}

pub type ChaosCallback = Box<dyn Fn(&ChaosEvent) + Send + Sync>;

/// gRPC client for the test coordinator service.
pub struct TestCoordinatorClient {
    core: ClientCore,
    api: Arc<dyn TestCoordinatorApi>,
    request_timeout: Duration,
    chaos_subscribers: Mutex<Vec<ChaosCallback>>,
}

impl TestCoordinatorClient {
    pub const SERVICE_NAME: &'static str = "test-coordinator";

    pub fn new(host: &str, port: u16, pool: Arc<ChannelPool>, grpc: &GrpcSettings) -> Self {
        Self::with_api(host, port, pool, grpc, Arc::new(FallbackTestCoordinatorApi))
    }

    pub fn with_api(
        host: &str,
        port: u16,
        pool: Arc<ChannelPool>,
        grpc: &GrpcSettings,
        api: Arc<dyn TestCoordinatorApi>,
    ) -> Self {
        Self {
            core: ClientCore::new(
                Self::SERVICE_NAME,
                host,
                port,
                pool,
                Duration::from_secs(grpc.health_check_timeout_secs),
            ),
            api,
            request_timeout: Duration::from_secs(grpc.request_timeout_secs),
            chaos_subscribers: Mutex::new(Vec::new()),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.core.connect().await
    }

    pub fn disconnect(&self) {
        self.core.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn stats(&self) -> ClientStats {
        self.core.stats()
    }

    pub async fn health_check(&self) -> HealthResponse {
        self.core.health_check().await
    }

    pub async fn get_current_scenario_status(&self) -> Result<ScenarioStatus> {
        let api = Arc::clone(&self.api);
        self.core
            .call("get_current_scenario_status", self.request_timeout, move |channel| async move {
                api.current_scenario_status(channel).await
            })
            .await
    }

    /// Registers a callback invoked for every simulated chaos event.
    pub fn subscribe_to_chaos_events(&self, callback: ChaosCallback) {
        let mut subscribers = self.subscribers();
        subscribers.push(callback);
        tracing::info!(
            subscribers_count = subscribers.len(),
            "Subscribed to chaos events"
        );
    }

    pub async fn simulate_chaos_event(
        &self,
        event_type: &str,
        target_service: &str,
    ) -> Result<ChaosEvent> {
        let api = Arc::clone(&self.api);
        let event_type = event_type.to_string();
        let target_service = target_service.to_string();

        let event = self
            .core
            .call("simulate_chaos_event", self.request_timeout, move |channel| async move {
                api.simulate_chaos_event(channel, &event_type, &target_service)
                    .await
            })
            .await?;

        self.notify_subscribers(&event);
        Ok(event)
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<ChaosCallback>> {
        self.chaos_subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A panicking callback must not take down the call path or starve the
    /// remaining subscribers.
    fn notify_subscribers(&self, event: &ChaosEvent) {
        for callback in self.subscribers().iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(event_id = %event.event_id, "Chaos event callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client() -> TestCoordinatorClient {
        let grpc = GrpcSettings::default();
        let pool = Arc::new(ChannelPool::new(&grpc));
        TestCoordinatorClient::new("localhost", 50052, pool, &grpc)
    }

    #[tokio::test]
    async fn fallback_api_reports_a_running_scenario() {
        let client = client();
        client.core.attach_test_channel().await;

        let status = client.get_current_scenario_status().await.unwrap();
        assert_eq!(status.scenario_id, "test_scenario_001");
        assert_eq!(status.status, "RUNNING");
        assert_eq!(status.current_phase.as_deref(), Some("chaos_injection"));
    }

    #[tokio::test]
    async fn chaos_subscribers_are_notified_and_panics_are_contained() {
        let client = client();
        client.core.attach_test_channel().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_callback = Arc::clone(&seen);
        client.subscribe_to_chaos_events(Box::new(move |event| {
            assert_eq!(event.event_type, "service_restart");
            seen_by_callback.fetch_add(1, Ordering::SeqCst);
        }));
        client.subscribe_to_chaos_events(Box::new(|_event| {
            panic!("misbehaving subscriber");
        }));
        let seen_by_late_callback = Arc::clone(&seen);
        client.subscribe_to_chaos_events(Box::new(move |_event| {
            seen_by_late_callback.fetch_add(1, Ordering::SeqCst);
        }));

        let event = client
            .simulate_chaos_event("service_restart", "trading-system-engine")
            .await
            .unwrap();

        assert_eq!(event.target_service, "trading-system-engine");
        assert_eq!(event.severity, "medium");
        // Both well-behaved subscribers ran despite the panicking one.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
