// In crates/grpc-clients/src/trading_engine.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;

use app_config::types::GrpcSettings;
use core_types::{HealthResponse, Position, StrategyStatus, utc_timestamp};

use crate::client::{ClientCore, ClientStats};
use crate::error::Result;
use crate::pool::ChannelPool;

/// The RPC surface of the trading engine.
///
/// Two implementations exist: a schema-backed one (once the protobuf layer is
/// wired up) and [`FallbackTradingEngineApi`], which serves fixed responses.
/// The implementation is chosen at construction time.
#[async_trait]
pub trait TradingEngineApi: Send + Sync {
    async fn strategy_status(&self, channel: Channel, strategy_id: &str) -> Result<StrategyStatus>;
    async fn current_positions(&self, channel: Channel) -> Result<Vec<Position>>;
}

/// Fixed-response implementation used while the trading engine's wire schema
/// is not wired up.
pub struct FallbackTradingEngineApi;

#[async_trait]
impl TradingEngineApi for FallbackTradingEngineApi {
    async fn strategy_status(
        &self,
        _channel: Channel,
        strategy_id: &str,
    ) -> Result<StrategyStatus> {
        Ok(StrategyStatus {
            strategy_id: strategy_id.to_string(),
            status: "ACTIVE".to_string(),
            positions: Vec::new(),
            last_updated: utc_timestamp(),
            performance: None,
        })
    }

    async fn current_positions(&self, _channel: Channel) -> Result<Vec<Position>> {
        Ok(vec![Position {
            instrument_id: "BTC/USD".to_string(),
            quantity: 0.5,
            value: 25_000.0,
            side: "LONG".to_string(),
            entry_price: Some(49_000.0),
            current_price: Some(50_000.0),
            unrealized_pnl: Some(500.0),
        }])
    }
}

/// gRPC client for the trading engine service.
pub struct TradingEngineClient {
    core: ClientCore,
    api: Arc<dyn TradingEngineApi>,
    request_timeout: Duration,
}

impl std::fmt::Debug for TradingEngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngineClient").finish_non_exhaustive()
    }
}

impl TradingEngineClient {
    pub const SERVICE_NAME: &'static str = "trading-system-engine";

    pub fn new(host: &str, port: u16, pool: Arc<ChannelPool>, grpc: &GrpcSettings) -> Self {
        Self::with_api(host, port, pool, grpc, Arc::new(FallbackTradingEngineApi))
    }

    pub fn with_api(
        host: &str,
        port: u16,
        pool: Arc<ChannelPool>,
        grpc: &GrpcSettings,
        api: Arc<dyn TradingEngineApi>,
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

    pub async fn get_strategy_status(&self, strategy_id: &str) -> Result<StrategyStatus> {
        let api = Arc::clone(&self.api);
        let strategy_id = strategy_id.to_string();
        self.core
            .call("get_strategy_status", self.request_timeout, move |channel| async move {
                api.strategy_status(channel, &strategy_id).await
            })
            .await
    }

    pub async fn get_current_positions(&self) -> Result<Vec<Position>> {
        let api = Arc::clone(&self.api);
        self.core
            .call("get_current_positions", self.request_timeout, move |channel| async move {
                api.current_positions(channel).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TradingEngineClient {
        let grpc = GrpcSettings::default();
        let pool = Arc::new(ChannelPool::new(&grpc));
        TradingEngineClient::new("localhost", 50051, pool, &grpc)
    }

    #[tokio::test]
    async fn fallback_api_reports_an_active_strategy() {
        let client = client();
        client.core.attach_test_channel().await;

        let status = client.get_strategy_status("alpha-1").await.unwrap();
        assert_eq!(status.strategy_id, "alpha-1");
        assert_eq!(status.status, "ACTIVE");

        let positions = client.get_current_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].instrument_id, "BTC/USD");

        let stats = client.stats();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.error_count, 0);
    }
}
