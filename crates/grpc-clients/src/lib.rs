// In crates/grpc-clients/src/lib.rs

pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod manager;
pub mod pool;
pub mod test_coordinator;
pub mod trading_engine;

// Re-export public types
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use client::{ClientCore, ClientStats};
pub use error::{Error, Result};
pub use manager::{InterServiceClientManager, ManagerStats};
pub use pool::ChannelPool;
pub use test_coordinator::{
    ChaosCallback, FallbackTestCoordinatorApi, TestCoordinatorApi, TestCoordinatorClient,
};
pub use trading_engine::{FallbackTradingEngineApi, TradingEngineApi, TradingEngineClient};
