// In crates/grpc-clients/src/pool.rs

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use app_config::types::GrpcSettings;

use crate::error::{Error, Result};

/// Address-keyed cache of shared gRPC channels.
///
/// The pool holds at most one channel per distinct `host:port`, no matter how
/// many logical clients target that address. It is constructed once at
/// process start and injected into every client, which keeps channel lifetime
/// explicit: clients only flag themselves disconnected, and the manager tears
/// the pool down during cleanup.
pub struct ChannelPool {
    connect_timeout: Duration,
    request_timeout: Duration,
    // One lock serializes the first-create-vs-reuse decision per address.
    channels: Mutex<HashMap<String, Channel>>,
}

impl ChannelPool {
    pub fn new(grpc: &GrpcSettings) -> Self {
        Self::with_timeouts(
            Duration::from_secs(grpc.connect_timeout_secs),
            Duration::from_secs(grpc.request_timeout_secs),
        )
    }

    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared channel for `address`, creating it on first use.
    ///
    /// Channels are created lazily; the actual TCP/HTTP2 connection is
    /// established by the first call that flows through them.
    pub async fn get_or_create(&self, address: &str) -> Result<Channel> {
        let mut channels = self.channels.lock().await;

        if let Some(channel) = channels.get(address) {
            tracing::debug!(address, "Reusing existing gRPC channel");
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| Error::ConnectionFailed(format!("invalid address {address}: {e}")))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        let channel = endpoint.connect_lazy();
        channels.insert(address.to_string(), channel.clone());
        tracing::info!(address, "Created new gRPC channel");

        Ok(channel)
    }

    /// Number of distinct addresses with a pooled channel.
    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.lock().await.is_empty()
    }

    /// Drops every pooled channel. Existing clones held by in-flight calls
    /// remain valid until they complete; new callers get fresh channels.
    pub async fn clear(&self) {
        self.channels.lock().await.clear();
        tracing::info!("Channel pool cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ChannelPool {
        ChannelPool::with_timeouts(Duration::from_secs(1), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn one_channel_per_address() {
        let pool = pool();
        pool.get_or_create("localhost:50051").await.unwrap();
        pool.get_or_create("localhost:50051").await.unwrap();
        assert_eq!(pool.len().await, 1);

        pool.get_or_create("localhost:50052").await.unwrap();
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn clear_empties_the_pool() {
        let pool = pool();
        pool.get_or_create("localhost:50051").await.unwrap();
        pool.clear().await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn rejects_malformed_addresses() {
        let pool = pool();
        let err = pool.get_or_create("not an address").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(pool.is_empty().await);
    }
}
