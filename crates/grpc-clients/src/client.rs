// In crates/grpc-clients/src/client.rs

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tonic::Code;
use tonic::transport::Channel;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::Instrument;

use core_types::{HealthResponse, utc_timestamp};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::pool::ChannelPool;

/// Per-client plumbing shared by every concrete RPC client: pooled channel
/// resolution, liveness probing, circuit breaking, tracing, call accounting,
/// and failure classification.
///
/// Concrete clients compose a `ClientCore` and add typed operations that
/// delegate to [`ClientCore::call`]; they carry no failure handling of their
/// own.
pub struct ClientCore {
    service_name: String,
    host: String,
    port: u16,
    pool: Arc<ChannelPool>,
    health_check_timeout: Duration,
    channel: Mutex<Option<Channel>>,
    connected: AtomicBool,
    breaker: CircuitBreaker,
    call_count: AtomicU64,
    error_count: AtomicU64,
}

/// Point-in-time performance snapshot of one client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub service_name: String,
    pub address: String,
    pub connected: bool,
    pub total_calls: u64,
    pub error_count: u64,
    pub error_rate_percent: f64,
    pub circuit_breaker_state: String,
    pub circuit_breaker_failures: u32,
}

enum ProbeOutcome {
    Serving,
    NotServing,
    /// The target exposes no health service; treated as healthy.
    Unimplemented,
}

impl ClientCore {
    pub fn new(
        service_name: &str,
        host: &str,
        port: u16,
        pool: Arc<ChannelPool>,
        health_check_timeout: Duration,
    ) -> Self {
        Self {
            service_name: service_name.to_string(),
            host: host.to_string(),
            port,
            pool,
            health_check_timeout,
            channel: Mutex::new(None),
            connected: AtomicBool::new(false),
            breaker: CircuitBreaker::default(),
            call_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn channel(&self) -> Option<Channel> {
        self.inner_channel().clone()
    }

    fn inner_channel(&self) -> std::sync::MutexGuard<'_, Option<Channel>> {
        self.channel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves the shared pooled channel for this client's address and
    /// verifies the target with a health probe.
    ///
    /// The first client to an address creates the channel; later clients to
    /// the same address reuse it. A target that does not implement the health
    /// protocol is treated as healthy.
    pub async fn connect(&self) -> Result<()> {
        let channel = self.pool.get_or_create(&self.address()).await?;

        match self.probe(channel.clone()).await {
            Ok(ProbeOutcome::Serving) => {}
            Ok(ProbeOutcome::Unimplemented) => {
                tracing::warn!(
                    service = %self.service_name,
                    "Health service not implemented; assuming target is available"
                );
            }
            Ok(ProbeOutcome::NotServing) => {
                return Err(Error::ConnectionFailed(format!(
                    "{} is not serving",
                    self.address()
                )));
            }
            Err(msg) => {
                tracing::error!(service = %self.service_name, error = %msg, "Failed to connect");
                return Err(Error::ConnectionFailed(msg));
            }
        }

        *self.inner_channel() = Some(channel);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(service = %self.service_name, address = %self.address(), "gRPC client connected");
        Ok(())
    }

    /// Marks this client disconnected. The pooled channel stays alive because
    /// other clients may share it; channel teardown is centralized in the
    /// manager's cleanup.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(service = %self.service_name, "gRPC client disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.inner_channel().is_some()
    }

    async fn probe(&self, channel: Channel) -> std::result::Result<ProbeOutcome, String> {
        let mut health = HealthClient::new(channel);
        let request = HealthCheckRequest {
            service: String::new(),
        };

        let response =
            tokio::time::timeout(self.health_check_timeout, health.check(request)).await;

        match response {
            Err(_) => Err("health check timed out".to_string()),
            Ok(Err(status)) if status.code() == Code::Unimplemented => {
                Ok(ProbeOutcome::Unimplemented)
            }
            Ok(Err(status)) => Err(format!("health check failed: {status}")),
            Ok(Ok(reply)) => {
                if reply.into_inner().status == ServingStatus::Serving as i32 {
                    Ok(ProbeOutcome::Serving)
                } else {
                    Ok(ProbeOutcome::NotServing)
                }
            }
        }
    }

    /// Runs one RPC through the full gate: circuit breaker, call accounting,
    /// tracing span, explicit deadline, breaker feedback, and failure
    /// classification.
    pub async fn call<T, F, Fut>(&self, method: &str, timeout: Duration, op: F) -> Result<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.breaker.can_execute() {
            return Err(Error::CircuitOpen);
        }

        self.call_count.fetch_add(1, Ordering::Relaxed);

        let span = tracing::info_span!(
            "grpc_call",
            service = %self.service_name,
            method,
        );

        let outcome = async {
            let channel = self
                .channel()
                .ok_or_else(|| Error::ConnectionFailed("client is not connected".to_string()))?;

            match tokio::time::timeout(timeout, op(channel)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{method} exceeded {}s deadline",
                    timeout.as_secs_f64()
                ))),
            }
        }
        .instrument(span)
        .await;

        match outcome {
            Ok(value) => {
                self.breaker.on_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.on_failure();
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    service = %self.service_name,
                    method,
                    error = %e,
                    "gRPC call failed"
                );
                Err(classify(e))
            }
        }
    }

    pub fn stats(&self) -> ClientStats {
        let total_calls = self.call_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let error_rate = if total_calls > 0 {
            error_count as f64 / total_calls as f64 * 100.0
        } else {
            0.0
        };

        ClientStats {
            service_name: self.service_name.clone(),
            address: self.address(),
            connected: self.is_connected(),
            total_calls,
            error_count,
            error_rate_percent: (error_rate * 100.0).round() / 100.0,
            circuit_breaker_state: self.breaker.state().to_string(),
            circuit_breaker_failures: self.breaker.failure_count(),
        }
    }

    /// Best-effort liveness probe. Never fails: a probe error yields an
    /// `UNKNOWN` status instead.
    pub async fn health_check(&self) -> HealthResponse {
        let Some(channel) = self.channel() else {
            return self.unknown_health("client is not connected");
        };

        match self.probe(channel).await {
            Ok(ProbeOutcome::Serving) => HealthResponse {
                status: "SERVING".to_string(),
                service: Some(self.service_name.clone()),
                timestamp: Some(utc_timestamp()),
            },
            Ok(ProbeOutcome::NotServing) => HealthResponse {
                status: "NOT_SERVING".to_string(),
                service: Some(self.service_name.clone()),
                timestamp: Some(utc_timestamp()),
            },
            Ok(ProbeOutcome::Unimplemented) => self.unknown_health("health service not implemented"),
            Err(msg) => self.unknown_health(&msg),
        }
    }

    fn unknown_health(&self, reason: &str) -> HealthResponse {
        tracing::warn!(service = %self.service_name, reason, "Health check inconclusive");
        HealthResponse {
            status: "UNKNOWN".to_string(),
            service: Some(self.service_name.clone()),
            timestamp: None,
        }
    }

    #[cfg(test)]
    pub(crate) async fn attach_test_channel(&self) {
        let channel = self.pool.get_or_create(&self.address()).await.unwrap();
        *self.inner_channel() = Some(channel);
        self.connected.store(true, Ordering::SeqCst);
    }
}

/// Maps a failed call onto the error taxonomy by inspecting the message for
/// known substrings, preserving already-classified variants.
fn classify(err: Error) -> Error {
    let message = match err {
        e @ (Error::Timeout(_) | Error::Auth(_) | Error::CircuitOpen) => return e,
        Error::Call(m) | Error::ConnectionFailed(m) => m,
        other => other.to_string(),
    };

    let lower = message.to_lowercase();
    if lower.contains("timeout") {
        Error::Timeout(message)
    } else if lower.contains("authentication") {
        Error::Auth(message)
    } else {
        Error::Call(message)
    }
}
