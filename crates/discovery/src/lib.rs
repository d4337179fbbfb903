// In crates/discovery/src/lib.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use app_config::Settings;
use core_types::ServiceInfo;

pub mod error;
pub mod resolver;

// Re-export public types
pub use error::{Error, Result};
pub use resolver::ServiceResolver;

/// Prefix shared by every registry key (`service:<name>:<instance>`).
const REGISTRY_KEY_PREFIX: &str = "service:";

/// Redis-backed service registry client.
///
/// Registers this process's own service identity, keeps it alive via a
/// periodic heartbeat, and lets any process query for live instances of a
/// named service. One instance of this struct owns exactly one registry
/// record; discovery reads span the whole fleet.
pub struct ServiceDiscovery {
    settings: Arc<Settings>,
    conn: Mutex<Option<ConnectionManager>>,
    /// The record this instance wrote, refreshed on every heartbeat tick.
    registration: Mutex<Option<ServiceInfo>>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServiceDiscovery {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            conn: Mutex::new(None),
            registration: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    /// The registry key owned by this instance.
    pub fn registry_key(&self) -> String {
        format!(
            "{}{}:{}",
            REGISTRY_KEY_PREFIX,
            self.settings.service.name,
            self.settings.service.instance_name()
        )
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.discovery.request_timeout_secs)
    }

    /// Record TTL: comfortably longer than one heartbeat interval so a
    /// crashed instance's record expires on its own.
    fn record_ttl_secs(&self) -> u64 {
        self.settings.discovery.heartbeat_interval_secs * 2
    }

    /// Establishes the store connection and verifies liveness with a ping.
    pub async fn connect(&self) -> Result<()> {
        let client = redis::Client::open(self.settings.redis.url.as_str())
            .map_err(|e| Error::Connection(format!("invalid redis url: {e}")))?;

        let manager = tokio::time::timeout(self.request_timeout(), client.get_connection_manager())
            .await
            .map_err(|_| Error::Timeout("connect".to_string()))?
            .map_err(|e| Error::Connection(e.to_string()))?;

        let mut conn = manager.clone();
        let pong: String = tokio::time::timeout(
            self.request_timeout(),
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| Error::Timeout("ping".to_string()))?
        .map_err(|e| Error::Connection(format!("ping failed: {e}")))?;

        if pong != "PONG" {
            return Err(Error::Connection(format!("unexpected ping reply: {pong}")));
        }

        *self.conn.lock().await = Some(manager);
        tracing::info!(url = %self.settings.redis.url, "Connected to service registry store");
        Ok(())
    }

    /// Writes this instance's registry record.
    ///
    /// Uses the provided `ServiceInfo` if supplied, otherwise derives one from
    /// the current settings with status `healthy`.
    pub async fn register_service(&self, info: Option<ServiceInfo>) -> Result<()> {
        let info = info.unwrap_or_else(|| self.default_service_info());
        *self.registration.lock().await = Some(info);

        self.write_record().await.map_err(|e| match e {
            Error::Timeout(_) => e,
            other => Error::Registration(other.to_string()),
        })?;

        tracing::info!(key = %self.registry_key(), "Service registered");
        Ok(())
    }

    fn default_service_info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.settings.service.name.clone(),
            version: self.settings.service.version.clone(),
            host: self.settings.server.host.clone(),
            http_port: self.settings.server.http_port,
            grpc_port: self.settings.server.grpc_port,
            status: "healthy".to_string(),
            last_heartbeat: Utc::now().timestamp(),
        }
    }

    /// Re-writes the owned record with a fresh heartbeat timestamp and
    /// refreshes its TTL.
    async fn write_record(&self) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Connection("not connected to registry store".to_string()))?;

        let fields = {
            let mut registration = self.registration.lock().await;
            let info = registration
                .as_mut()
                .ok_or_else(|| Error::Registration("no registration to write".to_string()))?;
            info.touch();
            info.to_fields()
        };

        let key = self.registry_key();
        let mut hset = redis::cmd("HSET");
        hset.arg(&key);
        for (field, value) in &fields {
            hset.arg(*field).arg(value);
        }

        let _: () = tokio::time::timeout(self.request_timeout(), hset.query_async(&mut conn))
            .await
            .map_err(|_| Error::Timeout("registration write".to_string()))?
            .map_err(|e| Error::Query(e.to_string()))?;

        let _: () = tokio::time::timeout(
            self.request_timeout(),
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.record_ttl_secs())
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| Error::Timeout("registration expire".to_string()))?
        .map_err(|e| Error::Query(e.to_string()))?;

        Ok(())
    }

    /// Starts the background heartbeat loop at the configured interval.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.settings.discovery.heartbeat_interval_secs);
        self.start_heartbeat_with_interval(interval);
    }

    /// Starts the heartbeat loop with an explicit interval. Tests use this
    /// with much shorter intervals than production.
    pub fn start_heartbeat_with_interval(self: &Arc<Self>, interval: Duration) {
        let mut slot = match self.heartbeat.try_lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        if slot.is_some() {
            // Already running.
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(this.heartbeat_loop(interval, stop_rx));
        *slot = Some(HeartbeatHandle { stop, task });
    }

    /// The heartbeat loop itself.
    ///
    /// Each tick re-writes the registry record and refreshes its TTL. A tick
    /// failure is logged and retried on the next interval; only the stop
    /// channel ends the loop.
    async fn heartbeat_loop(self: Arc<Self>, interval: Duration, mut stop: watch::Receiver<bool>) {
        tracing::info!(interval_secs = interval.as_secs_f64(), "Heartbeat loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.write_record().await {
                        tracing::warn!(error = %e, "Heartbeat tick failed; retrying on next interval");
                    } else {
                        tracing::debug!(key = %self.registry_key(), "Heartbeat written");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        tracing::info!("Heartbeat loop stopped");
    }

    /// Stops the heartbeat loop, waiting for it to exit at its next
    /// suspension point. Safe to call when no loop is running.
    pub async fn stop_heartbeat(&self) {
        let handle = self.heartbeat.lock().await.take();
        if let Some(HeartbeatHandle { stop, task }) = handle {
            let _ = stop.send(true);
            let _ = task.await;
        }
    }

    /// Scans the registry and returns the live instances, optionally filtered
    /// to one service name.
    ///
    /// Records whose heartbeat age exceeds the staleness threshold are
    /// excluded; malformed records are skipped rather than surfaced.
    pub async fn discover_services(&self, service_name: Option<&str>) -> Result<Vec<ServiceInfo>> {
        let mut conn = self
            .conn
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Connection("not connected to registry store".to_string()))?;

        let keys: Vec<String> = tokio::time::timeout(
            self.request_timeout(),
            redis::cmd("KEYS")
                .arg(format!("{REGISTRY_KEY_PREFIX}*"))
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| Error::Timeout("registry scan".to_string()))?
        .map_err(|e| Error::Query(e.to_string()))?;

        let mut services = Vec::new();
        for key in keys {
            if let Some(wanted) = service_name {
                if !key_matches_service(&key, wanted) {
                    continue;
                }
            }

            let fields: HashMap<String, String> = tokio::time::timeout(
                self.request_timeout(),
                redis::cmd("HGETALL").arg(&key).query_async(&mut conn),
            )
            .await
            .map_err(|_| Error::Timeout("registry read".to_string()))?
            .map_err(|e| Error::Query(e.to_string()))?;

            if fields.is_empty() {
                // Key expired between the scan and the read.
                continue;
            }

            match ServiceInfo::from_fields(&fields) {
                Ok(info) => services.push(info),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Skipping malformed registry record");
                }
            }
        }

        Ok(live_only(
            services,
            Utc::now().timestamp(),
            self.settings.discovery.staleness_threshold_secs,
        ))
    }

    /// Returns the first live instance of the named service, if any.
    pub async fn get_service(&self, service_name: &str) -> Result<Option<ServiceInfo>> {
        let mut services = self.discover_services(Some(service_name)).await?;
        if services.is_empty() {
            Ok(None)
        } else {
            Ok(Some(services.swap_remove(0)))
        }
    }

    /// Releases the store connection and stops the heartbeat. Safe to call
    /// even if `connect()` never succeeded, and safe to call twice.
    pub async fn disconnect(&self) {
        self.stop_heartbeat().await;
        self.conn.lock().await.take();
        self.registration.lock().await.take();
        tracing::info!("Disconnected from service registry store");
    }
}

/// Whether a registry key (`service:<name>:<instance>`) belongs to `service`.
fn key_matches_service(key: &str, service: &str) -> bool {
    key.split(':').nth(1) == Some(service)
}

/// Drops every record whose heartbeat age exceeds the staleness threshold.
fn live_only(services: Vec<ServiceInfo>, now: i64, threshold_secs: i64) -> Vec<ServiceInfo> {
    services
        .into_iter()
        .filter(|info| !info.is_stale(now, threshold_secs))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::default())
    }

    fn info(name: &str, last_heartbeat: i64) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            host: "host1".to_string(),
            http_port: 8080,
            grpc_port: 50051,
            status: "healthy".to_string(),
            last_heartbeat,
        }
    }

    #[test]
    fn registry_key_is_namespaced_by_name_and_instance() {
        let discovery = ServiceDiscovery::new(settings());
        assert_eq!(discovery.registry_key(), "service:risk-monitor:risk-monitor");
    }

    #[test]
    fn key_filter_matches_the_name_segment_only() {
        assert!(key_matches_service("service:risk-monitor:instance1", "risk-monitor"));
        assert!(!key_matches_service("service:trading-engine:instance1", "risk-monitor"));
        // An instance id that happens to equal the wanted name must not match.
        assert!(!key_matches_service("service:other:risk-monitor", "risk-monitor"));
    }

    #[test]
    fn stale_records_are_dropped() {
        let now = Utc::now().timestamp();
        let fresh = info("risk-monitor", now);
        let stale = info("risk-monitor", now - 10 * 60);

        let live = live_only(vec![fresh.clone(), stale], now, 300);
        assert_eq!(live, vec![fresh]);
    }

    #[test]
    fn default_registration_derives_from_settings() {
        let discovery = ServiceDiscovery::new(settings());
        let info = discovery.default_service_info();
        assert_eq!(info.name, "risk-monitor");
        assert_eq!(info.status, "healthy");
        assert_eq!(info.grpc_port, 50051);
    }

    #[tokio::test]
    async fn discovery_requires_a_connection() {
        let discovery = ServiceDiscovery::new(settings());
        let err = discovery.discover_services(None).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn heartbeat_survives_tick_failures_and_stops_on_request() {
        // Never connected, so every tick fails; the loop must keep running
        // until it is told to stop.
        let discovery = Arc::new(ServiceDiscovery::new(settings()));
        discovery
            .register_service(None)
            .await
            .expect_err("registration without a store connection should fail");

        discovery.start_heartbeat_with_interval(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Must return promptly rather than hanging on a crashed loop.
        tokio::time::timeout(Duration::from_secs(1), discovery.stop_heartbeat())
            .await
            .expect("heartbeat did not stop in time");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let discovery = ServiceDiscovery::new(settings());
        discovery.disconnect().await;
        discovery.disconnect().await;
    }
}
