// In crates/core-types/src/types.rs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Formats the current UTC time the way the wire expects it (`2026-01-02T15:04:05Z`).
pub fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// A discoverable service instance as stored in the registry.
///
/// One record exists per `(service name, instance)` pair. The owning process
/// is the sole writer of its own record; every other process only reads it
/// during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub status: String,
    /// Unix timestamp (seconds) of the last successful heartbeat write.
    pub last_heartbeat: i64,
}

impl ServiceInfo {
    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// Age of the last heartbeat relative to `now` (unix seconds).
    pub fn heartbeat_age_secs(&self, now: i64) -> i64 {
        now - self.last_heartbeat
    }

    /// Whether this record should be excluded from discovery results.
    pub fn is_stale(&self, now: i64, threshold_secs: i64) -> bool {
        self.heartbeat_age_secs(now) > threshold_secs
    }

    /// Refreshes the heartbeat timestamp to the current time.
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now().timestamp();
    }

    /// Parses a registry record from the flat field map stored in the
    /// key-value store. Records written by older instances may omit `status`.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        fn required<'a>(
            fields: &'a HashMap<String, String>,
            name: &'static str,
        ) -> Result<&'a String> {
            fields.get(name).ok_or(Error::MissingField(name))
        }

        fn port(fields: &HashMap<String, String>, name: &'static str) -> Result<u16> {
            let raw = required(fields, name)?;
            raw.parse().map_err(|_| Error::InvalidField {
                field: name,
                value: raw.clone(),
            })
        }

        let last_heartbeat_raw = required(fields, "last_heartbeat")?;
        let last_heartbeat = last_heartbeat_raw
            .parse()
            .map_err(|_| Error::InvalidField {
                field: "last_heartbeat",
                value: last_heartbeat_raw.clone(),
            })?;

        Ok(Self {
            name: required(fields, "name")?.clone(),
            version: required(fields, "version")?.clone(),
            host: required(fields, "host")?.clone(),
            http_port: port(fields, "http_port")?,
            grpc_port: port(fields, "grpc_port")?,
            status: fields
                .get("status")
                .cloned()
                .unwrap_or_else(|| "healthy".to_string()),
            last_heartbeat,
        })
    }

    /// Flattens the record into the field pairs written to the store.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("version", self.version.clone()),
            ("host", self.host.clone()),
            ("http_port", self.http_port.to_string()),
            ("grpc_port", self.grpc_port.to_string()),
            ("status", self.status.clone()),
            ("last_heartbeat", self.last_heartbeat.to_string()),
        ]
    }
}

/// Result of a liveness probe against a downstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: Option<String>,
    pub timestamp: Option<String>,
}

/// Trading strategy status as reported by the trading engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub strategy_id: String,
    pub status: String,
    pub positions: Vec<Position>,
    pub last_updated: String,
    pub performance: Option<HashMap<String, f64>>,
}

/// A single open trading position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument_id: String,
    pub quantity: f64,
    pub value: f64,
    pub side: String,
    pub entry_price: Option<f64>,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

/// Test scenario status as reported by the test coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStatus {
    pub scenario_id: String,
    pub status: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub progress: Option<f64>,
    pub current_phase: Option<String>,
}

/// A chaos engineering event emitted by the test coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosEvent {
    pub event_type: String,
    pub target_service: String,
    pub event_id: String,
    pub timestamp: String,
    pub parameters: Option<serde_json::Value>,
    pub severity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> HashMap<String, String> {
        [
            ("name", "trading-system-engine"),
            ("version", "1.0.0"),
            ("host", "host1"),
            ("http_port", "8080"),
            ("grpc_port", "50051"),
            ("last_heartbeat", "1700000000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn parses_complete_record() {
        let info = ServiceInfo::from_fields(&record()).unwrap();
        assert_eq!(info.name, "trading-system-engine");
        assert_eq!(info.grpc_address(), "host1:50051");
        // `status` is optional on the wire and defaults to healthy.
        assert_eq!(info.status, "healthy");
    }

    #[test]
    fn rejects_record_missing_required_field() {
        let mut fields = record();
        fields.remove("host");
        assert!(matches!(
            ServiceInfo::from_fields(&fields),
            Err(Error::MissingField("host"))
        ));
    }

    #[test]
    fn rejects_unparseable_port() {
        let mut fields = record();
        fields.insert("grpc_port".into(), "not-a-port".into());
        assert!(matches!(
            ServiceInfo::from_fields(&fields),
            Err(Error::InvalidField { field: "grpc_port", .. })
        ));
    }

    #[test]
    fn staleness_uses_heartbeat_age() {
        let mut info = ServiceInfo::from_fields(&record()).unwrap();
        let now = 1_700_000_000 + 10 * 60;
        assert!(info.is_stale(now, 300));

        info.last_heartbeat = now;
        assert!(!info.is_stale(now, 300));
    }

    #[test]
    fn round_trips_through_field_map() {
        let info = ServiceInfo::from_fields(&record()).unwrap();
        let fields: HashMap<String, String> = info
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(ServiceInfo::from_fields(&fields).unwrap(), info);
    }
}
