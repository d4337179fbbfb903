// In crates/app-config/src/types.rs

use serde::Deserialize;

/// Top-level application settings for the risk-monitor service.
///
/// Every section defaults to the values the service ships with, so tests can
/// simply use `Settings::default()` and override the fields they care about.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// This service's identity in the registry.
    pub service: ServiceSettings,
    /// Addresses this instance listens on (and registers).
    pub server: ServerSettings,
    /// Shared key-value store backing the service registry.
    pub redis: RedisSettings,
    /// Registration / heartbeat / discovery tuning.
    pub discovery: DiscoverySettings,
    /// Outbound gRPC call tuning.
    pub grpc: GrpcSettings,
    /// Static endpoints used when discovery is bypassed or not configured.
    pub fallback: FallbackSettings,
    /// Configuration service client tuning.
    pub config_service: ConfigServiceSettings,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServiceSettings {
    pub name: String,
    pub version: String,
    /// Instance identifier. Defaults to the service name (singleton deployments).
    pub instance: Option<String>,
}

impl ServiceSettings {
    pub fn instance_name(&self) -> &str {
        self.instance.as_deref().unwrap_or(&self.name)
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "risk-monitor".to_string(),
            version: "0.1.0".to_string(),
            instance: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            grpc_port: 50051,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RedisSettings {
    /// The connection URL for the shared registry store.
    pub url: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Seconds between heartbeat re-registrations.
    pub heartbeat_interval_secs: u64,
    /// Max heartbeat age before a record is excluded from discovery results.
    pub staleness_threshold_secs: i64,
    /// Per-operation timeout for registry store round trips.
    pub request_timeout_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            staleness_threshold_secs: 300,
            request_timeout_secs: 5,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GrpcSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            health_check_timeout_secs: 5,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FallbackSettings {
    pub trading_engine_host: String,
    pub trading_engine_grpc_port: u16,
    pub test_coordinator_host: String,
    pub test_coordinator_grpc_port: u16,
    pub config_service_host: String,
    pub config_service_http_port: u16,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            trading_engine_host: "localhost".to_string(),
            trading_engine_grpc_port: 50051,
            test_coordinator_host: "localhost".to_string(),
            test_coordinator_grpc_port: 50052,
            config_service_host: "localhost".to_string(),
            config_service_http_port: 8090,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ConfigServiceSettings {
    /// How long fetched configuration values stay cached.
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ConfigServiceSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            request_timeout_secs: 10,
        }
    }
}
