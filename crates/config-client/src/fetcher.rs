// In crates/config-client/src/fetcher.rs

use std::time::Duration;

use async_trait::async_trait;

use core_types::utc_timestamp;

use crate::error::{Error, Result};
use crate::types::ConfigurationValue;

/// Transport seam between the configuration client and the configuration
/// service. The production implementation speaks HTTP; tests substitute
/// in-memory fetchers.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Probes the service's `/health` endpoint.
    async fn health(&self) -> Result<()>;

    /// Fetches one configuration value.
    async fn fetch(&self, key: &str, environment: Option<&str>)
    -> Result<ConfigurationValue>;
}

/// HTTP implementation against `GET /health` and
/// `GET /api/v1/configuration?key&environment`.
pub struct HttpConfigFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpConfigFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else if e.is_connect() {
        Error::Connection(e.to_string())
    } else {
        Error::ServiceError(e.to_string())
    }
}

#[async_trait]
impl ConfigFetcher for HttpConfigFetcher {
    async fn health(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Connection(format!(
                "health check failed: {}",
                response.status()
            )))
        }
    }

    async fn fetch(
        &self,
        key: &str,
        environment: Option<&str>,
    ) -> Result<ConfigurationValue> {
        let mut request = self
            .http
            .get(format!("{}/api/v1/configuration", self.base_url))
            .query(&[("key", key)]);
        if let Some(environment) = environment {
            request = request.query(&[("environment", environment)]);
        }

        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(Error::ServiceError(status.to_string()));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|_| Error::InvalidResponse("response body is not JSON".to_string()))?;

        for field in ["key", "value", "type"] {
            if data.get(field).and_then(|v| v.as_str()).is_none() {
                return Err(Error::InvalidResponse(format!(
                    "missing required field: {field}"
                )));
            }
        }

        let text = |field: &str| data[field].as_str().unwrap_or_default().to_string();
        let optional =
            |field: &str| data.get(field).and_then(|v| v.as_str()).map(str::to_string);

        Ok(ConfigurationValue {
            key: text("key"),
            value: text("value"),
            value_type: text("type"),
            environment: optional("environment"),
            last_updated: optional("last_updated").or_else(|| Some(utc_timestamp())),
            version: optional("version"),
        })
    }
}
