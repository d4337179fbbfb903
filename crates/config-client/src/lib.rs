// In crates/config-client/src/lib.rs

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use app_config::Settings;
use discovery::ServiceResolver;

pub mod error;
pub mod fetcher;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use fetcher::{ConfigFetcher, HttpConfigFetcher};
pub use types::{ConfigurationValue, is_valid_key};

pub type UpdateCallback = Box<dyn Fn(&str, &ConfigurationValue) + Send + Sync>;

struct CacheEntry {
    value: ConfigurationValue,
    expires_at: Instant,
}

/// Client for the centralized configuration service.
///
/// Values are cached with a fixed TTL and keyed by `key:environment`;
/// subscribers can watch a key pattern (`prefix*` or an exact key) and get
/// called back whenever an update notification re-fetches a matching key.
pub struct ConfigurationServiceClient {
    settings: Arc<Settings>,
    resolver: Option<Arc<dyn ServiceResolver>>,
    fetcher: Mutex<Option<Arc<dyn ConfigFetcher>>>,
    connected: AtomicBool,
    cache: Mutex<HashMap<String, CacheEntry>>,
    subscribers: Mutex<HashMap<String, Vec<UpdateCallback>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_ttl: Duration,
}

impl ConfigurationServiceClient {
    pub const SERVICE_NAME: &'static str = "configuration-service";

    pub fn new(settings: Arc<Settings>, resolver: Option<Arc<dyn ServiceResolver>>) -> Self {
        let cache_ttl = Duration::from_secs(settings.config_service.cache_ttl_secs);
        Self {
            settings,
            resolver,
            fetcher: Mutex::new(None),
            connected: AtomicBool::new(false),
            cache: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_ttl,
        }
    }

    /// Builds an already-connected client over a caller-provided transport.
    /// Used when the endpoint is known ahead of time, and by tests.
    pub fn with_fetcher(settings: Arc<Settings>, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        let client = Self::new(settings, None);
        *client.fetcher_slot() = Some(fetcher);
        client.connected.store(true, Ordering::SeqCst);
        client
    }

    fn fetcher_slot(&self) -> MutexGuard<'_, Option<Arc<dyn ConfigFetcher>>> {
        self.fetcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_slot(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscriber_slot(&self) -> MutexGuard<'_, HashMap<String, Vec<UpdateCallback>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves the configuration service endpoint (registry first, static
    /// fallback otherwise) and verifies it with a health probe.
    pub async fn connect(&self) -> Result<()> {
        let (host, port) = match &self.resolver {
            Some(resolver) => {
                let info = resolver
                    .get_service(Self::SERVICE_NAME)
                    .await
                    .map_err(|e| Error::Connection(e.to_string()))?
                    .ok_or_else(|| {
                        Error::Connection(
                            "configuration service not found in registry".to_string(),
                        )
                    })?;
                (info.host, info.http_port)
            }
            None => (
                self.settings.fallback.config_service_host.clone(),
                self.settings.fallback.config_service_http_port,
            ),
        };

        let base_url = format!("http://{host}:{port}");
        let fetcher = HttpConfigFetcher::new(
            base_url.clone(),
            Duration::from_secs(self.settings.config_service.request_timeout_secs),
        )?;
        fetcher.health().await?;

        *self.fetcher_slot() = Some(Arc::new(fetcher));
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(endpoint = %base_url, "Configuration service client connected");
        Ok(())
    }

    /// Drops the transport and clears all local state. Safe to call even if
    /// `connect()` never succeeded, and safe to call twice.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.fetcher_slot().take();
        self.cache_slot().clear();
        self.subscriber_slot().clear();
        tracing::info!("Configuration service client disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    fn cache_key(&self, key: &str, environment: Option<&str>) -> String {
        format!(
            "{key}:{}",
            environment.unwrap_or(&self.settings.app.environment)
        )
    }

    /// Gets a single configuration value, serving from the TTL cache when
    /// possible.
    pub async fn get_configuration(
        &self,
        key: &str,
        environment: Option<&str>,
    ) -> Result<ConfigurationValue> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if !is_valid_key(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }

        let cache_key = self.cache_key(key, environment);
        if let Some(entry) = self.cache_slot().get(&cache_key) {
            if entry.expires_at > Instant::now() {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let fetcher = self.fetcher_slot().clone().ok_or(Error::NotConnected)?;
        let value = fetcher.fetch(key, environment).await?;
        if !value.validate() {
            return Err(Error::InvalidResponse(format!(
                "service returned a malformed value for {key}"
            )));
        }

        self.cache_slot().insert(
            cache_key,
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );

        Ok(value)
    }

    /// Fetches several keys, silently skipping the ones that fail.
    pub async fn get_configurations(
        &self,
        keys: &[&str],
        environment: Option<&str>,
    ) -> Result<Vec<ConfigurationValue>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get_configuration(key, environment).await {
                Ok(value) => values.push(value),
                Err(e) => {
                    tracing::debug!(key, error = %e, "Skipping key in batch fetch");
                }
            }
        }
        Ok(values)
    }

    /// Registers a callback for keys matching `pattern` (`prefix*` or exact).
    pub fn subscribe_to_updates(&self, pattern: &str, callback: UpdateCallback) {
        self.subscriber_slot()
            .entry(pattern.to_string())
            .or_default()
            .push(callback);
        tracing::info!(pattern, "Subscribed to configuration updates");
    }

    /// Invalidates cached entries for `key`, re-fetches it, and notifies every
    /// subscriber whose pattern matches. A failed re-fetch is logged, not
    /// raised; a panicking callback does not starve the rest.
    pub async fn trigger_update_notification(&self, key: &str) {
        let prefix = format!("{key}:");
        self.cache_slot().retain(|cache_key, _| !cache_key.starts_with(&prefix));

        let new_value = match self.get_configuration(key, None).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to fetch updated configuration");
                return;
            }
        };

        let subscribers = self.subscriber_slot();
        for (pattern, callbacks) in subscribers.iter() {
            if !matches_pattern(key, pattern) {
                continue;
            }
            for callback in callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(key, &new_value))).is_err() {
                    tracing::error!(key, pattern, "Configuration update callback panicked");
                }
            }
        }
    }
}

/// `prefix*` matches any key with that prefix; anything else is an exact match.
fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
