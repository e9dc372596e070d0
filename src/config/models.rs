//! Configuration data model for the gateway.
//!
//! All structures are serde-friendly and carry defaults so that a minimal
//! configuration only needs upstreams and routes. Durations are written as
//! humantime strings (`"5s"`, `"2m"`).
use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::upstream::UpstreamKind;

/// Timeout applied to an upstream that does not declare its own.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_UPSTREAM_TIMEOUT
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Timeout used for upstreams without an explicit `timeout`.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Upper bound on connection draining once a shutdown signal arrives.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Internal backend services keyed by logical name.
    #[serde(default)]
    pub services: BTreeMap<String, UpstreamConfig>,
    /// External services keyed by logical name.
    #[serde(default)]
    pub external_services: BTreeMap<String, UpstreamConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Catch-all passthrough for requests no route matched.
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Upstream table for one registry partition.
    pub fn upstreams(&self, kind: UpstreamKind) -> &BTreeMap<String, UpstreamConfig> {
        match kind {
            UpstreamKind::Internal => &self.services,
            UpstreamKind::External => &self.external_services,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            default_timeout: default_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
            debug: DebugConfig::default(),
            metrics: MetricsConfig::default(),
            services: BTreeMap::new(),
            external_services: BTreeMap::new(),
            routes: Vec::new(),
            fallback: None,
        }
    }
}

/// A single upstream: where it lives and how long a call to it may take.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Binds an inbound method/path pattern to an upstream and a target template.
///
/// `path` uses `:name` for a single segment and `*name` for the remainder of
/// the path. `target` may reference either kind of capture as `:name`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    pub path: String,
    pub service: String,
    #[serde(default)]
    pub kind: UpstreamKind,
    pub target: String,
}

impl RouteConfig {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        service: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            methods: vec![method.into()],
            path: path.into(),
            service: service.into(),
            kind: UpstreamKind::Internal,
            target: target.into(),
        }
    }

    pub fn external(mut self) -> Self {
        self.kind = UpstreamKind::External;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Name of an external service.
    pub service: String,
}

/// Settings for the outbound connection pool.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
    /// Attach the active span list to JSON log lines.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            include_spans: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Log inbound request body chunks as they are forwarded.
    pub log_request_bodies: bool,
}

/// Prometheus scrape endpoint served on the gateway listener.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Builder for GatewayConfig, mostly used by tests and embedders
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Register an internal backend service
    pub fn service(mut self, name: impl Into<String>, upstream: UpstreamConfig) -> Self {
        self.config.services.insert(name.into(), upstream);
        self
    }

    /// Register an external service
    pub fn external_service(mut self, name: impl Into<String>, upstream: UpstreamConfig) -> Self {
        self.config.external_services.insert(name.into(), upstream);
        self
    }

    pub fn route(mut self, route: RouteConfig) -> Self {
        self.config.routes.push(route);
        self
    }

    /// Route unmatched requests to an external service
    pub fn fallback(mut self, service: impl Into<String>) -> Self {
        self.config.fallback = Some(FallbackConfig {
            service: service.into(),
        });
        self
    }

    pub fn client(mut self, client: ClientConfig) -> Self {
        self.config.client = client;
        self
    }

    pub fn log_request_bodies(mut self, enabled: bool) -> Self {
        self.config.debug.log_request_bodies = enabled;
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

/// Serde adapters for humantime duration strings.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| D::Error::custom(format!("invalid duration '{raw}': {e}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            raw.map(|raw| {
                humantime::parse_duration(raw.trim())
                    .map_err(|e| D::Error::custom(format!("invalid duration '{raw}': {e}")))
            })
            .transpose()
        }
    }
}
