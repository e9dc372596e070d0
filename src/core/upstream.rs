//! Upstream registry: logical service name to base address and timeout.
//!
//! The registry is split into two independent partitions (internal backend
//! services and external services). It is filled once at startup and only
//! read afterwards, so lookups need no synchronization.
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use http::{HeaderValue, Uri, uri::Authority};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::{DEFAULT_UPSTREAM_TIMEOUT, GatewayConfig},
    core::error::GatewayError,
};

/// Which registry partition an upstream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    #[default]
    Internal,
    External,
}

impl UpstreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamKind::Internal => "internal",
            UpstreamKind::External => "external",
        }
    }
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved upstream.
#[derive(Debug, Clone)]
pub struct UpstreamDescriptor {
    pub name: String,
    pub kind: UpstreamKind,
    pub base_url: Url,
    pub authority: Authority,
    pub host_header: HeaderValue,
    pub timeout: Duration,
}

impl UpstreamDescriptor {
    /// Parse a base address into a descriptor.
    ///
    /// The address must be an absolute `http` or `https` URL with a host.
    pub fn parse(
        kind: UpstreamKind,
        name: &str,
        base_address: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let malformed = |reason: String| GatewayError::MalformedUpstreamAddress {
            service: name.to_string(),
            address: base_address.to_string(),
            reason,
        };

        let base_url = Url::parse(base_address).map_err(|e| malformed(e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(malformed(format!(
                "unsupported scheme '{}'",
                base_url.scheme()
            )));
        }
        let host = base_url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| malformed("missing host".to_string()))?;
        // `Url` drops a default port such as `:80`; the raw address keeps it.
        let port = base_address
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.port_u16())
            .or(base_url.port());
        let authority = match port {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = authority
            .parse::<Authority>()
            .map_err(|e| malformed(e.to_string()))?;
        let host_header =
            HeaderValue::from_str(authority.as_str()).map_err(|e| malformed(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            kind,
            base_url,
            authority,
            host_header,
            timeout,
        })
    }

    pub fn scheme(&self) -> &str {
        self.base_url.scheme()
    }

    /// `host[:port]` of the upstream, as sent in `Host` and `X-Origin-Host`.
    pub fn host(&self) -> &str {
        self.authority.as_str()
    }

    /// Build the absolute outbound URI for a path (and optional query).
    ///
    /// The path is appended to any path prefix carried by the base address.
    /// Characters that are not valid in a URI path are percent-encoded.
    pub fn endpoint(&self, path: &str, query: Option<&str>) -> Result<Uri, GatewayError> {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        let path = if path.starts_with('/') {
            format!("{prefix}{path}")
        } else {
            format!("{prefix}/{path}")
        };
        url.set_path(&path);
        url.set_query(query);
        url.set_fragment(None);

        url.as_str()
            .parse::<Uri>()
            .map_err(|e| GatewayError::UpstreamUnreachable {
                cause: format!("invalid outbound URI '{url}': {e}"),
            })
    }
}

/// Two-partition table of upstream descriptors.
#[derive(Debug, Clone)]
pub struct UpstreamRegistry {
    internal: HashMap<String, Arc<UpstreamDescriptor>>,
    external: HashMap<String, Arc<UpstreamDescriptor>>,
    default_timeout: Duration,
}

impl UpstreamRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        let default_timeout = if default_timeout.is_zero() {
            DEFAULT_UPSTREAM_TIMEOUT
        } else {
            default_timeout
        };
        Self {
            internal: HashMap::new(),
            external: HashMap::new(),
            default_timeout,
        }
    }

    /// Build both partitions from configuration, skipping malformed entries.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut registry = Self::new(config.default_timeout);
        for kind in [UpstreamKind::Internal, UpstreamKind::External] {
            for (name, upstream) in config.upstreams(kind) {
                registry.register(kind, name, &upstream.base_url, upstream.timeout);
            }
        }
        tracing::info!(
            internal = registry.len(UpstreamKind::Internal),
            external = registry.len(UpstreamKind::External),
            "Upstream registry built"
        );
        registry
    }

    /// Register an upstream. Returns `false` if the address was rejected.
    ///
    /// A rejected upstream is logged and left out; dispatching to it later
    /// yields a configuration error instead of aborting startup.
    pub fn register(
        &mut self,
        kind: UpstreamKind,
        name: &str,
        base_address: &str,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = match timeout {
            Some(t) if t.is_zero() => {
                tracing::warn!(
                    service = name,
                    fallback = ?self.default_timeout,
                    "Zero timeout configured, using fallback"
                );
                self.default_timeout
            }
            Some(t) => t,
            None => self.default_timeout,
        };

        match UpstreamDescriptor::parse(kind, name, base_address, timeout) {
            Ok(descriptor) => {
                tracing::debug!(
                    service = name,
                    kind = %kind,
                    target = %descriptor.base_url,
                    timeout = ?descriptor.timeout,
                    "Registered upstream"
                );
                if self
                    .partition_mut(kind)
                    .insert(name.to_string(), Arc::new(descriptor))
                    .is_some()
                {
                    tracing::warn!(
                        service = name,
                        kind = %kind,
                        "Upstream registered twice, keeping the latest"
                    );
                }
                true
            }
            Err(e) => {
                tracing::error!(
                    service = name,
                    kind = %kind,
                    error = %e,
                    "Failed to parse upstream URL"
                );
                false
            }
        }
    }

    pub fn lookup(&self, kind: UpstreamKind, name: &str) -> Option<Arc<UpstreamDescriptor>> {
        self.partition(kind).get(name).cloned()
    }

    pub fn len(&self, kind: UpstreamKind) -> usize {
        self.partition(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn descriptors(
        &self,
        kind: UpstreamKind,
    ) -> impl Iterator<Item = &Arc<UpstreamDescriptor>> {
        self.partition(kind).values()
    }

    fn partition(&self, kind: UpstreamKind) -> &HashMap<String, Arc<UpstreamDescriptor>> {
        match kind {
            UpstreamKind::Internal => &self.internal,
            UpstreamKind::External => &self.external,
        }
    }

    fn partition_mut(
        &mut self,
        kind: UpstreamKind,
    ) -> &mut HashMap<String, Arc<UpstreamDescriptor>> {
        match kind {
            UpstreamKind::Internal => &mut self.internal,
            UpstreamKind::External => &mut self.external,
        }
    }
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = UpstreamRegistry::default();
        assert!(registry.register(
            UpstreamKind::Internal,
            "hr_management",
            "http://localhost:9001",
            Some(Duration::from_secs(5)),
        ));

        let descriptor = registry
            .lookup(UpstreamKind::Internal, "hr_management")
            .unwrap();
        assert_eq!(descriptor.host(), "localhost:9001");
        assert_eq!(descriptor.scheme(), "http");
        assert_eq!(descriptor.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_address_is_skipped() {
        let mut registry = UpstreamRegistry::default();
        assert!(!registry.register(UpstreamKind::Internal, "broken", "not a url", None));
        assert!(registry.lookup(UpstreamKind::Internal, "broken").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_non_http_scheme_is_rejected() {
        let mut registry = UpstreamRegistry::default();
        assert!(!registry.register(UpstreamKind::External, "ftp", "ftp://files.local", None));
        assert!(!registry.register(UpstreamKind::External, "mail", "mailto:ops@example.com", None));
        assert_eq!(registry.len(UpstreamKind::External), 0);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut registry = UpstreamRegistry::default();
        registry.register(UpstreamKind::External, "ollama", "http://localhost:11434", None);

        assert!(registry.lookup(UpstreamKind::External, "ollama").is_some());
        assert!(registry.lookup(UpstreamKind::Internal, "ollama").is_none());
    }

    #[test]
    fn test_missing_or_zero_timeout_uses_fallback() {
        let mut registry = UpstreamRegistry::new(Duration::from_secs(12));
        registry.register(UpstreamKind::Internal, "a", "http://a.local", None);
        registry.register(UpstreamKind::Internal, "b", "http://b.local", Some(Duration::ZERO));

        for name in ["a", "b"] {
            let descriptor = registry.lookup(UpstreamKind::Internal, name).unwrap();
            assert_eq!(descriptor.timeout, Duration::from_secs(12));
        }
    }

    #[test]
    fn test_zero_default_timeout_is_never_used() {
        let registry = UpstreamRegistry::new(Duration::ZERO);
        assert_eq!(registry.default_timeout(), DEFAULT_UPSTREAM_TIMEOUT);
    }

    #[test]
    fn test_explicit_default_port_is_kept() {
        let descriptor = UpstreamDescriptor::parse(
            UpstreamKind::Internal,
            "project_management",
            "http://project-management:80",
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(descriptor.host(), "project-management:80");
        assert_eq!(descriptor.host_header, "project-management:80");

        let implicit = UpstreamDescriptor::parse(
            UpstreamKind::Internal,
            "project_management",
            "http://project-management",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(implicit.host(), "project-management");
    }

    #[test]
    fn test_endpoint_joins_base_path_and_keeps_query() {
        let descriptor = UpstreamDescriptor::parse(
            UpstreamKind::External,
            "registry",
            "https://registry.local:5000/mirror/",
            Duration::from_secs(1),
        )
        .unwrap();

        let uri = descriptor
            .endpoint("/v2/library/nginx", Some("n=10"))
            .unwrap();
        assert_eq!(
            uri.to_string(),
            "https://registry.local:5000/mirror/v2/library/nginx?n=10"
        );
    }

    #[test]
    fn test_endpoint_encodes_decoded_parameter_values() {
        let descriptor = UpstreamDescriptor::parse(
            UpstreamKind::Internal,
            "hr_management",
            "http://localhost:9001",
            Duration::from_secs(1),
        )
        .unwrap();

        let uri = descriptor.endpoint("/teams/platform team", None).unwrap();
        assert_eq!(uri.path(), "/teams/platform%20team");
    }
}
