use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};

use http::Method;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config::models::{GatewayConfig, RouteConfig, UpstreamConfig},
    core::{gateway::HEALTH_PATHS, path_template, upstream::UpstreamKind},
};

/// Methods a route may be bound to.
const ROUTABLE_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
    Method::CONNECT,
];

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

static SERVICE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").expect("valid service name pattern")
});

static CAPTURE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid capture name pattern"));

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Unknown {kind} service '{service}' referenced by {referrer}")]
    UnknownService {
        kind: &'static str,
        service: String,
        referrer: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
///
/// Hard errors prevent startup. Problems the gateway tolerates at runtime
/// (an unparsable upstream address, a route naming a service nobody
/// registered) are reported by [`ServerConfigValidator::warnings`] instead:
/// such routes answer 500 and the rest of the gateway keeps serving.
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_duration(config.default_timeout, "default_timeout") {
            errors.push(e);
        }
        if let Err(e) =
            Self::validate_duration(config.client.connect_timeout, "client.connect_timeout")
        {
            errors.push(e);
        }

        for kind in [UpstreamKind::Internal, UpstreamKind::External] {
            for (name, upstream) in config.upstreams(kind) {
                errors.extend(Self::validate_upstream(kind, name, upstream));
            }
        }

        for (index, route) in config.routes.iter().enumerate() {
            errors.extend(Self::validate_single_route(index, route));
        }

        if let Err(conflicts) = Self::check_route_conflicts(&config.routes) {
            errors.extend(conflicts);
        }

        errors.extend(Self::validate_metrics_path(config));

        if let Some(fallback) = &config.fallback {
            if fallback.service.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "fallback.service".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Collect non-fatal findings worth surfacing at startup.
    pub fn warnings(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut warnings = Vec::new();

        for kind in [UpstreamKind::Internal, UpstreamKind::External] {
            for (name, upstream) in config.upstreams(kind) {
                if let Err(e) =
                    Self::validate_url(&upstream.base_url, &format!("{kind} service '{name}'"))
                {
                    warnings.push(e);
                }
            }
        }

        for route in &config.routes {
            if let Some(w) = Self::check_service_reference(
                config.upstreams(route.kind),
                route.kind,
                &route.service,
                format!("route '{}'", route.path),
            ) {
                warnings.push(w);
            }

            let captures = path_template::placeholders(&route.path);
            for name in path_template::placeholders(&route.target) {
                if !captures.contains(&name) {
                    warnings.push(ValidationError::InvalidField {
                        field: format!("route '{}' target", route.path),
                        message: format!(
                            "placeholder ':{name}' is not captured by the route path and will be forwarded literally"
                        ),
                    });
                }
            }
        }

        if let Some(fallback) = &config.fallback {
            if let Some(w) = Self::check_service_reference(
                &config.external_services,
                UpstreamKind::External,
                &fallback.service,
                "fallback".to_string(),
            ) {
                warnings.push(w);
            }
        }

        warnings
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_duration(value: Duration, field: &str) -> ValidationResult<()> {
        if value.is_zero() {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Duration must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_upstream(
        kind: UpstreamKind,
        name: &str,
        upstream: &UpstreamConfig,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !SERVICE_NAME.is_match(name) {
            errors.push(ValidationError::InvalidField {
                field: format!("{kind} service '{name}'"),
                message: "Service names may only contain letters, digits, '_' and '-'"
                    .to_string(),
            });
        }

        if let Some(timeout) = upstream.timeout {
            let field = format!("{kind} service '{name}' timeout");
            if let Err(e) = Self::validate_duration(timeout, &field) {
                errors.push(e);
            }
        }

        errors
    }

    /// Validate a single route configuration
    fn validate_single_route(index: usize, route: &RouteConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let label = format!("routes[{index}] ({})", route.path);

        if !route.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} path"),
                message: "Route paths must start with '/'".to_string(),
            });
        }

        if !route.target.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} target"),
                message: "Target templates must start with '/'".to_string(),
            });
        }

        if route.service.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{label} service"),
            });
        }

        if route.methods.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{label} methods"),
            });
        }
        for method in &route.methods {
            let routable = Method::from_str(&method.to_ascii_uppercase())
                .is_ok_and(|m| ROUTABLE_METHODS.contains(&m));
            if !routable {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} methods"),
                    message: format!("'{method}' is not a routable HTTP method"),
                });
            }
        }

        if HEALTH_PATHS.contains(&route.path.as_str()) {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} path"),
                message: "Path is reserved for gateway health checks".to_string(),
            });
        }

        if route.path.contains(['{', '}']) {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} path"),
                message: "Route paths may not contain '{' or '}'".to_string(),
            });
        }

        let segments: Vec<&str> = route.path.split('/').collect();
        for segment in &segments {
            let name = segment
                .strip_prefix(':')
                .or_else(|| segment.strip_prefix('*'));
            if let Some(name) = name {
                if !CAPTURE_NAME.is_match(name) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{label} path"),
                        message: format!(
                            "Capture segment '{segment}' needs a name of letters, digits or '_'"
                        ),
                    });
                }
            }
        }
        if let Some((_, init)) = segments.split_last() {
            if let Some(segment) = init.iter().find(|s| s.starts_with('*')) {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} path"),
                    message: format!("Wildcard segment '{segment}' must be the last segment"),
                });
            }
        }

        errors
    }

    /// The scrape path is served by the gateway itself when metrics are on.
    fn validate_metrics_path(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !config.metrics.enabled {
            return errors;
        }

        let path = config.metrics.path.as_str();
        if !path.starts_with('/') || path.contains([':', '*', '{', '}']) {
            errors.push(ValidationError::InvalidField {
                field: "metrics.path".to_string(),
                message: "Metrics path must be a literal path starting with '/'".to_string(),
            });
        }
        if HEALTH_PATHS.contains(&path) {
            errors.push(ValidationError::InvalidField {
                field: "metrics.path".to_string(),
                message: "Path is reserved for gateway health checks".to_string(),
            });
        }
        if let Some(route) = config.routes.iter().find(|route| route.path == path) {
            errors.push(ValidationError::RouteConflict {
                message: format!("{} is served as the metrics endpoint", route.path),
            });
        }
        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn check_service_reference(
        upstreams: &BTreeMap<String, UpstreamConfig>,
        kind: UpstreamKind,
        service: &str,
        referrer: String,
    ) -> Option<ValidationError> {
        if upstreams.contains_key(service) {
            return None;
        }
        Some(ValidationError::UnknownService {
            kind: kind.as_str(),
            service: service.to_string(),
            referrer,
        })
    }

    /// `/a/:id` and `/a/:name` have the same shape.
    fn path_shape(path: &str) -> String {
        path.split('/')
            .map(|segment| {
                if segment.starts_with(':') {
                    ":"
                } else if segment.starts_with('*') {
                    "*"
                } else {
                    segment
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Two routes may share a path only with disjoint method sets, and paths
    /// of the same shape must name their captures identically.
    fn check_route_conflicts(routes: &[RouteConfig]) -> Result<(), Vec<ValidationError>> {
        let mut seen = HashSet::new();
        let mut shapes: HashMap<String, &str> = HashMap::new();
        let mut errors = Vec::new();

        for route in routes {
            let shape = Self::path_shape(&route.path);
            match shapes.get(&shape) {
                Some(existing) if *existing != route.path => {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "{} and {} match the same requests with different capture names",
                            existing, route.path
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    shapes.insert(shape, &route.path);
                }
            }

            for method in &route.methods {
                let key = (method.to_ascii_uppercase(), route.path.clone());
                if !seen.insert(key) {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "{} {} is declared more than once",
                            method.to_ascii_uppercase(),
                            route.path
                        ),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Format multiple errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
