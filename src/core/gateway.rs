//! Core gateway orchestration service.
//!
//! `GatewayService` owns the upstream registry and one forwarding channel per
//! registered upstream, both built once from configuration. Route handlers
//! call [`GatewayService::dispatch`] for configured routes and
//! [`GatewayService::passthrough`] for the catch-all frontend.
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::Request;
use http_body_util::BodyExt;
use tracing::Instrument;

use crate::{
    config::GatewayConfig,
    core::{
        channel::{ChannelHooks, ChannelTable, GatewayHooks, InFlightRequest},
        error::GatewayError,
        path_template::substitute_path_params,
        supervisor::{self, CallState},
        upstream::{UpstreamKind, UpstreamRegistry},
        websocket,
    },
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
};

/// Paths answered by the gateway itself; routes may not claim them.
pub const HEALTH_PATHS: [&str; 3] = ["/health", "/health/ready", "/health/live"];

/// Logged request body chunks are cut to this many bytes.
const BODY_LOG_LIMIT: usize = 1024;

/// What a matched route forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub kind: UpstreamKind,
    pub service: String,
    /// Outbound path template, `:name` placeholders filled from the route.
    pub target: String,
}

impl RouteBinding {
    pub fn new(kind: UpstreamKind, service: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            service: service.into(),
            target: target.into(),
        }
    }
}

/// Central orchestrator. Immutable once built; share it behind an `Arc`.
pub struct GatewayService {
    registry: UpstreamRegistry,
    channels: ChannelTable,
    log_request_bodies: bool,
}

impl GatewayService {
    pub fn new(config: &GatewayConfig, client: Arc<dyn HttpClient>) -> Self {
        Self::with_hooks(config, client, Arc::new(GatewayHooks))
    }

    /// Build with custom channel hooks.
    pub fn with_hooks(
        config: &GatewayConfig,
        client: Arc<dyn HttpClient>,
        hooks: Arc<dyn ChannelHooks>,
    ) -> Self {
        let registry = UpstreamRegistry::from_config(config);
        let channels = ChannelTable::build(&registry, client, hooks);
        tracing::info!(
            internal = channels.len(UpstreamKind::Internal),
            external = channels.len(UpstreamKind::External),
            default_timeout = ?registry.default_timeout(),
            "Gateway service ready"
        );
        Self {
            registry,
            channels,
            log_request_bodies: config.debug.log_request_bodies,
        }
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// Forward a routed request under the upstream's deadline.
    pub async fn dispatch(
        &self,
        binding: &RouteBinding,
        params: &HashMap<String, String>,
        req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Response {
        let Some(channel) = self.channels.get(binding.kind, &binding.service) else {
            tracing::error!(
                service = %binding.service,
                kind = %binding.kind,
                http.method = %req.method(),
                http.path = %req.uri().path(),
                "Proxy not found for service"
            );
            let response = GatewayError::ConfigurationMissing {
                service: binding.service.clone(),
            }
            .into_response();
            metrics::increment_requests(
                &binding.service,
                binding.kind.as_str(),
                "config_missing",
                response.status().as_u16(),
            );
            return response;
        };

        let outbound_path = substitute_path_params(&binding.target, params);
        let call = InFlightRequest::new(&req, &binding.service, outbound_path, peer);
        let span = tracing_setup::create_request_span(
            call.method.as_str(),
            &call.original_path,
            &call.id.to_string(),
            &call.service,
        );

        async move {
            tracing::info!(
                target_path = %call.outbound_path,
                upstream = %channel.upstream().base_url,
                "Proxying request"
            );

            let req = if self.log_request_bodies {
                tap_request_body(req, &call)
            } else {
                req
            };

            let timeout = channel.upstream().timeout;
            let forward = {
                let channel = channel.clone();
                let call = call.clone();
                async move { channel.forward(req, &call).await }
            };
            let outcome = supervisor::supervise(&call, timeout, forward).await;

            let status = outcome.response.status();
            let span = tracing::Span::current();
            span.record("http.status_code", status.as_u16());
            span.record("duration_ms", call.started.elapsed().as_millis() as u64);
            tracing::debug!(state = outcome.state.as_str(), "Call finished");

            let outcome_label = match outcome.state {
                CallState::TimedOut => "timed_out",
                _ => "completed",
            };
            metrics::increment_requests(
                &call.service,
                binding.kind.as_str(),
                outcome_label,
                status.as_u16(),
            );
            outcome.response
        }
        .instrument(span)
        .await
    }

    /// Forward an unmatched request to an external service unchanged.
    ///
    /// No gateway deadline applies, so long-lived streams and WebSocket
    /// upgrades stay open for as long as both ends want.
    pub async fn passthrough(
        &self,
        service: &str,
        req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Response {
        let Some(channel) = self.channels.get(UpstreamKind::External, service) else {
            tracing::error!(service = %service, "Fallback service not configured");
            return GatewayError::ConfigurationMissing {
                service: service.to_string(),
            }
            .into_response();
        };

        let call = InFlightRequest::passthrough(&req, service, peer);
        if websocket::is_websocket_upgrade(req.headers()) {
            tracing::info!(
                request.id = %call.id,
                service = %service,
                http.path = %call.original_path,
                "WebSocket upgrade request"
            );
        } else {
            tracing::debug!(
                request.id = %call.id,
                service = %service,
                http.method = %call.method,
                http.url = %call.url(),
                "Passing request through to fallback"
            );
        }

        let response = channel.forward(req, &call).await;
        metrics::increment_requests(
            service,
            UpstreamKind::External.as_str(),
            "completed",
            response.status().as_u16(),
        );
        response
    }
}

/// Log request body chunks as they stream through, without buffering.
fn tap_request_body(req: Request<Body>, call: &InFlightRequest) -> Request<Body> {
    let request_id = call.id;
    let service = call.service.clone();
    req.map(move |body| {
        Body::new(body.map_frame(move |frame| {
            if let Some(data) = frame.data_ref() {
                let shown = &data[..data.len().min(BODY_LOG_LIMIT)];
                tracing::info!(
                    request.id = %request_id,
                    service = %service,
                    bytes = data.len(),
                    body = %String::from_utf8_lossy(shown),
                    "Request body chunk"
                );
            }
            frame
        }))
    })
}
