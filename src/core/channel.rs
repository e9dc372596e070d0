//! Forwarding channels: one per registered upstream, built once at startup.
//!
//! A channel owns its upstream descriptor and delegates the three
//! customization points of a forward (request mutation, response mutation,
//! failure translation) to a [`ChannelHooks`] implementation. The default,
//! [`GatewayHooks`], applies the gateway's header shaping and turns
//! connection failures into `502 Bad Gateway`.
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use axum::{body::Body, response::IntoResponse};
use http::{HeaderValue, Method, Request, Response, header::HOST};
use uuid::Uuid;

use crate::{
    core::{
        error::GatewayError,
        shaping,
        upstream::{UpstreamDescriptor, UpstreamKind, UpstreamRegistry},
        websocket,
    },
    metrics,
    ports::http_client::{HttpClient, HttpClientError},
};

/// Per-call state shared by the shaper, the channel and the supervisor.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    pub id: Uuid,
    pub service: String,
    pub method: Method,
    /// Path as received by the gateway.
    pub original_path: String,
    /// Path sent to the upstream after template substitution.
    pub outbound_path: String,
    pub query: Option<String>,
    pub inbound_host: Option<HeaderValue>,
    pub peer: Option<SocketAddr>,
    pub started: Instant,
}

impl InFlightRequest {
    pub fn new<B>(
        req: &Request<B>,
        service: &str,
        outbound_path: impl Into<String>,
        peer: Option<SocketAddr>,
    ) -> Self {
        let inbound_host = req.headers().get(HOST).cloned().or_else(|| {
            req.uri()
                .authority()
                .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        });

        Self {
            id: Uuid::new_v4(),
            service: service.to_string(),
            method: req.method().clone(),
            original_path: req.uri().path().to_string(),
            outbound_path: outbound_path.into(),
            query: req.uri().query().map(str::to_string),
            inbound_host,
            peer,
            started: Instant::now(),
        }
    }

    /// A call that keeps the inbound path unchanged.
    pub fn passthrough<B>(req: &Request<B>, service: &str, peer: Option<SocketAddr>) -> Self {
        let path = req.uri().path().to_string();
        Self::new(req, service, path, peer)
    }

    /// Inbound path and query, for logs.
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.original_path),
            None => self.original_path.clone(),
        }
    }
}

/// Customization points of a forwarding channel.
pub trait ChannelHooks: Send + Sync + 'static {
    /// Rewrite the request before it leaves the gateway.
    fn on_request(
        &self,
        req: &mut Request<Body>,
        upstream: &UpstreamDescriptor,
        call: &InFlightRequest,
    ) -> Result<(), GatewayError>;

    /// Adjust a response returned by the upstream.
    fn on_response(
        &self,
        res: &mut Response<Body>,
        upstream: &UpstreamDescriptor,
        call: &InFlightRequest,
    );

    /// Produce the client response for a failed forward. Terminal for the call.
    fn on_error(
        &self,
        error: GatewayError,
        upstream: &UpstreamDescriptor,
        call: &InFlightRequest,
    ) -> Response<Body>;
}

/// Header shaping plus `502` translation.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayHooks;

impl ChannelHooks for GatewayHooks {
    fn on_request(
        &self,
        req: &mut Request<Body>,
        upstream: &UpstreamDescriptor,
        call: &InFlightRequest,
    ) -> Result<(), GatewayError> {
        shaping::shape_request(req, upstream, call)
    }

    fn on_response(
        &self,
        res: &mut Response<Body>,
        _upstream: &UpstreamDescriptor,
        _call: &InFlightRequest,
    ) {
        shaping::shape_response(res);
    }

    fn on_error(
        &self,
        error: GatewayError,
        upstream: &UpstreamDescriptor,
        call: &InFlightRequest,
    ) -> Response<Body> {
        tracing::error!(
            request.id = %call.id,
            service = %upstream.name,
            http.method = %call.method,
            http.url = %call.url(),
            error = %error,
            "Proxy error"
        );
        error.into_response()
    }
}

/// Reusable, read-only forwarder bound to one upstream.
pub struct ForwardingChannel {
    upstream: Arc<UpstreamDescriptor>,
    client: Arc<dyn HttpClient>,
    hooks: Arc<dyn ChannelHooks>,
}

impl ForwardingChannel {
    pub fn new(
        upstream: Arc<UpstreamDescriptor>,
        client: Arc<dyn HttpClient>,
        hooks: Arc<dyn ChannelHooks>,
    ) -> Self {
        Self {
            upstream,
            client,
            hooks,
        }
    }

    pub fn upstream(&self) -> &UpstreamDescriptor {
        &self.upstream
    }

    /// Forward one request. Never fails: errors become the hook's response.
    ///
    /// WebSocket upgrade requests are relayed once the upstream agrees to
    /// switch protocols; the relay outlives this call.
    pub async fn forward(&self, mut req: Request<Body>, call: &InFlightRequest) -> Response<Body> {
        let client_upgrade = websocket::take_client_upgrade(&mut req);

        if let Err(error) = self.hooks.on_request(&mut req, &self.upstream, call) {
            return self.hooks.on_error(error, &self.upstream, call);
        }

        let _timer = metrics::UpstreamTimer::new(&self.upstream.name);
        match self.client.send_request(req).await {
            Ok(mut response) => {
                if let Some(client_upgrade) = client_upgrade {
                    websocket::relay_upgrade(client_upgrade, &mut response, call);
                }
                self.hooks.on_response(&mut response, &self.upstream, call);
                response
            }
            Err(error) => {
                let cause = match error {
                    HttpClientError::ConnectionError(cause) => cause,
                    other => other.to_string(),
                };
                self.hooks.on_error(
                    GatewayError::UpstreamUnreachable { cause },
                    &self.upstream,
                    call,
                )
            }
        }
    }
}

/// Every forwarding channel, split by registry partition.
#[derive(Clone, Default)]
pub struct ChannelTable {
    internal: HashMap<String, Arc<ForwardingChannel>>,
    external: HashMap<String, Arc<ForwardingChannel>>,
}

impl ChannelTable {
    /// Build one channel per registered upstream.
    pub fn build(
        registry: &UpstreamRegistry,
        client: Arc<dyn HttpClient>,
        hooks: Arc<dyn ChannelHooks>,
    ) -> Self {
        let mut table = Self::default();
        for kind in [UpstreamKind::Internal, UpstreamKind::External] {
            for descriptor in registry.descriptors(kind) {
                tracing::info!(
                    service = %descriptor.name,
                    kind = %kind,
                    target = %descriptor.base_url,
                    timeout = ?descriptor.timeout,
                    "Created proxy"
                );
                let channel =
                    ForwardingChannel::new(descriptor.clone(), client.clone(), hooks.clone());
                table
                    .partition_mut(kind)
                    .insert(descriptor.name.clone(), Arc::new(channel));
            }
        }
        table
    }

    pub fn get(&self, kind: UpstreamKind, name: &str) -> Option<Arc<ForwardingChannel>> {
        match kind {
            UpstreamKind::Internal => self.internal.get(name).cloned(),
            UpstreamKind::External => self.external.get(name).cloned(),
        }
    }

    pub fn len(&self, kind: UpstreamKind) -> usize {
        match kind {
            UpstreamKind::Internal => self.internal.len(),
            UpstreamKind::External => self.external.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }

    fn partition_mut(
        &mut self,
        kind: UpstreamKind,
    ) -> &mut HashMap<String, Arc<ForwardingChannel>> {
        match kind {
            UpstreamKind::Internal => &mut self.internal,
            UpstreamKind::External => &mut self.external,
        }
    }
}
