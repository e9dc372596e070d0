use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    str::FromStr,
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Path, Request},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter, get},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::{
    config::GatewayConfig,
    core::{
        GatewayService, RouteBinding,
        error::{method_not_allowed, not_found},
        shaping::GATEWAY_ID,
        upstream::UpstreamKind,
    },
};

/// HTTP front end: turns the configured route table into an axum router.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    config: Arc<GatewayConfig>,
    metrics: Option<PrometheusHandle>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>, config: Arc<GatewayConfig>) -> Self {
        Self {
            gateway,
            config,
            metrics: None,
        }
    }

    /// Serve `handle`'s scrape output on `metrics.path` when metrics are enabled.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the router. The configuration is expected to have passed
    /// validation; conflicting routes make axum panic here.
    pub fn router(&self) -> Router {
        let health = self.gateway.clone();
        let ready = self.gateway.clone();
        let mut router = Router::new()
            .route(
                "/health",
                get(move || {
                    let gateway = health.clone();
                    async move { health_status(&gateway) }
                }),
            )
            .route(
                "/health/ready",
                get(move || {
                    let gateway = ready.clone();
                    async move { readiness(&gateway) }
                }),
            )
            .route(
                "/health/live",
                get(|| async { Json(serde_json::json!({ "status": "alive" })) }),
            );

        if let Some(handle) = self.metrics.clone().filter(|_| self.config.metrics.enabled) {
            router = router.route(
                &self.config.metrics.path,
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        for (path, method_router) in self.route_table() {
            router = router.route(&path, method_router);
        }

        let fallback_service = self.config.fallback.as_ref().map(|f| f.service.clone());
        let gateway = self.gateway.clone();
        router
            .fallback(move |req: Request| {
                let gateway = gateway.clone();
                let fallback_service = fallback_service.clone();
                async move {
                    match fallback_service {
                        Some(service) => {
                            let peer = peer_addr(&req);
                            gateway.passthrough(&service, req, peer).await
                        }
                        None => {
                            tracing::debug!(http.path = %req.uri().path(), "No route matched");
                            not_found(req.uri().path())
                        }
                    }
                }
            })
            .method_not_allowed_fallback(|method: Method, uri: Uri| async move {
                method_not_allowed(&method, uri.path())
            })
            .layer(TraceLayer::new_for_http())
    }

    /// One `MethodRouter` per distinct path, each method bound to its route.
    fn route_table(&self) -> BTreeMap<String, MethodRouter> {
        let mut table: BTreeMap<String, MethodRouter> = BTreeMap::new();

        for route in &self.config.routes {
            let binding = Arc::new(RouteBinding::new(route.kind, &route.service, &route.target));
            let path = to_axum_path(&route.path);

            for method in &route.methods {
                let filter = Method::from_str(&method.to_ascii_uppercase())
                    .ok()
                    .and_then(|m| MethodFilter::try_from(m).ok());
                let Some(filter) = filter else {
                    tracing::warn!(
                        method = %method,
                        path = %route.path,
                        "Skipping unsupported method"
                    );
                    continue;
                };

                let gateway = self.gateway.clone();
                let binding = binding.clone();
                let handler = move |req: Request| {
                    let gateway = gateway.clone();
                    let binding = binding.clone();
                    async move { route_handler(gateway, binding, req).await }
                };

                let entry = table.remove(&path).unwrap_or_else(MethodRouter::new);
                table.insert(path.clone(), entry.on(filter, handler));
            }

            tracing::debug!(
                path = %route.path,
                methods = ?route.methods,
                service = %route.service,
                kind = %route.kind,
                target = %route.target,
                "Registered route"
            );
        }

        table
    }
}

/// `:name` and `*name` segments in axum's `{name}` / `{*name}` syntax.
pub fn to_axum_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

async fn route_handler(
    gateway: Arc<GatewayService>,
    binding: Arc<RouteBinding>,
    req: Request,
) -> Response {
    let peer = peer_addr(&req);
    let (mut parts, body) = req.into_parts();
    let params = match Path::<HashMap<String, String>>::from_request_parts(&mut parts, &()).await {
        Ok(Path(params)) => params,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to extract path parameters");
            HashMap::new()
        }
    };
    gateway
        .dispatch(&binding, &params, Request::from_parts(parts, body), peer)
        .await
}

fn health_status(gateway: &GatewayService) -> Response {
    let channels = gateway.channels();
    Json(serde_json::json!({
        "status": "healthy",
        "service": GATEWAY_ID,
        "version": env!("CARGO_PKG_VERSION"),
        "upstreams": {
            "internal": channels.len(UpstreamKind::Internal),
            "external": channels.len(UpstreamKind::External),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// Ready once at least one upstream channel exists.
fn readiness(gateway: &GatewayService) -> Response {
    let ready = !gateway.channels().is_empty();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if ready { "ready" } else { "not_ready" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body)).into_response()
}

impl std::fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHandler")
            .field("routes", &self.config.routes.len())
            .field("fallback", &self.config.fallback)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{body::Body as AxumBody, http::header::HOST};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::{RouteConfig, UpstreamConfig},
        core::testing::StubClient,
    };

    fn config(with_fallback: bool) -> GatewayConfig {
        let mut builder = GatewayConfig::builder()
            .service(
                "hr_management",
                UpstreamConfig::new("http://hr.internal:9001").with_timeout(Duration::from_secs(5)),
            )
            .external_service("docker_registry", UpstreamConfig::new("http://registry:5000"))
            .external_service("frontend", UpstreamConfig::new("http://frontend:3000"))
            .route(RouteConfig::new(
                "GET",
                "/api/hr-management/employees/:id",
                "hr_management",
                "/employees/:id",
            ))
            .route(RouteConfig {
                methods: vec!["put".to_string(), "DELETE".to_string()],
                ..RouteConfig::new(
                    "PUT",
                    "/api/hr-management/employees/:id",
                    "hr_management",
                    "/employees/:id",
                )
            })
            .route(RouteConfig::new("GET", "/v2/*path", "docker_registry", "/v2/:path").external());
        if with_fallback {
            builder = builder.fallback("frontend");
        }
        builder.build()
    }

    fn app(config: GatewayConfig, client: Arc<StubClient>) -> Router {
        let gateway = Arc::new(GatewayService::new(&config, client));
        HttpHandler::new(gateway, Arc::new(config)).router()
    }

    fn request(method: &str, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, "gateway.test")
            .body(AxumBody::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_to_axum_path() {
        assert_eq!(
            to_axum_path("/api/hr-management/employees/:id"),
            "/api/hr-management/employees/{id}"
        );
        assert_eq!(to_axum_path("/v2/*path"), "/v2/{*path}");
        assert_eq!(to_axum_path("/api/v1/goals"), "/api/v1/goals");
    }

    #[tokio::test]
    async fn test_configured_route_is_dispatched() {
        let client = Arc::new(StubClient::ok("{}"));
        let response = app(config(false), client.clone())
            .oneshot(request("GET", "/api/hr-management/employees/42"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            client.last_request().unwrap().uri,
            "http://hr.internal:9001/employees/42"
        );
    }

    #[tokio::test]
    async fn test_methods_from_several_routes_share_a_path() {
        let client = Arc::new(StubClient::ok(""));
        let router = app(config(false), client.clone());

        let response = router
            .clone()
            .oneshot(request("DELETE", "/api/hr-management/employees/42"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(client.last_request().unwrap().method, Method::DELETE);
    }

    #[tokio::test]
    async fn test_wildcard_capture_fills_target() {
        let client = Arc::new(StubClient::ok(""));
        let response = app(config(false), client.clone())
            .oneshot(request("GET", "/v2/library/alpine/manifests/latest"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            client.last_request().unwrap().uri,
            "http://registry:5000/v2/library/alpine/manifests/latest"
        );
    }

    #[tokio::test]
    async fn test_unmatched_path_without_fallback_is_404() {
        let client = Arc::new(StubClient::ok(""));
        let response = app(config(false), client.clone())
            .oneshot(request("GET", "/nowhere"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "error": "Not Found",
                "message": "The requested endpoint does not exist",
                "path": "/nowhere",
            })
        );
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_path_goes_to_fallback() {
        let client = Arc::new(StubClient::ok("<html></html>"));
        let response = app(config(true), client.clone())
            .oneshot(request("GET", "/dashboard?tab=team"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            client.last_request().unwrap().uri,
            "http://frontend:3000/dashboard?tab=team"
        );
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let client = Arc::new(StubClient::ok(""));
        let response = app(config(true), client.clone())
            .oneshot(request("PATCH", "/api/hr-management/employees/42"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "error": "Method Not Allowed",
                "message": "Method PATCH is not allowed for this endpoint",
                "path": "/api/hr-management/employees/42",
            })
        );
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_health_endpoints_are_local() {
        let client = Arc::new(StubClient::ok(""));
        let router = app(config(true), client.clone());

        let health = router.clone().oneshot(request("GET", "/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let body = body_json(health).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["upstreams"]["internal"], 1);
        assert_eq!(body["upstreams"]["external"], 2);

        let ready = router.clone().oneshot(request("GET", "/health/ready")).await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        let live = router.oneshot(request("GET", "/health/live")).await.unwrap();
        assert_eq!(body_json(live).await["status"], "alive");
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_not_ready_without_upstreams() {
        let client = Arc::new(StubClient::ok(""));
        let response = app(GatewayConfig::default(), client)
            .oneshot(request("GET", "/health/ready"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_recorder() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            crate::metrics::increment_requests("hr_management", "internal", "completed", 200);
        });

        let config = Arc::new(config(false));
        let gateway = Arc::new(GatewayService::new(&config, Arc::new(StubClient::ok(""))));
        let router = HttpHandler::new(gateway, config)
            .with_metrics(handle)
            .router();

        let response = router.oneshot(request("GET", "/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#"gateway_requests_total{service="hr_management""#));
    }

    #[tokio::test]
    async fn test_disabled_metrics_are_not_served() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let mut config = config(false);
        config.metrics.enabled = false;
        let config = Arc::new(config);
        let gateway = Arc::new(GatewayService::new(&config, Arc::new(StubClient::ok(""))));
        let router = HttpHandler::new(gateway, config)
            .with_metrics(recorder.handle())
            .router();

        let response = router.oneshot(request("GET", "/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
