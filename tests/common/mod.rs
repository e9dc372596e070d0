#![allow(dead_code)]

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use axum::{Json, Router, body::to_bytes, extract::Request};
use ugjb_gateway::{GatewayService, HttpClientAdapter, HttpHandler, config::GatewayConfig};

/// Serve `router` on an ephemeral local port.
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An upstream that answers every request with what it received.
pub fn echo_router() -> Router {
    Router::new().fallback(|req: Request| async move {
        let (parts, body) = req.into_parts();
        let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
        let headers: BTreeMap<String, String> = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        Json(serde_json::json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
    })
}

/// Run the full gateway stack for `config` on an ephemeral port.
pub async fn spawn_gateway(config: GatewayConfig) -> SocketAddr {
    let config = Arc::new(config);
    let client = Arc::new(HttpClientAdapter::new(&config.client).unwrap());
    let gateway = Arc::new(GatewayService::new(&config, client));
    let app = HttpHandler::new(gateway, config).router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// A local address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
