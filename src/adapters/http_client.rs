use std::error::Error as StdError;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{
    HeaderMap, Request, Response, StatusCode, Version,
    header::{self, HeaderName, HeaderValue},
};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tracing::Instrument;

use crate::{
    config::ClientConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    tracing_setup,
};

const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Pooled keep-alive connections to `http` and `https` upstreams
/// * Bounded connect time; no overall request deadline
/// * Hop-by-hop header hygiene, except on protocol upgrades
/// * Converts between Hyper body and Axum body types without buffering
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(config.connect_timeout));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build::<_, AxumBody>(https_connector);

        tracing::info!(
            connect_timeout = ?config.connect_timeout,
            pool_idle_timeout = ?config.pool_idle_timeout,
            pool_max_idle_per_host = config.pool_max_idle_per_host,
            "Created upstream HTTP client"
        );
        Ok(Self { client })
    }
}

/// Value of `Upgrade` when `Connection` asks for an upgrade.
fn requested_upgrade(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// `a: b: c` from an error and its sources.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        let Some(authority) = req.uri().authority().cloned() else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };
        let backend_url = format!("{}://{authority}", req.uri().scheme_str().unwrap_or("http"));
        let span = tracing_setup::create_backend_span(&backend_url, req.method().as_str());

        let client = self.client.clone();
        async move {
            let (mut parts, body) = req.into_parts();
            parts.version = Version::HTTP_11;

            let upgrade = requested_upgrade(&parts.headers);
            remove_hop_by_hop_headers(&mut parts.headers);
            if let Some(protocol) = upgrade {
                parts
                    .headers
                    .insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
                parts.headers.insert(header::UPGRADE, protocol);
            }

            tracing::debug!(
                http.uri = %parts.uri,
                headers = ?parts.headers,
                "Sending request upstream"
            );

            let method = parts.method.clone();
            let uri = parts.uri.clone();
            match client.request(Request::from_parts(parts, body)).await {
                Ok(response) => {
                    let status = response.status();
                    tracing::Span::current().record("http.status_code", status.as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    if status != StatusCode::SWITCHING_PROTOCOLS {
                        // The body is re-framed downstream.
                        remove_hop_by_hop_headers(&mut parts.headers);
                    }
                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Err(e) => {
                    let cause = error_chain(&e);
                    tracing::error!(
                        http.method = %method,
                        http.uri = %uri,
                        error = %cause,
                        "Error making request to backend"
                    );
                    Err(HttpClientError::ConnectionError(cause))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClientAdapter::new(&ClientConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_relative_uri_is_rejected() {
        let client = HttpClientAdapter::new(&ClientConfig::default()).unwrap();
        let req = Request::builder()
            .uri("/no-host")
            .body(AxumBody::empty())
            .unwrap();

        let result = client.send_request(req).await;
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClientAdapter::new(&ClientConfig::default()).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();

        match client.send_request(req).await {
            Err(HttpClientError::ConnectionError(cause)) => assert!(!cause.is_empty()),
            other => panic!("expected connection error, got {:?}", other.map(|r| r.status())),
        }
    }

    #[test]
    fn test_hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        remove_hop_by_hop_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_requested_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert_eq!(requested_upgrade(&headers).unwrap(), "websocket");

        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(requested_upgrade(&headers).is_none());
    }
}
