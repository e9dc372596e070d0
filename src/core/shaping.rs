//! Outbound request and inbound response header rewriting.
use std::net::IpAddr;

use axum::body::Body;
use http::{
    HeaderMap, HeaderName, HeaderValue, Request, Response,
    header::{Entry, HOST},
};

use crate::core::{channel::InFlightRequest, error::GatewayError, upstream::UpstreamDescriptor};

/// Identity stamped on every request and response passing through the gateway.
pub const GATEWAY_ID: &str = "ugjb-api-gateway";

pub const X_GATEWAY: HeaderName = HeaderName::from_static("x-gateway");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_ORIGIN_HOST: HeaderName = HeaderName::from_static("x-origin-host");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const GATEWAY_ID_VALUE: HeaderValue = HeaderValue::from_static(GATEWAY_ID);

/// Point `req` at `upstream` and add the forwarding headers.
///
/// `X-Real-IP` is only filled in when the client (or an outer proxy) did not
/// send one. The peer IP is appended to any `X-Forwarded-For` chain.
pub fn shape_request(
    req: &mut Request<Body>,
    upstream: &UpstreamDescriptor,
    call: &InFlightRequest,
) -> Result<(), GatewayError> {
    *req.uri_mut() = upstream.endpoint(&call.outbound_path, call.query.as_deref())?;

    let headers = req.headers_mut();
    headers.insert(HOST, upstream.host_header.clone());
    match &call.inbound_host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }
    headers.insert(X_ORIGIN_HOST, upstream.host_header.clone());

    if let Some(peer) = call.peer {
        append_forwarded_for(headers, peer.ip());
    }

    if !headers.contains_key(X_REAL_IP) {
        if let Some(peer) = call.peer {
            if let Ok(value) = HeaderValue::from_str(&peer.to_string()) {
                headers.insert(X_REAL_IP, value);
            }
        }
    }

    headers.insert(X_GATEWAY, GATEWAY_ID_VALUE);
    Ok(())
}

/// Fold every `X-Forwarded-For` value into one comma-separated list ending in `ip`.
fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let ip = ip.to_string();
    let chain = match headers.entry(X_FORWARDED_FOR) {
        Entry::Vacant(_) => ip,
        Entry::Occupied(entry) => entry
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .chain([ip.as_str()])
            .collect::<Vec<_>>()
            .join(", "),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Tag a response that came back from an upstream.
pub fn shape_response(res: &mut Response<Body>) {
    res.headers_mut().insert(X_GATEWAY, GATEWAY_ID_VALUE);
}
