//! WebSocket upgrade detection and relaying.
//!
//! Upgrade requests are forwarded like any other request. When the upstream
//! answers `101 Switching Protocols`, both upgraded connections are spliced
//! together and bytes are copied in both directions until either side
//! closes. No gateway deadline applies to the relay.
use axum::body::Body;
use http::{
    HeaderMap, Request, Response, StatusCode,
    header::{CONNECTION, UPGRADE},
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::{core::channel::InFlightRequest, metrics};

fn header_contains_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// `Connection` lists `upgrade` and `Upgrade` is `websocket` (both case-insensitive).
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade_is_websocket = headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"));

    upgrade_is_websocket && header_contains_token(headers, CONNECTION, "upgrade")
}

/// Claim the client side of an upgrade before the request is forwarded.
pub(crate) fn take_client_upgrade(req: &mut Request<Body>) -> Option<OnUpgrade> {
    if !is_websocket_upgrade(req.headers()) {
        return None;
    }
    Some(hyper::upgrade::on(&mut *req))
}

/// Splice client and upstream once the upstream has switched protocols.
pub(crate) fn relay_upgrade(
    client: OnUpgrade,
    response: &mut Response<Body>,
    call: &InFlightRequest,
) {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(
            request.id = %call.id,
            service = %call.service,
            status = response.status().as_u16(),
            "Upstream declined protocol upgrade"
        );
        return;
    }

    let upstream = hyper::upgrade::on(&mut *response);
    let service = call.service.clone();
    let request_id = call.id;
    metrics::increment_websocket_upgrades(&service);

    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(
                    request.id = %request_id,
                    service = %service,
                    error = %e,
                    "WebSocket upgrade failed"
                );
                return;
            }
        };

        tracing::info!(
            request.id = %request_id,
            service = %service,
            "WebSocket connection established"
        );
        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((from_client, from_upstream)) => tracing::info!(
                request.id = %request_id,
                service = %service,
                bytes.from_client = from_client,
                bytes.from_upstream = from_upstream,
                "WebSocket connection closed"
            ),
            Err(e) => tracing::debug!(
                request.id = %request_id,
                service = %service,
                error = %e,
                "WebSocket relay ended with error"
            ),
        }
    });
}
