//! Per-call deadline enforcement.
//!
//! A proxied call is `Dispatched` when its forward is spawned and ends either
//! `Completed` (the forward reported back first) or `TimedOut` (the deadline
//! fired first). On timeout nothing has reached the client yet, so a `504`
//! is returned and the forward is cancelled. A completed response keeps the
//! same deadline for its body: if the upstream is still streaming when it
//! passes, the body ends with an error and the partial response stands.
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::StatusCode;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::{
    sync::oneshot,
    time::{Instant, Sleep, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    core::{channel::InFlightRequest, error::GatewayError},
    metrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Dispatched,
    Completed,
    TimedOut,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Dispatched => "dispatched",
            CallState::Completed => "completed",
            CallState::TimedOut => "timed_out",
        }
    }
}

/// Result of a supervised call.
pub struct Supervised {
    pub state: CallState,
    pub response: Response,
}

/// Run `forward` on its own task and bound it by `timeout`.
///
/// Dropping the returned future (client went away) also cancels the forward.
pub async fn supervise<F>(call: &InFlightRequest, timeout: Duration, forward: F) -> Supervised
where
    F: Future<Output = Response> + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let cancel = CancellationToken::new();
    let cancel_on_drop = cancel.clone().drop_guard();
    let (done_tx, done_rx) = oneshot::channel();

    tracing::debug!(
        request.id = %call.id,
        service = %call.service,
        state = CallState::Dispatched.as_str(),
        timeout = ?timeout,
        "Forward dispatched"
    );

    tokio::spawn(
        async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("Forward cancelled");
                }
                response = forward => {
                    // The receiver is gone if the deadline already fired.
                    let _ = done_tx.send(response);
                }
            }
        }
        .in_current_span(),
    );

    tokio::select! {
        finished = done_rx => {
            cancel_on_drop.disarm();
            match finished {
                Ok(response) => Supervised {
                    state: CallState::Completed,
                    response: bound_body(response, deadline, call, timeout),
                },
                Err(_) => {
                    tracing::error!(
                        request.id = %call.id,
                        service = %call.service,
                        "Forward task ended without a response"
                    );
                    Supervised {
                        state: CallState::Completed,
                        response: GatewayError::UpstreamUnreachable {
                            cause: "forwarding task aborted".to_string(),
                        }
                        .into_response(),
                    }
                }
            }
        }
        () = sleep_until(deadline) => {
            drop(cancel_on_drop);
            tracing::error!(
                request.id = %call.id,
                service = %call.service,
                http.path = %call.original_path,
                timeout = ?timeout,
                "Backend request timeout"
            );
            metrics::increment_upstream_timeouts(&call.service);
            Supervised {
                state: CallState::TimedOut,
                response: GatewayError::UpstreamTimeout {
                    service: call.service.clone(),
                    timeout,
                }
                .into_response(),
            }
        }
    }
}

fn bound_body(
    response: Response,
    deadline: Instant,
    call: &InFlightRequest,
    timeout: Duration,
) -> Response {
    if response.status() == StatusCode::SWITCHING_PROTOCOLS || response.body().is_end_stream() {
        return response;
    }
    response.map(|inner| {
        Body::new(DeadlineBody {
            inner,
            deadline: Box::pin(sleep_until(deadline)),
            service: call.service.clone(),
            timeout,
            expired: false,
        })
    })
}

/// Response body that stops at the call's deadline.
struct DeadlineBody {
    inner: Body,
    deadline: Pin<Box<Sleep>>,
    service: String,
    timeout: Duration,
    expired: bool,
}

impl HttpBody for DeadlineBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(None);
        }

        if let Poll::Ready(frame) = Pin::new(&mut this.inner).poll_frame(cx) {
            return Poll::Ready(frame);
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.expired = true;
            tracing::warn!(
                service = %this.service,
                timeout = ?this.timeout,
                "Backend response still streaming at deadline, truncating"
            );
            metrics::increment_upstream_timeouts(&this.service);
            return Poll::Ready(Some(Err(axum::Error::new(
                GatewayError::UpstreamTimeout {
                    service: this.service.clone(),
                    timeout: this.timeout,
                },
            ))));
        }

        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        self.expired || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
