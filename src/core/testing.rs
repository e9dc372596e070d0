//! In-memory `HttpClient` used by unit tests.
use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use tokio::sync::oneshot;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

enum Behavior {
    Respond(&'static str),
    Delay(Duration, &'static str),
    Fail(String),
    Hang,
    StallBody(&'static str),
}

pub(crate) struct StubClient {
    behavior: Behavior,
    last: Mutex<Option<SeenRequest>>,
    calls: AtomicUsize,
    dropped: Mutex<Option<oneshot::Sender<()>>>,
}

struct NotifyOnDrop(Option<oneshot::Sender<()>>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl StubClient {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            dropped: Mutex::new(None),
        }
    }

    pub fn ok(body: &'static str) -> Self {
        Self::with(Behavior::Respond(body))
    }

    pub fn delayed(delay: Duration, body: &'static str) -> Self {
        Self::with(Behavior::Delay(delay, body))
    }

    pub fn failing(cause: &str) -> Self {
        Self::with(Behavior::Fail(cause.to_string()))
    }

    /// Never answers; the receiver fires once the pending call is dropped.
    pub fn hanging() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let client = Self::with(Behavior::Hang);
        *client.dropped.lock().unwrap() = Some(tx);
        (client, rx)
    }

    /// Sends headers and a first chunk, then never finishes the body.
    pub fn stalling_body(first_chunk: &'static str) -> Self {
        Self::with(Behavior::StallBody(first_chunk))
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.last.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for StubClient {
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| HttpClientError::ConnectionError(e.to_string()))?
            .to_bytes();
        *self.last.lock().unwrap() = Some(SeenRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        });

        match &self.behavior {
            Behavior::Respond(body) => Ok(Response::new(Body::from(*body))),
            Behavior::Delay(delay, body) => {
                tokio::time::sleep(*delay).await;
                Ok(Response::new(Body::from(*body)))
            }
            Behavior::Fail(cause) => Err(HttpClientError::ConnectionError(cause.clone())),
            Behavior::Hang => {
                let _guard = NotifyOnDrop(self.dropped.lock().unwrap().take());
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::StallBody(first) => {
                let chunks = futures_util::stream::iter([Ok::<_, std::io::Error>(
                    Bytes::from_static(first.as_bytes()),
                )])
                .chain(futures_util::stream::pending());
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from_stream(chunks))
                    .unwrap())
            }
        }
    }
}
