//! UGJB gateway - reverse proxy in front of the platform's backend and external services.
//!
//! Every inbound request is matched against a configured route table and forwarded to a
//! named upstream. Upstreams live in two partitions: internal backend services and
//! external services (model runtime, container registry, web frontend). Each upstream
//! gets exactly one forwarding channel, built at startup.
//!
//! # Features
//! - Route table with `:param` / `*rest` captures and outbound path templates
//! - Per-upstream call deadlines with `504 Gateway Timeout` and upstream cancellation
//! - Forwarding headers (`X-Forwarded-Host`, `X-Origin-Host`, `X-Real-IP`, `X-Gateway`)
//! - Uniform JSON error bodies for missing configuration, unreachable and slow upstreams
//! - WebSocket passthrough to the frontend, exempt from the gateway deadline
//! - Structured tracing and `metrics` counters
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use ugjb_gateway::{GatewayService, HttpClientAdapter, HttpHandler};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = Arc::new(ugjb_gateway::config::load_config("gateway.toml").await?);
//! let client = Arc::new(HttpClientAdapter::new(&config.client)?);
//! let gateway = Arc::new(GatewayService::new(&config, client));
//! let app = HttpHandler::new(gateway, config.clone()).router();
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **Ports** (traits) are separated from **adapters** (implementations); routing,
//! shaping and deadline logic live in `core` and only talk to the outside world through
//! the [`HttpClient`] port.
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>` with context attached. Request paths never fail:
//! every error becomes a JSON response via [`GatewayError`].
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{GatewayError, GatewayService, RouteBinding, UpstreamKind, UpstreamRegistry},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
