//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, rate limit, metrics)
//! - Serve until shutdown is requested

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header, HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ImbiConfig;
use crate::http::handlers;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::rate_limit::{rate_limit_middleware, RateLimitParseError, RateLimiterState};
use crate::services::Services;

const SERVER_HEADER: &str = concat!("imbi/", env!("CARGO_PKG_VERSION"));

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ImbiConfig, services: Arc<Services>) -> Result<Router, RateLimitParseError> {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/status", get(handlers::status))
        .route("/organizations", get(handlers::organizations))
        .route("/roles", get(handlers::roles))
        .route("/groups", get(handlers::groups))
        .with_state(AppState { services });

    if let Some(limiter) = RateLimiterState::from_config(&config.rate_limit)? {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    Ok(router.layer(middleware::from_fn(track_metrics)).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetResponseHeaderLayer::overriding(
                header::SERVER,
                HeaderValue::from_static(SERVER_HEADER),
            ))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_secs,
            ))),
    ))
}

async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let response = next.run(request).await;
    metrics::record_request(method.as_str(), response.status().as_u16(), started);
    response
}

/// HTTP server for the Imbi API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ImbiConfig, services: Arc<Services>) -> Result<Self, RateLimitParseError> {
        Ok(Self {
            router: build_router(config, services)?,
        })
    }

    /// Run the server until `shutdown` is requested, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
