use anyhow::{Context, Result};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, options},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

use crate::audit::{AuditRecorder, spawn_retention_worker};
use crate::mail::MailSender;
use crate::rate_limit::RateLimiter;
use crate::sessions::spawn_expiry_sweeper;

pub mod error;
pub mod gate;
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub mod state;

pub use openapi::openapi;
pub use state::{AppConfig, AppState};

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Background job cadence and retention.
#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    pub sweep_interval: Duration,
    pub retention_days: i64,
    pub retention_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            retention_days: 90,
            retention_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    config: AppConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    mail: Arc<dyn MailSender>,
    workers: WorkerConfig,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let audit = AuditRecorder::spawn_writer(pool.clone());
    let state = Arc::new(AppState::new(
        config,
        pool.clone(),
        rate_limiter,
        audit,
        mail,
    ));

    spawn_expiry_sweeper(pool.clone(), workers.sweep_interval);
    spawn_retention_worker(
        pool.clone(),
        workers.retention_days,
        workers.retention_interval,
    );

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/` and preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(handlers::health::root))
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(Extension(state.clone()))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool))
        .layer(axum::middleware::map_response(payload_too_large));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// The body-limit layer rejects with a bare 413; rewrite it so oversized
// payloads carry the same `{code, message}` body as every other rejection.
async fn payload_too_large(response: Response) -> Response {
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return error::ApiError::PayloadTooLarge.into_response();
    }
    response
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
