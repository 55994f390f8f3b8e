//! HTTP surface: router construction, middleware ordering and serving.
//!
//! Stages run in a fixed order so cheap rejections happen before expensive
//! ones: cache-control annotation and route rules apply to every request,
//! Basic authentication and the verified-account gate wrap only the
//! protected group, and no database round-trip happens for a request the
//! route rules already rejected.

use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    middleware,
    routing::{get, post},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;

pub mod email;
pub mod guards;
pub mod handlers;

mod openapi;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Service-level settings shared with handlers through an [`Extension`].
#[derive(Clone, Copy, Debug)]
pub struct ServiceConfig {
    verification_ttl_seconds: i64,
}

impl ServiceConfig {
    /// Default config: verification tokens expire 120 seconds after issuance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            verification_ttl_seconds: 120,
        }
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_seconds
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    config: ServiceConfig,
    dispatch: email::DispatchConfig,
    skip_notifications: bool,
) -> Result<()> {
    // Serving starts only once the store is reachable; until then the
    // process retries on a fixed cadence instead of exiting.
    let pool = connect_with_retry(&dsn).await;

    if skip_notifications {
        info!("Notification dispatch disabled; outbox rows will accumulate");
    } else {
        email::spawn_dispatch_worker(pool.clone(), Arc::new(email::LogPublisher), dispatch);
    }

    let app = router(pool, config);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the full router with every pipeline stage layered in order.
#[must_use]
pub fn router(pool: PgPool, config: ServiceConfig) -> Router {
    let protected = Router::new()
        .route(
            "/v1/user/self",
            get(handlers::users::read).put(handlers::users::update),
        )
        .route_layer(middleware::from_fn_with_state(
            pool.clone(),
            handlers::auth::require_verified,
        ))
        .route_layer(middleware::from_fn_with_state(
            pool.clone(),
            handlers::auth::authenticate,
        ));

    Router::new()
        .route("/healthz", get(handlers::health::health))
        .route("/v1/user", post(handlers::users::create))
        .route("/verify", get(handlers::verify::verify))
        .route("/api-docs/openapi.json", get(openapi::serve))
        .merge(protected)
        .fallback(not_found)
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
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache"),
                ))
                .layer(middleware::from_fn(guards::enforce))
                .layer(Extension(pool))
                .layer(Extension(config)),
        )
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn connect_with_retry(dsn: &str) -> PgPool {
    loop {
        match PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
        {
            Ok(pool) => {
                info!("Database connection established");
                return pool;
            }
            Err(err) => {
                error!(
                    "Failed to connect to database: {err}; retrying in {}s",
                    CONNECT_RETRY_INTERVAL.as_secs()
                );
                sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown signal handler: {err}");
        return;
    }
    info!("Gracefully shutdown");
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
