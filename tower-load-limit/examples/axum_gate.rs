use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use load_limit::TenantLimiter;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_load_limit::GateError;
use tower_load_limit::LoadLimitConfig;
use tower_load_limit::LoadLimitMiddleware;
use tower_load_limit::ServiceBuilderExt;
use tower_load_limit::tenant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. One limiter for the whole application: 100 load per client IP every 3s
    let limiter = Arc::new(
        TenantLimiter::fixed_window(
            NonZeroU64::new(100).ok_or("zero capacity")?,
            Duration::from_secs(3),
        )
        .with_max_tenants(100_000),
    );

    let purger = limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            purger.purge_idle();
        }
    });

    // 2. One middleware, checked once when the layers below are built
    let middleware = LoadLimitMiddleware::new(
        LoadLimitConfig::new()
            .with_limiter(limiter)
            .with_default_route_load(1)
            .with_tenant_key_fn(tenant::client_ip()),
    );

    // 3. Each route pays its own load
    let app = Router::new()
        .route(
            "/",
            get(|| async { "Hello, tenant!" }).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_gate_error))
                    .load_limit(&middleware),
            ),
        )
        .route(
            "/search",
            get(|| async { "Expensive results" }).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_gate_error))
                    .load_limit_with(&middleware, 10),
            ),
        )
        .route(
            "/health",
            get(|| async { "OK" }).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_gate_error))
                    .load_limit_with(&middleware, 0),
            ),
        );

    // 4. Serve, exposing the peer address to `tenant::client_ip`
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Admission failures are propagated as `BoxError`, turn them back into responses
async fn handle_gate_error(err: BoxError) -> Response {
    match err.downcast::<GateError>() {
        Ok(gate_err) => (*gate_err).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal Service Error: {err}"),
        )
            .into_response(),
    }
}
