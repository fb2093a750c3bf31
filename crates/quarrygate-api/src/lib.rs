//! HTTP surface: request pipeline, auth, rate limiting, and the
//! CRUD/procedure/script/meta route groups, wired together as one
//! `axum` `Router`. The HTTP framework itself is an external
//! collaborator; this crate composes with it rather than
//! reimplementing it.

pub mod auth;
pub mod authorize;
pub mod config;
pub mod envelope;
pub mod governor;
pub mod method_guard;
pub mod openapi;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod state;

use axum::http::{HeaderName, HeaderValue, Request};
use axum::Router;
use quarrygate_procedures::{DatabaseExecutor, HookRegistry, HttpClient};
use state::AppState;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builds the full router: every route group merged under one
/// `AppState`, with correlation-id propagation, compression, CORS, and
/// request tracing layered on outermost first (trace, then cors, then
/// compression).
pub fn build_router<D, H, K>(state: AppState<D, H, K>) -> Router
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Router::new()
        .merge(routes::meta::router())
        .merge(routes::crud::router())
        .merge(routes::procedures::router())
        .merge(routes::scripts::router())
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().on_request(|req: &Request<_>, _span: &Span| {
                tracing::info!(method = %req.method(), path = %req.uri().path(), "request received");
            }),
        )
        .layer(axum::middleware::from_fn(assign_request_id))
}

/// Stamps every request/response pair with an `x-request-id`, reusing
/// a caller-supplied one if present so a client's own correlation id
/// survives the round trip.
async fn assign_request_id(mut req: Request<axum::body::Body>, next: axum::middleware::Next) -> axum::response::Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    let request_id = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(header_name.clone(), value.clone());
        let mut response = next.run(req).await;
        response.headers_mut().insert(header_name, value);
        response
    } else {
        next.run(req).await
    }
}

/// Binds `addr` and serves `router` until a shutdown signal arrives,
/// waiting on Ctrl+C/SIGTERM for a graceful stop.
pub async fn serve(router: Router, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "quarrygate listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
