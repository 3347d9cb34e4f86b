use std::sync::Arc;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::AppState;

pub mod handlers;

/// Header the Functions host uses to pass the invocation id to a custom handler.
pub const INVOCATION_ID_HEADER: &str = "x-azure-functions-invocationid";

/// Correlation id for one invocation, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct InvocationId(pub String);

/// Build the function app router.
///
/// The Functions host forwards HTTP-triggered invocations to
/// `/api/<function name>`; only POST is routed, other methods get 405.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/create-keyvault", post(handlers::create_keyvault))
        .route("/healthz", get(|| async { "ok" }))
        .layer(middleware::from_fn(invocation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Middleware: takes the host's invocation id (or mints one), exposes it to
/// handlers, runs the request inside a span carrying it, and echoes it back.
async fn invocation_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(INVOCATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(InvocationId(id.clone()));

    let span = tracing::info_span!("invocation", invocation_id = %id);
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(INVOCATION_ID_HEADER, val);
    }
    resp
}
