//! Liveness and readiness endpoints.

use axum::{extract::State, http::StatusCode};

use crate::storage::Stores;

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Liveness check.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Returns a simple health status indicating the process is up and accepting requests.\n\n\
                   Supports both GET and HEAD methods for Kubernetes liveness probes and load balancers.",
    responses(
        (status = 200, description = "Service is healthy", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness check: the client store must answer.
#[tracing::instrument(skip(stores))]
#[utoipa::path(
    get,
    path = "/readyz",
    tag = MISC_TAG,
    operation_id = "Readiness Check",
    summary = "Storage readiness check",
    description = "Lists the registered OAuth clients to confirm the storage backend is reachable.",
    responses(
        (status = 200, description = "Storage is reachable", body = str, content_type = "text/plain", example = "ok"),
        (status = 503, description = "Storage is unavailable", body = str, content_type = "text/plain")
    )
)]
pub async fn ready(State(stores): State<Stores>) -> (StatusCode, &'static str) {
    match stores.clients.list().await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(err) => {
            tracing::error!(error = %err, "storage readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}
