//! Liveness check for load balancers and orchestrators.

/// `GET /health`: answers while the process can serve HTTP.
pub async fn health() -> &'static str {
    "ok"
}
