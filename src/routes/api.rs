//! API endpoints.

/// `GET /api/hello`
pub async fn hello() -> &'static str {
    "Hello, this is a compressed API response"
}
