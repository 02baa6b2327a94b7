//! Static file serving from the content root.
//!
//! Unmatched paths fall through to a `ServeDir` rooted at
//! `[content] static_dir`. The site root serves `index.html` when one is
//! deployed and sends visitors to the login page otherwise.

use std::path::Path;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::ContentConfig;
use crate::routes::found;
use crate::state::AppState;

/// Create the fallback service for the static root.
pub fn create_static_service(content: &ContentConfig) -> ServeDir {
    ServeDir::new(&content.static_dir)
}

/// `GET /`
pub async fn index(State(state): State<AppState>, request: Request) -> Response {
    serve_index(Path::new(&state.config.content.static_dir), request).await
}

/// Serve `<static_dir>/index.html` if present, else redirect (302) to `/login`.
///
/// Checked on every request so an index deployed while running is picked up.
pub async fn serve_index(static_dir: &Path, request: Request) -> Response {
    let index = static_dir.join("index.html");
    let present = tokio::fs::metadata(&index)
        .await
        .is_ok_and(|meta| meta.is_file());

    if !present {
        tracing::debug!(path = %index.display(), "No index page, redirecting to login");
        return found("/login");
    }

    ServeFile::new(index).oneshot(request).await.into_response()
}
