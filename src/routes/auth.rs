//! Login page and session-protected routes.
//!
//! Routes:
//! - GET /login - Render the login page
//! - GET /dashboard - Render the dashboard for the session's principal
//! - POST /logout - Clear the session and return to the login page
//!
//! Sessions are issued by the identity provider integration; these
//! handlers only consume them.

use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::PrivateCookieJar;
use tera::Context;
use tracing::instrument;

use super::found;
use crate::error::AppError;
use crate::session;
use crate::state::AppState;
use crate::templates::render;

/// Show the login page
#[instrument(name = "auth::login", skip(state))]
pub async fn login(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    render(&state.tera, "login.html", &Context::new())
}

/// Show the dashboard, or redirect to login without a valid session
#[instrument(name = "auth::dashboard", skip(state, jar))]
pub async fn dashboard(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, AppError> {
    let Some(principal) = session::current(&jar) else {
        return Ok(found("/login"));
    };

    let mut context = Context::new();
    context.insert("username", &principal.username);
    context.insert("expires_at", &principal.expires_at.to_rfc3339());

    Ok(render(&state.tera, "dashboard.html", &context)?.into_response())
}

/// Clear the session cookie
#[instrument(name = "auth::logout", skip(jar))]
pub async fn logout(jar: PrivateCookieJar) -> impl IntoResponse {
    if let Some(principal) = session::current(&jar) {
        tracing::info!(username = %principal.username, "User logged out");
    }
    (session::clear(jar), found("/login"))
}
