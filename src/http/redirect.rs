//! Plaintext companion listener for HTTPS deployments.
//!
//! In manual TLS mode it redirects every request to HTTPS. In ACME mode it
//! additionally answers HTTP-01 domain validation requests from the issuing
//! authority under `/.well-known/acme-challenge/`.

use std::sync::Arc;

use axum::extract::Path;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{any, get};
use axum::Router;
use axum_extra::extract::Host;
use rustls_acme::ResolvesServerCertAcme;

/// Router that redirects all requests to HTTPS on `https_port`.
pub fn redirect_router(https_port: u16) -> Router {
    Router::new().fallback(any(move |Host(host): Host, uri: Uri| async move {
        redirect_to_https(&host, &uri, https_port)
    }))
}

/// Router serving HTTP-01 challenge responses, redirecting everything else.
pub fn challenge_router(resolver: Arc<ResolvesServerCertAcme>, https_port: u16) -> Router {
    Router::new()
        .route(
            "/.well-known/acme-challenge/{token}",
            get(move |Path(token): Path<String>| {
                let resolver = resolver.clone();
                async move { challenge_response(&resolver, &token) }
            }),
        )
        .merge(redirect_router(https_port))
}

fn challenge_response(resolver: &ResolvesServerCertAcme, token: &str) -> Response {
    match resolver.get_http_01_key_auth(token) {
        Some(key_auth) => {
            tracing::info!(%token, "Answering ACME HTTP-01 challenge");
            key_auth.into_response()
        }
        None => {
            tracing::debug!(%token, "Unknown ACME challenge token");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Generate a redirect response from HTTP to HTTPS.
pub fn redirect_to_https(host: &str, uri: &Uri, https_port: u16) -> Redirect {
    let https_url = https_url(host, uri, https_port);
    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");
    Redirect::permanent(&https_url)
}

fn https_url(host: &str, uri: &Uri, https_port: u16) -> String {
    let host_without_port = strip_port(host);
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    if https_port == 443 {
        format!("https://{host_without_port}{path}")
    } else {
        format!("https://{host_without_port}:{https_port}{path}")
    }
}

/// Remove a trailing `:port` while keeping bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}
