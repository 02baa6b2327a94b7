//! Session tokens for authenticated principals.
//!
//! Provides:
//! - `Principal`: the authenticated user, stored in an encrypted cookie
//! - `derive_cookie_key`: key material for the private cookie jar
//! - `issue` / `current` / `clear`: token lifecycle on a `PrivateCookieJar`
//!
//! Cookies are encrypted and authenticated, so a forged or tampered token
//! simply reads as "no session".

use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::Duration as TimeDuration;

use crate::config::{AuthConfig, SESSION_LIFETIME_SECS};
use crate::error::AppError;

/// Session cookie containing the serialized `Principal`
pub const SESSION_COOKIE: &str = "strata_session";

/// HKDF info string binding derived keys to this cookie
const KEY_CONTEXT: &[u8] = b"strata-session-cookie";

/// Authenticated user information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Create a principal whose session lasts the standard lifetime
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            expires_at: Utc::now() + chrono::Duration::seconds(SESSION_LIFETIME_SECS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Build the cookie key from configuration.
///
/// Without a configured secret a random key is used, so every restart
/// invalidates existing sessions.
pub fn cookie_key(auth: &AuthConfig) -> Result<Key, AppError> {
    match auth.session_secret.as_deref() {
        Some(secret) => derive_cookie_key(secret),
        None => {
            tracing::warn!(
                "No session secret configured, using a random key (sessions will not survive restarts)"
            );
            Ok(Key::generate())
        }
    }
}

/// Derive a 64-byte cookie key from `secret` using HKDF-SHA256
pub fn derive_cookie_key(secret: &str) -> Result<Key, AppError> {
    let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut key_bytes = [0u8; 64];
    hkdf.expand(KEY_CONTEXT, &mut key_bytes)
        .map_err(|e| AppError::Internal(format!("cookie key derivation failed: {e}")))?;

    Ok(Key::from(&key_bytes))
}

/// Store `principal` in the session cookie.
pub fn issue(jar: PrivateCookieJar, principal: &Principal) -> Result<PrivateCookieJar, AppError> {
    let value = serde_json::to_string(principal)
        .map_err(|e| AppError::Internal(format!("failed to serialize session: {e}")))?;

    let cookie = Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::seconds(SESSION_LIFETIME_SECS))
        .build();

    tracing::debug!(username = %principal.username, "Issued session");
    Ok(jar.add(cookie))
}

/// The principal behind the request, if its token is present, authentic and
/// unexpired.
pub fn current(jar: &PrivateCookieJar) -> Option<Principal> {
    let cookie = jar.get(SESSION_COOKIE)?;
    let principal: Principal = match serde_json::from_str(cookie.value()) {
        Ok(principal) => principal,
        Err(e) => {
            tracing::debug!(error = %e, "Discarding malformed session cookie");
            return None;
        }
    };

    if principal.is_expired() {
        tracing::debug!(username = %principal.username, "Session expired");
        return None;
    }
    Some(principal)
}

/// Remove the session cookie.
pub fn clear(jar: PrivateCookieJar) -> PrivateCookieJar {
    let remove_cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build();

    jar.remove(remove_cookie)
}
