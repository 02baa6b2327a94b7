//! Shared application state for request handlers.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use tera::Tera;

use crate::config::AppConfig;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tera: Arc<Tera>,
    /// Key for the encrypted session cookie, derived once at startup
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, tera: Tera, cookie_key: Key) -> Self {
        Self {
            config: Arc::new(config),
            tera: Arc::new(tera),
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
