//! Configuration loading and constants.
//!
//! Configuration is assembled in layers: built-in defaults, an optional TOML
//! file, `STRATA_*` environment variables, and finally command line overrides
//! applied by the binary. `AppConfig` is the root configuration struct and is
//! treated as read-only once the server starts.

use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Static assets (CSS, JS, images) - long cache
pub const HTTP_CACHE_STATIC_MAX_AGE: u32 = 86400;

/// API responses - short cache, content is generated per request
pub const HTTP_CACHE_API_MAX_AGE: u32 = 60;

pub const CACHE_CONTROL_STATIC: &str = formatcp!("public, max-age={}", HTTP_CACHE_STATIC_MAX_AGE);

pub const CACHE_CONTROL_API: &str = formatcp!("public, max-age={}", HTTP_CACHE_API_MAX_AGE);

/// Pages that depend on the session cookie must never be shared
pub const CACHE_CONTROL_PRIVATE: &str = "private, no-store";

// =============================================================================
// Server Defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "localhost";

pub const DEFAULT_PORT: u16 = 8080;

/// Seconds allowed for in-flight requests to finish after a termination signal
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Port of the plaintext listener used for HTTPS redirects and ACME challenges
pub const DEFAULT_REDIRECT_PORT: u16 = 80;

/// Directory holding the ACME account and certificate cache
pub const DEFAULT_ACME_CACHE_DIR: &str = "certs";

pub const DEFAULT_STATIC_DIR: &str = "./static";

pub const DEFAULT_TEMPLATES_DIR: &str = "templates";

/// Lifetime of an issued session token in seconds (5 hours)
pub const SESSION_LIFETIME_SECS: i64 = 5 * 3600;

// =============================================================================
// Logging
// =============================================================================

/// Default log filter when neither --log-level nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "strata=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "STRATA_";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Listener and shutdown settings
    #[serde(default)]
    pub http: HttpServerConfig,
    /// TLS provisioning settings
    #[serde(default)]
    pub tls: TlsConfig,
    /// Filesystem locations for content
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpServerConfig::default_port")]
    pub port: u16,
    /// Drain deadline applied on SIGINT/SIGTERM
    #[serde(default = "HttpServerConfig::default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            shutdown_timeout_seconds: Self::default_shutdown_timeout(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    fn default_shutdown_timeout() -> u64 {
        DEFAULT_SHUTDOWN_TIMEOUT_SECS
    }
}

/// TLS configuration.
///
/// The two toggles are interpreted once at startup by
/// [`crate::http::tls::TlsStrategy::select`].
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "TlsConfig::default_enabled")]
    pub enabled: bool,
    /// Obtain certificates automatically instead of reading cert/key files
    #[serde(default)]
    pub acme: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    #[serde(default = "TlsConfig::default_acme_cache_dir")]
    pub acme_cache_dir: String,
    /// Contact address registered with the ACME account
    pub acme_email: Option<String>,
    /// Use the Let's Encrypt staging directory (untrusted certificates)
    #[serde(default)]
    pub acme_staging: bool,
    /// Redirect plaintext requests to HTTPS in manual mode
    #[serde(default = "TlsConfig::default_redirect_http")]
    pub redirect_http: bool,
    #[serde(default = "TlsConfig::default_redirect_port")]
    pub redirect_port: u16,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            acme: false,
            cert_file: None,
            key_file: None,
            acme_cache_dir: Self::default_acme_cache_dir(),
            acme_email: None,
            acme_staging: false,
            redirect_http: Self::default_redirect_http(),
            redirect_port: Self::default_redirect_port(),
        }
    }
}

impl TlsConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_acme_cache_dir() -> String {
        DEFAULT_ACME_CACHE_DIR.to_string()
    }

    fn default_redirect_http() -> bool {
        true
    }

    fn default_redirect_port() -> u16 {
        DEFAULT_REDIRECT_PORT
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    /// Root for static assets and their pre-compressed `.br` / `.gz` siblings
    #[serde(default = "ContentConfig::default_static_dir")]
    pub static_dir: String,
    #[serde(default = "ContentConfig::default_templates_dir")]
    pub templates_dir: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            static_dir: Self::default_static_dir(),
            templates_dir: Self::default_templates_dir(),
        }
    }
}

impl ContentConfig {
    fn default_static_dir() -> String {
        DEFAULT_STATIC_DIR.to_string()
    }

    fn default_templates_dir() -> String {
        DEFAULT_TEMPLATES_DIR.to_string()
    }

    /// Glob pattern handed to Tera
    pub fn template_glob(&self) -> String {
        format!("{}/**/*", self.templates_dir.trim_end_matches('/'))
    }
}

/// Session token settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Secret used to derive the session cookie key. A random key is
    /// generated when absent, which invalidates sessions on restart.
    pub session_secret: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
    /// Optional file receiving a copy of every log line
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then apply `STRATA_*`
    /// environment overrides and validate the result.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Boolean toggles follow the deployment convention of only reacting to
    /// the value that flips the default: `STRATA_USE_TLS=false` disables TLS,
    /// `STRATA_USE_LETS_ENCRYPT=true` enables automated issuance.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.is_empty())
        };

        if let Some(host) = var("HOST") {
            self.http.host = host;
        }
        if let Some(port) = var("PORT") {
            self.http.port = parse_port(&port)?;
        }
        if let Some(timeout) = var("SHUTDOWN_TIMEOUT") {
            self.http.shutdown_timeout_seconds = timeout.parse().map_err(|_| {
                ConfigError::Validation(format!("STRATA_SHUTDOWN_TIMEOUT is not a number: {timeout}"))
            })?;
        }
        if let Some(cert) = var("CERT_FILE") {
            self.tls.cert_file = Some(cert);
        }
        if let Some(key) = var("KEY_FILE") {
            self.tls.key_file = Some(key);
        }
        if let Some(dir) = var("STATIC_DIR") {
            self.content.static_dir = dir;
        }
        if let Some(file) = var("LOG_FILE") {
            self.logging.file = Some(file);
        }
        if let Some(secret) = var("SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }
        if var("USE_TLS").as_deref() == Some("false") {
            self.tls.enabled = false;
        }
        if var("USE_LETS_ENCRYPT").as_deref() == Some("true") {
            self.tls.acme = true;
        }
        Ok(())
    }

    /// Check cross-field requirements that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.host.trim().is_empty() {
            return Err(ConfigError::Validation("http.host must not be empty".to_string()));
        }
        if self.tls.enabled && self.tls.acme && self.tls.acme_cache_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tls.acme_cache_dir must not be empty when ACME is enabled".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "logging.format must be \"text\" or \"json\", got \"{other}\""
            ))),
        }
    }
}

/// Parse a port given as text (environment variable or CLI flag).
pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("invalid port: {value}")))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
