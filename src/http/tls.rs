//! TLS provisioning.
//!
//! The configured toggles are turned into a [`TlsStrategy`] exactly once at
//! startup. [`provision`] then produces the transport configuration for the
//! selected strategy:
//! - **Disabled**: no transport config, the listener stays plaintext
//! - **Manual**: certificate/key pair loaded from PEM files
//! - **Automated**: certificates issued on demand via ACME (Let's Encrypt)

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use futures::StreamExt;
use rustls_acme::axum::AxumAcceptor;
use rustls_acme::caches::DirCache;
use rustls_acme::{AcmeConfig, AcmeState, ResolvesServerCertAcme, UseChallenge};
use tokio::task::JoinHandle;

use crate::config::TlsConfig;

/// TLS provisioning failure. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS is enabled without ACME but tls.{0} is not configured")]
    MissingPath(&'static str),

    #[error("Cannot read {kind} file '{path}': {source}")]
    Unreadable {
        kind: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid certificate/key pair ('{cert}', '{key}'): {source}")]
    InvalidPair {
        cert: String,
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create ACME cache directory '{path}': {source}")]
    CacheDir {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// How the listener is exposed, as reported by a running server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Plain,
    Manual,
    Automated,
}

/// The TLS strategy for this process. Selected once, never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsStrategy {
    Disabled,
    Manual {
        cert_path: PathBuf,
        key_path: PathBuf,
    },
    Automated {
        host: String,
        cache_dir: PathBuf,
        contact: Option<String>,
        production: bool,
    },
}

impl TlsStrategy {
    /// Interpret the TLS toggles for `host`.
    ///
    /// Manual mode requires both paths to be configured; whether the files
    /// exist and parse is checked by [`provision`].
    pub fn select(tls: &TlsConfig, host: &str) -> Result<Self, TlsError> {
        if !tls.enabled {
            return Ok(Self::Disabled);
        }

        if tls.acme {
            return Ok(Self::Automated {
                host: host.to_string(),
                cache_dir: PathBuf::from(&tls.acme_cache_dir),
                contact: tls.acme_email.clone(),
                production: !tls.acme_staging,
            });
        }

        let cert_path = tls.cert_file.as_ref().ok_or(TlsError::MissingPath("cert_file"))?;
        let key_path = tls.key_file.as_ref().ok_or(TlsError::MissingPath("key_file"))?;
        Ok(Self::Manual {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })
    }

    pub fn mode(&self) -> ListenMode {
        match self {
            Self::Disabled => ListenMode::Plain,
            Self::Manual { .. } => ListenMode::Manual,
            Self::Automated { .. } => ListenMode::Automated,
        }
    }
}

/// Ready-to-use TLS configuration for a listener.
pub enum TransportConfig {
    /// A fixed certificate loaded from disk
    Static(RustlsConfig),
    /// Certificates resolved per handshake by the ACME manager
    Dynamic(AcmeTransport),
}

/// ACME certificate manager wired for the HTTPS listener.
pub struct AcmeTransport {
    pub acceptor: AxumAcceptor,
    /// Answers HTTP-01 challenges on the plaintext port
    pub resolver: Arc<ResolvesServerCertAcme>,
    state: AcmeState<io::Error>,
}

impl AcmeTransport {
    /// Start driving the ACME state machine. Issuance and renewal happen
    /// inside this task; it must be kept alive for as long as the listener.
    pub fn spawn_events(self) -> (AxumAcceptor, Arc<ResolvesServerCertAcme>, JoinHandle<()>) {
        let AcmeTransport {
            acceptor,
            resolver,
            mut state,
        } = self;

        let events = tokio::spawn(async move {
            loop {
                match state.next().await {
                    Some(Ok(event)) => {
                        tracing::info!(event = ?event, "ACME event");
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "ACME error");
                    }
                    None => {
                        tracing::debug!("ACME state stream ended");
                        break;
                    }
                }
            }
        });

        (acceptor, resolver, events)
    }
}

/// Install the process-wide rustls crypto provider.
///
/// Several providers can be compiled in through dependencies, in which case
/// rustls refuses to pick one implicitly.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Produce the transport configuration for `strategy`.
///
/// Returns `Ok(None)` for [`TlsStrategy::Disabled`].
pub async fn provision(strategy: &TlsStrategy) -> Result<Option<TransportConfig>, TlsError> {
    ensure_crypto_provider();

    match strategy {
        TlsStrategy::Disabled => Ok(None),
        TlsStrategy::Manual {
            cert_path,
            key_path,
        } => load_manual(cert_path, key_path)
            .await
            .map(|config| Some(TransportConfig::Static(config))),
        TlsStrategy::Automated {
            host,
            cache_dir,
            contact,
            production,
        } => build_acme(host, cache_dir, contact.as_deref(), *production)
            .map(|transport| Some(TransportConfig::Dynamic(transport))),
    }
}

async fn load_manual(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    check_readable("certificate", cert_path).await?;
    check_readable("key", key_path).await?;

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|source| TlsError::InvalidPair {
            cert: cert_path.display().to_string(),
            key: key_path.display().to_string(),
            source,
        })?;

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Loaded TLS certificate"
    );
    Ok(config)
}

async fn check_readable(kind: &'static str, path: &Path) -> Result<(), TlsError> {
    tokio::fs::File::open(path)
        .await
        .map(drop)
        .map_err(|source| TlsError::Unreadable {
            kind,
            path: path.display().to_string(),
            source,
        })
}

fn build_acme(
    host: &str,
    cache_dir: &Path,
    contact: Option<&str>,
    production: bool,
) -> Result<AcmeTransport, TlsError> {
    let environment = if production { "production" } else { "staging" };
    tracing::info!(
        domain = %host,
        cache = %cache_dir.display(),
        environment = %environment,
        "Configuring ACME certificate manager"
    );

    if !production {
        tracing::warn!(
            "Using Let's Encrypt staging environment - certificates will NOT be trusted by browsers"
        );
    }

    std::fs::create_dir_all(cache_dir).map_err(|source| TlsError::CacheDir {
        path: cache_dir.display().to_string(),
        source,
    })?;

    // rustls-acme agrees to the directory's terms of service on account creation
    let mut acme = AcmeConfig::new([host.to_string()])
        .cache(DirCache::new(cache_dir.to_path_buf()))
        .directory_lets_encrypt(production)
        .challenge_type(UseChallenge::Http01);
    if let Some(email) = contact {
        acme = acme.contact_push(format!("mailto:{email}"));
    }

    let state = acme.state();
    let acceptor = state.axum_acceptor(state.default_rustls_config());
    let resolver = state.resolver();

    Ok(AcmeTransport {
        acceptor,
        resolver,
        state,
    })
}

/// Reload the manual certificate pair on SIGHUP.
///
/// The previous certificate stays active when the reload fails.
#[cfg(unix)]
pub fn spawn_reload_task(
    tls_config: RustlsConfig,
    cert_path: PathBuf,
    key_path: PathBuf,
) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sighup) => sighup,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGHUP handler, certificate reload disabled");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading TLS certificates");

            match tls_config.reload_from_pem_file(&cert_path, &key_path).await {
                Ok(()) => {
                    tracing::info!(
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "TLS certificates reloaded successfully"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "Failed to reload TLS certificates"
                    );
                }
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_reload_task(
    _tls_config: RustlsConfig,
    _cert_path: PathBuf,
    _key_path: PathBuf,
) -> Option<JoinHandle<()>> {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
    None
}
