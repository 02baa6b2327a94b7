//! HTTP server module with TLS support.
//!
//! This module provides the transport under the application router, in one
//! of three modes:
//! - **Automated**: Certificates provisioned via Let's Encrypt (ACME HTTP-01)
//! - **Manual**: User-provided certificate and key files
//! - **Plain**: Plain HTTP, forced for local and private-network hosts
//!
//! The server includes:
//! - HTTP to HTTPS redirect and ACME challenge answers (when TLS enabled)
//! - Graceful shutdown with a drain deadline on SIGTERM/SIGINT
//! - Certificate hot-reload via SIGHUP (manual mode)

pub mod network;
pub mod redirect;
pub mod server;
pub mod shutdown;
pub mod static_files;
pub mod tls;

pub use server::{start, DrainOutcome, ServerError, ServerHandle};
pub use tls::{ListenMode, TlsError, TlsStrategy};
