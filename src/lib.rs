//! Strata: an HTTP(S) edge server.
//!
//! Serves static content and a few dynamic pages behind content-negotiated
//! compression (brotli, gzip, or pre-built artifacts), with TLS that is
//! disabled automatically on local networks, loaded from files, or
//! provisioned through ACME, and a graceful shutdown with a drain deadline.

pub mod compression;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;
pub mod templates;
