//! End-to-end tests against real listeners on ephemeral ports.
//!
//! Run with: cargo test --test server_tests
use std::io::Read;
use std::net::TcpListener;
use std::path::Path;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, LOCATION, VARY};
use reqwest::{redirect, Client, StatusCode};
use tempfile::TempDir;

use strata::config::AppConfig;
use strata::http::{self, DrainOutcome, ListenMode, ServerError, ServerHandle, TlsError};
use strata::routes::create_router;
use strata::session::derive_cookie_key;
use strata::state::AppState;
use strata::templates::init_templates;

const HELLO: &str = "Hello, this is a compressed API response";

struct TestServer {
    handle: ServerHandle,
    base: String,
    static_dir: TempDir,
    _templates: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn write_static(&self, name: &str, contents: &[u8]) {
        write_file(self.static_dir.path(), name, contents);
    }
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

fn local_config(static_dir: &Path, templates_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.http.host = "127.0.0.1".to_string();
    config.http.port = 0;
    config.content.static_dir = static_dir.to_string_lossy().into_owned();
    config.content.templates_dir = templates_dir.to_string_lossy().into_owned();
    config
}

async fn spawn_app() -> TestServer {
    let static_dir = tempfile::tempdir().unwrap();
    let templates = tempfile::tempdir().unwrap();
    write_file(templates.path(), "login.html", b"<h1>Sign in</h1>");
    write_file(
        templates.path(),
        "dashboard.html",
        b"<h1>Welcome {{ username }}</h1>",
    );

    let config = local_config(static_dir.path(), templates.path());
    let tera = init_templates(&config.content.template_glob()).unwrap();
    let state = AppState::new(config.clone(), tera, derive_cookie_key("test").unwrap());

    let handle = http::start(create_router(state), &config).await.unwrap();
    let base = format!("http://{}", handle.local_addr());

    TestServer {
        handle,
        base,
        static_dir,
        _templates: templates,
    }
}

/// No automatic decompression, no redirect following
fn client() -> Client {
    Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .unwrap();
    out
}

fn unbrotli(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    brotli::Decompressor::new(bytes, 4096)
        .read_to_end(&mut out)
        .unwrap();
    out
}

#[tokio::test]
async fn test_local_host_serves_plain_http() {
    let server = spawn_app().await;
    assert_eq!(server.handle.mode(), ListenMode::Plain);
    assert!(server.handle.auxiliary_addr().is_none());

    let response = client().get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_dynamic_brotli_preferred() {
    let server = spawn_app().await;

    let response = client()
        .get(server.url("/api/hello"))
        .header(ACCEPT_ENCODING, "gzip, deflate, br")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_ENCODING], "br");
    assert_eq!(response.headers()[VARY], "accept-encoding");
    let body = response.bytes().await.unwrap();
    assert_eq!(unbrotli(&body), HELLO.as_bytes());

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_dynamic_gzip_when_brotli_refused() {
    let server = spawn_app().await;

    let response = client()
        .get(server.url("/api/hello"))
        .header(ACCEPT_ENCODING, "br;q=0, gzip")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
    let body = response.bytes().await.unwrap();
    assert_eq!(gunzip(&body), HELLO.as_bytes());

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_identity_without_accept_encoding() {
    let server = spawn_app().await;

    let response = client().get(server.url("/api/hello")).send().await.unwrap();

    assert!(response.headers().get(CONTENT_ENCODING).is_none());
    assert_eq!(response.text().await.unwrap(), HELLO);

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_prebuilt_artifact_served_verbatim() {
    let server = spawn_app().await;
    server.write_static("js/app.js", b"console.log('plain');");
    // Not valid brotli: proves the bytes are passed through untouched
    server.write_static("js/app.js.br", b"PREBUILT-BROTLI-BYTES");
    server.write_static("js/app.js.gz", b"PREBUILT-GZIP-BYTES");

    let response = client()
        .get(server.url("/js/app.js"))
        .header(ACCEPT_ENCODING, "gzip, br")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_ENCODING], "br");
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .contains("javascript"));
    assert_eq!(response.headers()["cache-control"], strata::config::CACHE_CONTROL_STATIC);
    assert_eq!(&response.bytes().await.unwrap()[..], b"PREBUILT-BROTLI-BYTES");

    let response = client()
        .get(server.url("/js/app.js"))
        .header(ACCEPT_ENCODING, "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
    assert_eq!(&response.bytes().await.unwrap()[..], b"PREBUILT-GZIP-BYTES");

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_static_file_compressed_on_the_fly() {
    let server = spawn_app().await;
    let css = "body { color: black; }\n".repeat(200);
    server.write_static("site.css", css.as_bytes());

    let response = client()
        .get(server.url("/site.css"))
        .header(ACCEPT_ENCODING, "gzip")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
    assert!(response.headers().get("cache-control").is_some());
    let body = response.bytes().await.unwrap();
    assert!(body.len() < css.len());
    assert_eq!(gunzip(&body), css.as_bytes());

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_root_redirects_to_login_until_index_exists() {
    let server = spawn_app().await;

    let response = client().get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");

    server.write_static("index.html", b"<h1>Home</h1>");
    let response = client().get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<h1>Home</h1>");

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_login_and_dashboard_guard() {
    let server = spawn_app().await;

    let response = client().get(server.url("/login")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<h1>Sign in</h1>");

    let response = client().get(server.url("/dashboard")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");

    server.handle.drain(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_tls_failure_never_binds() {
    let dir = tempfile::tempdir().unwrap();
    let port = {
        let spare = TcpListener::bind("0.0.0.0:0").unwrap();
        spare.local_addr().unwrap().port()
    };

    let mut config = local_config(dir.path(), dir.path());
    config.http.host = "0.0.0.0".to_string();
    config.http.port = port;
    config.tls.cert_file = Some(dir.path().join("missing.pem").display().to_string());
    config.tls.key_file = Some(dir.path().join("missing.key").display().to_string());

    let result = http::start(Router::new(), &config).await;
    assert!(matches!(
        result,
        Err(ServerError::Tls(TlsError::Unreadable { .. }))
    ));

    // The port is still free
    TcpListener::bind(("0.0.0.0", port)).unwrap();
}

#[tokio::test]
async fn test_manual_tls_with_redirect_listener() {
    let dir = tempfile::tempdir().unwrap();
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    write_file(dir.path(), "cert.pem", cert.serialize_pem().unwrap().as_bytes());
    write_file(dir.path(), "key.pem", cert.serialize_private_key_pem().as_bytes());

    let mut config = local_config(dir.path(), dir.path());
    config.http.host = "0.0.0.0".to_string();
    config.tls.cert_file = Some(dir.path().join("cert.pem").display().to_string());
    config.tls.key_file = Some(dir.path().join("key.pem").display().to_string());
    config.tls.redirect_port = 0;

    let app = Router::new().route("/hello", get(|| async { "secure" }));
    let handle = http::start(app, &config).await.unwrap();
    assert_eq!(handle.mode(), ListenMode::Manual);

    let https_port = handle.local_addr().port();
    let client = Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(redirect::Policy::none())
        .build()
        .unwrap();

    let response = client
        .get(format!("https://127.0.0.1:{https_port}/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "secure");

    let redirect_port = handle.auxiliary_addr().unwrap().port();
    let response = client
        .get(format!("http://127.0.0.1:{redirect_port}/hello?x=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response.headers()[LOCATION],
        format!("https://127.0.0.1:{https_port}/hello?x=1").as_str()
    );

    handle.drain(Duration::from_secs(5)).await.unwrap();
}

fn slow_app(delay: Duration) -> Router {
    Router::new().route(
        "/slow",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "done"
        }),
    )
}

async fn start_slow(delay: Duration) -> (ServerHandle, String) {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path(), dir.path());
    let handle = http::start(slow_app(delay), &config).await.unwrap();
    let url = format!("http://{}/slow", handle.local_addr());
    (handle, url)
}

async fn wait_for_connection(handle: &ServerHandle) {
    for _ in 0..100 {
        if handle.connection_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("request never reached the server");
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_request() {
    let (handle, url) = start_slow(Duration::from_millis(300)).await;

    let request = tokio::spawn(async move { client().get(url).send().await?.text().await });
    wait_for_connection(&handle).await;

    let outcome = handle.drain(Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Completed);
    assert_eq!(request.await.unwrap().unwrap(), "done");
}

#[tokio::test]
async fn test_drain_aborts_stragglers_at_deadline() {
    let (handle, url) = start_slow(Duration::from_secs(30)).await;

    let request = tokio::spawn(async move { client().get(url).send().await });
    wait_for_connection(&handle).await;

    let started = Instant::now();
    let outcome = handle.drain(Duration::from_millis(200)).await.unwrap();
    assert_eq!(outcome, DrainOutcome::DeadlineElapsed);
    assert!(started.elapsed() < Duration::from_secs(10));

    let result = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("straggler connection was not closed");
    assert!(result.unwrap().is_err());
}

#[tokio::test]
async fn test_new_connections_refused_after_drain() {
    let (handle, url) = start_slow(Duration::ZERO).await;

    handle.drain(Duration::from_secs(1)).await.unwrap();
    assert!(client().get(url).send().await.is_err());
}
