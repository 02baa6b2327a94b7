//! Content-negotiated response compression.
//!
//! The negotiator is the outermost content layer on every route. Per request
//! it makes a single decision from the client's `Accept-Encoding`:
//!
//! 1. brotli accepted and `<path>.br` exists: stream the artifact, skip the handler
//! 2. gzip accepted and `<path>.gz` exists: same with the gzip artifact
//! 3. brotli accepted: run the handler and brotli-encode its body
//! 4. gzip accepted: run the handler and gzip-encode its body
//! 5. otherwise: run the handler untouched
//!
//! The preference order is fixed (brotli, gzip, identity) and does not follow
//! header weights; a `q=0` token only disables that codec.

pub mod artifact;
pub mod encoder;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH,
    CONTENT_RANGE, VARY,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use artifact::PrebuiltArtifact;

/// Encoding chosen for one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Brotli,
}

impl ContentEncoding {
    /// Value of the `Content-Encoding` header for this encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Brotli => "br",
        }
    }

    /// Suffix of the pre-built artifact sibling, if the encoding has one
    pub fn artifact_extension(&self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some("gz"),
            ContentEncoding::Brotli => Some("br"),
        }
    }
}

/// Codecs the client is willing to receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptEncoding {
    pub brotli: bool,
    pub gzip: bool,
}

impl AcceptEncoding {
    /// Parse every `Accept-Encoding` header on the request.
    ///
    /// Tokens are matched case-insensitively. `q=0` rejects a codec, `*`
    /// accepts any codec not listed explicitly.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut brotli = None;
        let mut gzip = None;
        let mut wildcard = None;

        for value in headers.get_all(ACCEPT_ENCODING) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for token in value.split(',') {
                let mut parts = token.split(';');
                let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
                let acceptable = parts
                    .filter_map(|param| {
                        let (key, value) = param.split_once('=')?;
                        key.trim().eq_ignore_ascii_case("q").then_some(value)
                    })
                    .last()
                    .map(|q| q.trim().parse::<f32>().map(|q| q > 0.0).unwrap_or(false))
                    .unwrap_or(true);

                match name.as_str() {
                    "br" => brotli = Some(acceptable),
                    "gzip" | "x-gzip" => gzip = Some(acceptable),
                    "*" => wildcard = Some(acceptable),
                    _ => {}
                }
            }
        }

        let wildcard = wildcard.unwrap_or(false);
        Self {
            brotli: brotli.unwrap_or(wildcard),
            gzip: gzip.unwrap_or(wildcard),
        }
    }

    /// Encodings to try, most preferred first. Identity is always last.
    pub fn preference(&self) -> Vec<ContentEncoding> {
        let mut order = Vec::with_capacity(3);
        if self.brotli {
            order.push(ContentEncoding::Brotli);
        }
        if self.gzip {
            order.push(ContentEncoding::Gzip);
        }
        order.push(ContentEncoding::Identity);
        order
    }
}

/// Request extension recording that a negotiator already handled the
/// request; nested negotiators pass such requests through untouched.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedEncoding(pub ContentEncoding);

/// Shared state of the compression layer.
#[derive(Debug, Clone)]
pub struct Negotiator {
    static_root: PathBuf,
    /// `Cache-Control` for artifact responses, which never reach the
    /// static route's header layer
    artifact_cache_control: Option<HeaderValue>,
}

impl Negotiator {
    pub fn new(static_root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            static_root: static_root.into(),
            artifact_cache_control: None,
        })
    }

    pub fn with_cache_control(
        static_root: impl Into<PathBuf>,
        cache_control: HeaderValue,
    ) -> Arc<Self> {
        Arc::new(Self {
            static_root: static_root.into(),
            artifact_cache_control: Some(cache_control),
        })
    }

    /// Look for a pre-built artifact in preference order.
    async fn find_artifact(&self, path: &str, accepted: &AcceptEncoding) -> Option<PrebuiltArtifact> {
        for encoding in accepted.preference() {
            if let Some(artifact) = PrebuiltArtifact::open(&self.static_root, path, encoding).await {
                return Some(artifact);
            }
        }
        None
    }
}

/// Compression middleware, installed with
/// `axum::middleware::from_fn_with_state(negotiator, compression_layer)`.
pub async fn compression_layer(
    State(negotiator): State<Arc<Negotiator>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<NegotiatedEncoding>().is_some() {
        return next.run(request).await;
    }

    let accepted = AcceptEncoding::from_headers(request.headers());
    let method = request.method().clone();

    if method == Method::GET || method == Method::HEAD {
        if let Some(artifact) = negotiator.find_artifact(request.uri().path(), &accepted).await {
            let mut response = artifact.into_response(&method);
            if let Some(cache_control) = &negotiator.artifact_cache_control {
                response
                    .headers_mut()
                    .insert(CACHE_CONTROL, cache_control.clone());
            }
            return response;
        }
    }

    let encoding = accepted
        .preference()
        .first()
        .copied()
        .unwrap_or(ContentEncoding::Identity);
    request.extensions_mut().insert(NegotiatedEncoding(encoding));

    let mut response = next.run(request).await;
    if encoding == ContentEncoding::Identity {
        append_vary(response.headers_mut());
        return response;
    }
    encode_response(response, encoding, &method)
}

/// Apply `encoding` to a handler response.
fn encode_response(response: Response, encoding: ContentEncoding, method: &Method) -> Response {
    let (mut parts, body) = response.into_parts();
    append_vary(&mut parts.headers);

    if parts.headers.contains_key(CONTENT_ENCODING) {
        // Already encoded further down the stack
        return Response::from_parts(parts, body);
    }
    // A byte range of the identity representation cannot be re-encoded
    if parts.status == StatusCode::PARTIAL_CONTENT || parts.headers.contains_key(CONTENT_RANGE) {
        return Response::from_parts(parts, body);
    }
    if parts.status == StatusCode::NO_CONTENT
        || parts.status == StatusCode::NOT_MODIFIED
        || parts.status.is_informational()
    {
        return Response::from_parts(parts, body);
    }

    let Some(encoder) = encoder::for_encoding(encoding) else {
        return Response::from_parts(parts, body);
    };

    parts
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.remove(ACCEPT_RANGES);

    // HEAD advertises the same headers as GET but has no body to encode
    if *method == Method::HEAD {
        return Response::from_parts(parts, body);
    }

    Response::from_parts(parts, encoder::encode_body(body, encoder))
}

fn append_vary(headers: &mut HeaderMap) {
    let already = headers.get_all(VARY).iter().any(|value| {
        value
            .to_str()
            .map(|v| {
                v.split(',')
                    .any(|item| item.trim().eq_ignore_ascii_case("accept-encoding") || item.trim() == "*")
            })
            .unwrap_or(false)
    });
    if !already {
        headers.append(VARY, HeaderValue::from_static("accept-encoding"));
    }
}
