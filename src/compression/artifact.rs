//! Pre-compressed sibling artifacts (`<path>.br`, `<path>.gz`).
//!
//! Build pipelines can ship compressed copies next to static assets. When a
//! client accepts the matching encoding the artifact is streamed verbatim and
//! the downstream handler never runs.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::response::Response;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::{HeaderValue, Method, StatusCode};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::ContentEncoding;

/// An opened pre-compressed file, ready to be streamed.
#[derive(Debug)]
pub struct PrebuiltArtifact {
    file: File,
    len: u64,
    encoding: ContentEncoding,
    /// Path of the uncompressed asset, used for the content type
    original: PathBuf,
}

impl PrebuiltArtifact {
    /// Open the artifact for `request_path` under `root` in the given encoding.
    ///
    /// Returns `None` when the artifact is absent, unreadable, or when the
    /// request path cannot be mapped safely under `root`. Opening (rather
    /// than a bare stat) makes the decision final for this request.
    pub async fn open(root: &Path, request_path: &str, encoding: ContentEncoding) -> Option<Self> {
        let extension = encoding.artifact_extension()?;
        let original = resolve_under(root, request_path)?;

        let mut artifact = original.clone().into_os_string();
        artifact.push(".");
        artifact.push(extension);
        let artifact = PathBuf::from(artifact);

        let file = match File::open(&artifact).await {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %artifact.display(), error = %e, "Pre-built artifact not readable");
                }
                return None;
            }
        };

        let metadata = file.metadata().await.ok()?;
        if !metadata.is_file() {
            return None;
        }

        tracing::debug!(
            path = %artifact.display(),
            encoding = encoding.as_str(),
            size = metadata.len(),
            "Serving pre-built artifact"
        );

        Some(Self {
            file,
            len: metadata.len(),
            encoding,
            original,
        })
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Build the response streaming the artifact verbatim.
    pub fn into_response(self, method: &Method) -> Response {
        let content_type = mime_guess::from_path(&self.original)
            .first_raw()
            .unwrap_or("application/octet-stream");

        let body = if *method == Method::HEAD {
            Body::empty()
        } else {
            Body::from_stream(ReaderStream::new(self.file))
        };

        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(self.encoding.as_str()));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.len));
        headers.append(VARY, HeaderValue::from_static("accept-encoding"));
        response
    }
}

/// Map a URL path onto a file below `root`.
///
/// The path is percent-decoded; any parent, root or prefix component after
/// the leading slash rejects the request. A trailing slash maps to
/// `index.html`.
fn resolve_under(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let relative = decoded.trim_start_matches('/');

    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.is_empty() || decoded.ends_with('/') {
        path.push("index.html");
    }
    Some(path)
}
