//! Serves files from a resource directory.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use tracing::debug;

use crate::handler::Handler;

const INDEX_FILE: &str = "index.html";

/// A [`Handler`] answering `GET` and `HEAD` requests with the contents of files
/// below `root`.
///
/// - `/` and paths ending in `/` map to `index.html`
/// - any `..` segment is answered with `403 Forbidden`
/// - missing files and directories give `404 Not Found`
/// - other methods give `405 Method Not Allowed`
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        if path.ends_with('/') || resolved == self.root {
            resolved.push(INDEX_FILE);
        }
        Some(resolved)
    }
}

impl Handler for StaticFiles {
    type Error = io::Error;

    fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
        }

        let Some(file) = self.resolve(req.uri().path()) else {
            debug!(path = req.uri().path(), "reject path escaping the resource root");
            return Ok(status_response(StatusCode::FORBIDDEN));
        };

        let content = match fs::read(&file) {
            Ok(content) => content,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory) => {
                return Ok(status_response(StatusCode::NOT_FOUND));
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Ok(status_response(StatusCode::FORBIDDEN));
            }
            Err(e) => return Err(e),
        };

        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type(&file))
            .header(header::CONTENT_LENGTH, content.len());

        let body = if req.method() == Method::HEAD { Bytes::new() } else { Bytes::from(content) };
        builder.body(body).map_err(io::Error::other)
    }
}

fn content_type(file: &Path) -> HeaderValue {
    let mime = match file.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => mime::TEXT_HTML_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("js") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("json") => mime::APPLICATION_JSON,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("svg") => mime::IMAGE_SVG,
        Some("pdf") => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    HeaderValue::from_str(mime.as_ref()).unwrap_or(HeaderValue::from_static("application/octet-stream"))
}

pub(crate) fn status_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(status.canonical_reason().unwrap_or("").to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str) -> Request<Bytes> {
        Request::builder().method(method).uri(path).body(Bytes::new()).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        let handler = StaticFiles::new(dir.path());
        (dir, handler)
    }

    #[test]
    fn serves_index_for_root() {
        let (_dir, handler) = fixture();
        let response = handler.call(request(Method::GET, "/")).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"<h1>home</h1>");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[test]
    fn serves_nested_file() {
        let (_dir, handler) = fixture();
        let response = handler.call(request(Method::GET, "/css/site.css")).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");
    }

    #[test]
    fn head_has_length_but_no_body() {
        let (_dir, handler) = fixture();
        let response = handler.call(request(Method::HEAD, "/index.html")).unwrap();
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
        assert!(response.body().is_empty());
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_dir, handler) = fixture();
        let response = handler.call(request(Method::GET, "/nope.html")).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn parent_segments_are_forbidden() {
        let (_dir, handler) = fixture();
        let response = handler.call(request(Method::GET, "/css/../../etc/passwd")).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn post_is_not_allowed() {
        let (_dir, handler) = fixture();
        let response = handler.call(request(Method::POST, "/")).unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
