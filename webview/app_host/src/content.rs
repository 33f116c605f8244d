//! Where the pages served to the surface come from.

use crate::error::ContentError;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, Method, Response, StatusCode, Uri, header};
use axum::response::IntoResponse;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

pub type EmbeddedFiles = &'static [(&'static str, &'static [u8])];

#[derive(Debug, Clone, Default)]
pub enum Content {
    /// Nothing to serve; only routes answer.
    #[default]
    Empty,
    Directory(PathBuf),
    Embedded(EmbeddedFiles),
}

impl Content {
    pub(crate) fn validate(&self, root: &str) -> Result<(), ContentError> {
        if root.split('/').any(|segment| segment == "..") {
            return Err(ContentError::InvalidRoot(root.to_string()));
        }

        match self {
            Content::Directory(dir) if !dir.is_dir() => {
                Err(ContentError::MissingDirectory(dir.clone()))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn router(&self, root: &str) -> Router {
        match self {
            Content::Empty => Router::new(),
            Content::Directory(dir) => {
                Router::new().fallback_service(ServeDir::new(dir.join(root.trim_matches('/'))))
            }
            Content::Embedded(files) => {
                let files = *files;
                let root: Arc<str> = Arc::from(root);
                Router::new().fallback(move |method: Method, uri: Uri| {
                    let root = root.clone();
                    async move { embedded_response(files, &root, &method, uri.path()) }
                })
            }
        }
    }
}

fn embedded_response(
    files: EmbeddedFiles,
    root: &str,
    method: &Method,
    request_path: &str,
) -> Response<Body> {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some((bytes, mime)) = lookup_embedded(files, root, request_path) else {
        tracing::debug!(path = %request_path, "no embedded content");
        return StatusCode::NOT_FOUND.into_response();
    };

    let length = bytes.len();
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(bytes)
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    response
}

fn lookup_embedded(
    files: EmbeddedFiles,
    root: &str,
    request_path: &str,
) -> Option<(Bytes, mime_guess::Mime)> {
    let relative = relative_path(root, request_path)?;

    if let Some(found) = find(files, &relative) {
        return Some((found, guess(&relative)));
    }

    let index = format!("{relative}/index.html");
    let found = find(files, &index)?;
    Some((found, guess(&index)))
}

fn find(files: EmbeddedFiles, relative: &str) -> Option<Bytes> {
    files
        .iter()
        .find(|(path, _)| path.trim_start_matches('/') == relative)
        .map(|&(_, bytes)| Bytes::from_static(bytes))
}

fn guess(path: &str) -> mime_guess::Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}

/// Joins `root` and the request path into a `/`-separated relative path.
/// Returns `None` for anything that tries to climb out of the tree.
fn relative_path(root: &str, request_path: &str) -> Option<String> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
    let mut segments = Vec::new();

    for segment in root.split('/').chain(decoded.split('/')) {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment if segment.contains('\\') => return None,
            segment => segments.push(segment),
        }
    }

    let mut joined = segments.join("/");
    if decoded.is_empty() || decoded.ends_with('/') {
        if !joined.is_empty() {
            joined.push('/');
        }
        joined.push_str("index.html");
    }

    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    static FILES: EmbeddedFiles = &[
        ("index.html", b"<h1>home</h1>"),
        ("/site/index.html", b"<h1>site</h1>"),
        ("site/app.js", b"console.log(1)"),
        ("a b.txt", b"spaced"),
    ];

    #[test]
    fn request_paths_resolve_under_the_root() {
        assert_eq!(relative_path("", "/"), Some("index.html".to_string()));
        assert_eq!(relative_path("", ""), Some("index.html".to_string()));
        assert_eq!(relative_path("site", "/"), Some("site/index.html".to_string()));
        assert_eq!(relative_path("site", "/app.js"), Some("site/app.js".to_string()));
        assert_eq!(relative_path("", "/docs/"), Some("docs/index.html".to_string()));
        assert_eq!(relative_path("", "/a%20b.txt"), Some("a b.txt".to_string()));
    }

    #[test]
    fn climbing_out_of_the_tree_is_refused() {
        assert_eq!(relative_path("", "/../secret"), None);
        assert_eq!(relative_path("", "/%2e%2e/secret"), None);
        assert_eq!(relative_path("", "/a\\b"), None);
        assert_eq!(relative_path("", "/%ff%fe"), None);
    }

    #[test]
    fn embedded_tables_serve_files_and_directory_indexes() {
        let (body, mime) = lookup_embedded(FILES, "", "/").expect("index");
        assert_eq!(&body[..], b"<h1>home</h1>");
        assert_eq!(mime.essence_str(), "text/html");

        let (body, _) = lookup_embedded(FILES, "", "/site").expect("site index");
        assert_eq!(&body[..], b"<h1>site</h1>");

        let (body, mime) = lookup_embedded(FILES, "site", "/app.js").expect("app.js");
        assert_eq!(&body[..], b"console.log(1)");
        assert!(mime.essence_str().ends_with("javascript"));

        let (body, _) = lookup_embedded(FILES, "", "/a%20b.txt").expect("decoded");
        assert_eq!(&body[..], b"spaced");

        assert!(lookup_embedded(FILES, "", "/missing.css").is_none());
    }

    #[test]
    fn embedded_responses_honour_the_method() {
        let page = embedded_response(FILES, "", &Method::GET, "/");
        assert_eq!(page.status(), StatusCode::OK);
        assert_eq!(page.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(page.headers()[header::CONTENT_LENGTH], "13");

        let head = embedded_response(FILES, "", &Method::HEAD, "/");
        assert_eq!(head.headers()[header::CONTENT_LENGTH], "13");

        let delete = embedded_response(FILES, "", &Method::DELETE, "/");
        assert_eq!(delete.status(), StatusCode::METHOD_NOT_ALLOWED);

        let missing = embedded_response(FILES, "", &Method::GET, "/nope");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_rejects_missing_directories_and_escaping_roots() {
        let missing = Content::Directory(PathBuf::from("/definitely/not/here"));
        assert!(matches!(
            missing.validate(""),
            Err(ContentError::MissingDirectory(_))
        ));
        assert!(matches!(
            Content::Empty.validate("../up"),
            Err(ContentError::InvalidRoot(_))
        ));
        assert!(Content::Embedded(FILES).validate("site").is_ok());
    }
}
