//! Plain file serving with conditional GET.

use crate::pages::ErrorPages;
use crate::router::{canonical_target, is_strict_descendant};
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::io::ReaderStream;
use tracing::Span;

/// IMF-fixdate, the only date format HTTP/1.1 senders emit.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Serves files below one directory.
#[derive(Clone)]
pub struct StaticFiles {
    root: PathBuf,
    block_size: usize,
    pages: Arc<dyn ErrorPages>,
    log: Span,
}

impl StaticFiles {
    /// Serves `root`, which must exist.
    pub async fn new(
        root: &Path,
        block_size: usize,
        pages: Arc<dyn ErrorPages>,
        log: Span,
    ) -> io::Result<Self> {
        let root = tokio::fs::canonicalize(root).await?;
        Ok(Self {
            root,
            block_size: block_size.max(1),
            pages,
            log,
        })
    }

    /// Responds with the file at `path` relative to the root, a 304 when
    /// the request's validators still match, or a 404.
    pub async fn serve(&self, path: &str, headers: &HeaderMap) -> Response {
        match self.try_serve(path, headers).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(parent: &self.log, path = %path, error = %e, "static file not served");
                self.pages.render(StatusCode::NOT_FOUND)
            }
        }
    }

    async fn try_serve(&self, path: &str, headers: &HeaderMap) -> io::Result<Response> {
        let full_path = canonical_target(&self.root, Path::new(path.trim_start_matches('/'))).await?;
        if !is_strict_descendant(&full_path, &self.root) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "path escapes the static root",
            ));
        }

        let meta = tokio::fs::metadata(&full_path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
        }

        let validators = Validators::new(meta.modified()?);
        if validators.not_modified(headers) {
            let mut response = self.pages.render(StatusCode::NOT_MODIFIED);
            validators.apply(response.headers_mut());
            return Ok(response);
        }

        let file = tokio::fs::File::open(&full_path).await?;
        let content_type = mime_guess::from_path(&full_path)
            .first_raw()
            .unwrap_or("application/octet-stream");

        let mut response = Response::new(Body::from_stream(ReaderStream::with_capacity(
            file,
            self.block_size,
        )));
        let response_headers = response.headers_mut();
        validators.apply(response_headers);
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
        Ok(response)
    }
}

/// Caching headers derived from a file's modification time.
struct Validators {
    modified: DateTime<Utc>,
    etag: String,
}

impl Validators {
    fn new(mtime: SystemTime) -> Self {
        let since_epoch = mtime.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            modified: DateTime::<Utc>::from(mtime),
            etag: format!(
                "\"{}.{:09}\"",
                since_epoch.as_secs(),
                since_epoch.subsec_nanos()
            ),
        }
    }

    /// `If-Modified-Since` at or after the modification second, or an
    /// `If-None-Match` of `*` or naming our tag.
    fn not_modified(&self, headers: &HeaderMap) -> bool {
        let since = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok());
        if let Some(since) = since {
            if since.timestamp() >= self.modified.timestamp() {
                return true;
            }
        }

        headers
            .get_all(header::IF_NONE_MATCH)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.trim() == "*" || value.contains(&self.etag))
    }

    fn apply(&self, headers: &mut HeaderMap) {
        let now = Utc::now().format(HTTP_DATE).to_string();
        let modified = self.modified.format(HTTP_DATE).to_string();
        for (name, value) in [
            (header::DATE, now),
            (header::LAST_MODIFIED, modified),
            (header::ETAG, self.etag.clone()),
        ] {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }
}
