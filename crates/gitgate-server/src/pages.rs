//! Canned responses for well-known status conditions.

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Renders a status condition (404, 403, 304, ...) to a response.
pub trait ErrorPages: Send + Sync {
    /// Builds the response for `status`.
    fn render(&self, status: StatusCode) -> Response<Body>;
}

/// Which [`ErrorPages`] implementation the server uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStyle {
    /// Reason phrase as `text/plain`.
    #[default]
    Plain,
    /// A small HTML page.
    Html,
}

impl PageStyle {
    /// Instantiates the selected implementation.
    pub fn build(self) -> Arc<dyn ErrorPages> {
        match self {
            PageStyle::Plain => Arc::new(PlainPages),
            PageStyle::Html => Arc::new(HtmlPages),
        }
    }
}

/// `text/plain` reason phrases.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPages;

impl ErrorPages for PlainPages {
    fn render(&self, status: StatusCode) -> Response<Body> {
        build(status, "text/plain; charset=utf-8", || {
            format!("{}\n", status_line(status))
        })
    }
}

/// Minimal HTML error pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPages;

impl ErrorPages for HtmlPages {
    fn render(&self, status: StatusCode) -> Response<Body> {
        build(status, "text/html; charset=utf-8", || {
            let line = status_line(status);
            format!(
                r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{line}</title>
</head>
<body>
    <h1>{line}</h1>
</body>
</html>
"#
            )
        })
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn build(status: StatusCode, content_type: &'static str, page: impl FnOnce() -> String) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;

    // 304 and 1xx/204 carry no body.
    if status == StatusCode::NOT_MODIFIED
        || status == StatusCode::NO_CONTENT
        || status.is_informational()
    {
        return response;
    }

    *response.body_mut() = Body::from(page());
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_plain_page() {
        let response = PlainPages.render(StatusCode::NOT_FOUND);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "404 Not Found\n");
    }

    #[tokio::test]
    async fn test_html_page() {
        let response = HtmlPages.render(StatusCode::EXPECTATION_FAILED);
        assert_eq!(response.status(), StatusCode::EXPECTATION_FAILED);
        assert!(body_text(response).await.contains("<h1>417 Expectation Failed</h1>"));
    }

    #[tokio::test]
    async fn test_not_modified_has_no_body() {
        for pages in [PageStyle::Plain.build(), PageStyle::Html.build()] {
            let response = pages.render(StatusCode::NOT_MODIFIED);
            assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
            assert!(response.headers().get(header::CONTENT_TYPE).is_none());
            assert!(body_text(response).await.is_empty());
        }
    }

    #[test]
    fn test_page_style_from_yaml() {
        let style: PageStyle = serde_yaml::from_str("html").unwrap();
        assert_eq!(style, PageStyle::Html);
        assert!(serde_yaml::from_str::<PageStyle>("fancy").is_err());
    }
}
