//! HTTP application.
//!
//! Routes:
//! - `/{repo}/{*path}`: git Smart HTTP, see [`RepositoryRouter`]
//! - `{mount}/{*path}`: static files, when configured
//!
//! Everything else is answered by the configured error pages.

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::hooks::RepositoryHooks;
use crate::observability::request_id_layer;
use crate::pages::ErrorPages;
use crate::router::RepositoryRouter;
use crate::static_files::StaticFiles;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{any, get},
    Router,
};
use gitgate_git::GitBackend;
use std::io;
use std::sync::Arc;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository resolution and the git endpoints.
    pub repositories: RepositoryRouter,
    /// Optional static file mount.
    pub static_files: Option<StaticMount>,
    /// Renders error responses.
    pub pages: Arc<dyn ErrorPages>,
    log: Span,
}

/// Static files served under a URL prefix.
#[derive(Clone)]
pub struct StaticMount {
    /// URL prefix without a trailing slash.
    pub mount: String,
    /// The files.
    pub files: StaticFiles,
}

impl AppState {
    /// Builds the application from configuration.
    ///
    /// Creates the content root if it is missing and auto-creation is on.
    pub async fn from_config(config: &Config, log: Span) -> io::Result<Self> {
        let pages = config.error_pages.build();
        let backend =
            GitBackend::new(&config.git.executable, log.clone()).with_chunk_size(config.block_size);

        let repositories =
            RepositoryRouter::new(&config.content_root, backend, config.auto_create, log.clone())
                .await?
                .with_update_server_info(config.git.update_server_info);

        let static_files = match &config.static_files {
            Some(static_config) => Some(StaticMount {
                mount: static_config.prefix().to_string(),
                files: StaticFiles::new(
                    &static_config.root,
                    config.block_size,
                    pages.clone(),
                    log.clone(),
                )
                .await?,
            }),
            None => None,
        };

        Ok(Self {
            repositories,
            static_files,
            pages,
            log,
        })
    }

    /// Installs repository creation hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn RepositoryHooks>) -> Self {
        self.repositories = self.repositories.with_hooks(hooks);
        self
    }

    fn error_response(&self, err: ApiError) -> Response {
        let status = err.status();
        if status.is_server_error() || status == StatusCode::EXPECTATION_FAILED {
            tracing::error!(parent: &self.log, error = %err, status = %status, "request failed");
        } else {
            tracing::debug!(parent: &self.log, error = %err, status = %status, "request rejected");
        }
        self.pages.render(status)
    }
}

/// Creates the HTTP router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().route("/{repo}/{*path}", any(git_request));

    if let Some(static_mount) = &state.static_files {
        router = router.route(
            &format!("{}/{{*path}}", static_mount.mount),
            get(static_file),
        );
    }

    router
        .fallback(not_found)
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}

/// Smart HTTP endpoints of one repository.
async fn git_request(
    State(state): State<AppState>,
    Path((repo, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts, path);

    match state.repositories.route(&repo, &ctx, body).await {
        Ok(response) => response,
        Err(err) => state.error_response(err),
    }
}

async fn static_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    match &state.static_files {
        Some(static_mount) => static_mount.files.serve(&path, &headers).await,
        None => state.pages.render(StatusCode::NOT_FOUND),
    }
}

async fn not_found(State(state): State<AppState>) -> Response {
    state.pages.render(StatusCode::NOT_FOUND)
}
