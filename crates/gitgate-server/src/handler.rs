//! The two Smart HTTP endpoints of one repository.

use crate::context::RequestContext;
use crate::error::ApiError;
use axum::{
    body::Body,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use gitgate_git::{BoundedReader, GitBackend, ProcessInput, ProcessOutput, Repository, Service};
use std::io;
use tokio_util::io::StreamReader;
use tracing::Span;

/// What a request asks of a repository, decided before the repository is
/// looked up so that a bad request never creates or runs anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `GET info/refs?service=...`
    AdvertiseRefs(Service),
    /// `POST <service>` with a result `Accept`.
    RunService(Service),
}

impl Operation {
    /// Maps a request to an operation.
    ///
    /// `GET info/refs` needs a whitelisted `service` parameter and anything
    /// carrying a result content type in `Accept` needs a whitelisted
    /// service name as its path; both fail with Method Not Allowed
    /// otherwise. All other requests are Not Found.
    pub fn plan(ctx: &RequestContext) -> Result<Self, ApiError> {
        if ctx.method() == Method::GET && ctx.path() == "info/refs" {
            let name = ctx.query("service").unwrap_or_default();
            return Service::from_name(name)
                .map(Operation::AdvertiseRefs)
                .ok_or_else(|| ApiError::MethodNotAllowed(format!("service {name:?}")));
        }

        if Service::from_accept(ctx.accept()).is_some() {
            return Service::from_name(ctx.path())
                .map(Operation::RunService)
                .ok_or_else(|| ApiError::MethodNotAllowed(format!("command {:?}", ctx.path())));
        }

        Err(ApiError::NotFound(format!("{} {}", ctx.method(), ctx.path())))
    }

    /// The service the operation runs.
    pub fn service(&self) -> Service {
        match self {
            Operation::AdvertiseRefs(service) | Operation::RunService(service) => *service,
        }
    }
}

/// Serves Smart HTTP for one resolved repository.
#[derive(Debug, Clone)]
pub struct RepositoryHandler {
    repository: Repository,
    backend: GitBackend,
    update_server_info: bool,
    log: Span,
}

impl RepositoryHandler {
    /// Creates a handler for `repository`.
    pub fn new(repository: Repository, backend: GitBackend, log: Span) -> Self {
        Self {
            repository,
            backend,
            update_server_info: true,
            log,
        }
    }

    /// Enables or disables the metadata refresh after pushes.
    pub fn with_update_server_info(mut self, enabled: bool) -> Self {
        self.update_server_info = enabled;
        self
    }

    /// The repository served.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Runs a planned operation.
    pub fn dispatch(
        &self,
        operation: Operation,
        ctx: &RequestContext,
        body: Body,
    ) -> Result<Response, ApiError> {
        match operation {
            Operation::AdvertiseRefs(service) => self.advertise_refs(service),
            Operation::RunService(service) => self.run_service(service, ctx, body),
        }
    }

    /// `GET info/refs`: the announcement frame followed by git's ref list.
    pub fn advertise_refs(&self, service: Service) -> Result<Response, ApiError> {
        tracing::debug!(parent: &self.log, service = %service, repository = %self.repository.path().display(), "advertising refs");
        let output = self.backend.advertise_refs(&self.repository, service)?;
        Ok(stream_response(service.advertisement_content_type(), output))
    }

    /// `POST <service>`: the request body piped through git.
    ///
    /// With a declared `Content-Length` exactly that many bytes are read
    /// from the body; otherwise the body is forwarded until it ends.
    pub fn run_service(
        &self,
        service: Service,
        ctx: &RequestContext,
        body: Body,
    ) -> Result<Response, ApiError> {
        tracing::debug!(
            parent: &self.log,
            service = %service,
            repository = %self.repository.path().display(),
            content_length = ?ctx.content_length(),
            "running service"
        );

        let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
        let input: ProcessInput = match ctx.content_length() {
            Some(length) => Box::new(BoundedReader::new(reader, length)),
            None => Box::new(reader),
        };

        let mut output = self.backend.stateless_rpc(&self.repository, service, input)?;

        if service.is_push() && self.update_server_info {
            let backend = self.backend.clone();
            let repository = self.repository.clone();
            let log = self.log.clone();
            output = output.on_success(move || async move {
                if let Err(e) = backend.update_server_info(&repository).await {
                    tracing::warn!(parent: &log, error = %e, repository = %repository.path().display(), "update-server-info failed");
                }
            });
        }

        Ok(stream_response(service.result_content_type(), output))
    }
}

fn stream_response(content_type: &'static str, output: ProcessOutput) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(output),
    )
        .into_response()
}
