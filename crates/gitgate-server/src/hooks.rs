//! Callbacks around repository auto-creation.

use crate::error::ApiError;
use async_trait::async_trait;
use gitgate_git::Repository;
use std::path::Path;

/// Extension points the router calls when it creates a repository on push.
///
/// Returning an error from either hook aborts the request with that error's
/// status. Both default to accepting.
#[async_trait]
pub trait RepositoryHooks: Send + Sync {
    /// Called before `git init` runs for `path`.
    async fn pre_create(&self, path: &Path) -> Result<(), ApiError> {
        let _ = path;
        Ok(())
    }

    /// Called after the bare repository exists.
    async fn post_create(&self, repository: &Repository) -> Result<(), ApiError> {
        let _ = repository;
        Ok(())
    }
}

/// Accepts every creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RepositoryHooks for NoHooks {}
