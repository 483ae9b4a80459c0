//! The git executable and the command lines the bridge runs with it.

use crate::process::{self, CommandLine, ProcessInput, ProcessOutput, DEFAULT_CHUNK_SIZE};
use crate::{pktline, Repository, Result, Service};
use std::path::{Path, PathBuf};
use tracing::Span;

/// Runs git sub-commands against local repositories.
///
/// This is the only place command lines are assembled. Their arguments are
/// limited to fixed flags, a [`Service`] variant and a repository path the
/// caller has already contained.
#[derive(Debug, Clone)]
pub struct GitBackend {
    executable: PathBuf,
    chunk_size: usize,
    log: Span,
}

impl GitBackend {
    /// Creates a backend running `executable` (usually just `git`).
    pub fn new(executable: impl Into<PathBuf>, log: Span) -> Self {
        Self {
            executable: executable.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log,
        }
    }

    /// Sets the chunk size used when pumping data through git.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The configured executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// `git <service> --stateless-rpc --advertise-refs <repo>`, with the
    /// service announcement frame ahead of git's output.
    pub fn advertise_refs(&self, repo: &Repository, service: Service) -> Result<ProcessOutput> {
        let command = self
            .git()
            .arg(service.subcommand())
            .arg("--stateless-rpc")
            .arg("--advertise-refs")
            .arg(repo.path());

        process::spawn(
            &command,
            None,
            vec![pktline::service_advertisement(service)],
            self.chunk_size,
            &self.log,
        )
    }

    /// `git <service> --stateless-rpc <repo>` fed with `input`.
    pub fn stateless_rpc(
        &self,
        repo: &Repository,
        service: Service,
        input: ProcessInput,
    ) -> Result<ProcessOutput> {
        let command = self
            .git()
            .arg(service.subcommand())
            .arg("--stateless-rpc")
            .arg(repo.path());

        process::spawn(&command, Some(input), Vec::new(), self.chunk_size, &self.log)
    }

    /// `git init --quiet --bare <path>`.
    pub async fn init_bare(&self, path: &Path) -> Result<Repository> {
        let command = self.git().arg("init").arg("--quiet").arg("--bare").arg(path);
        process::run(&command, &self.log).await?;
        Ok(Repository::assume(path))
    }

    /// `git --git-dir <repo> update-server-info`, refreshing the files dumb
    /// HTTP clients discover refs and packs through.
    pub async fn update_server_info(&self, repo: &Repository) -> Result<()> {
        let command = self
            .git()
            .arg("--git-dir")
            .arg(repo.path())
            .arg("update-server-info");
        process::run(&command, &self.log).await
    }

    fn git(&self) -> CommandLine {
        CommandLine::new(self.executable.as_os_str())
    }
}
