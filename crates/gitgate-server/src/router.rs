//! Maps request paths to repositories under the content root.
//!
//! Every request names its repository in the first path segment. The name
//! must end in `.git` and must resolve, after symlinks and `..` are applied,
//! to a strict descendant of the content root. Only then is the repository
//! looked up, or created when a push targets one that does not exist yet.

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::handler::{Operation, RepositoryHandler};
use crate::hooks::{NoHooks, RepositoryHooks};
use axum::body::Body;
use axum::response::Response;
use gitgate_git::{GitBackend, Repository, Service};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::Span;

/// Suffix every repository name carries.
const REPOSITORY_SUFFIX: &str = ".git";

/// A repository located by [`RepositoryRouter::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The repository.
    pub repository: Repository,
    /// True if this request created it.
    pub created: bool,
}

/// Resolves repositories under one content root and hands requests to a
/// [`RepositoryHandler`].
#[derive(Clone)]
pub struct RepositoryRouter {
    root: PathBuf,
    backend: GitBackend,
    auto_create: bool,
    update_server_info: bool,
    hooks: Arc<dyn RepositoryHooks>,
    log: Span,
}

impl std::fmt::Debug for RepositoryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRouter")
            .field("root", &self.root)
            .field("auto_create", &self.auto_create)
            .field("update_server_info", &self.update_server_info)
            .finish_non_exhaustive()
    }
}

impl RepositoryRouter {
    /// Creates a router for `root`.
    ///
    /// A missing root is created when `auto_create` is set and is an error
    /// otherwise. The root is canonicalized once, here.
    pub async fn new(
        root: &Path,
        backend: GitBackend,
        auto_create: bool,
        log: Span,
    ) -> io::Result<Self> {
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("content root {} is not a directory", root.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && auto_create => {
                tokio::fs::create_dir_all(root).await?;
                tracing::info!(parent: &log, root = %root.display(), "created content root");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("content root {} does not exist", root.display()),
                ))
            }
            Err(e) => return Err(e),
        }

        let root = tokio::fs::canonicalize(root).await?;

        Ok(Self {
            root,
            backend,
            auto_create,
            update_server_info: true,
            hooks: Arc::new(NoHooks),
            log,
        })
    }

    /// Installs creation hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn RepositoryHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enables or disables the metadata refresh after pushes.
    pub fn with_update_server_info(mut self, enabled: bool) -> Self {
        self.update_server_info = enabled;
        self
    }

    /// The canonical content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serves one request for repository `name`.
    ///
    /// Name, containment and the requested operation are all validated
    /// before the repository is looked up or created.
    pub async fn route(
        &self,
        name: &str,
        ctx: &RequestContext,
        body: Body,
    ) -> Result<Response, ApiError> {
        let path = self.contain(name).await?;
        let operation = Operation::plan(ctx)?;
        let resolved = self.open_or_create(path, ctx.accept()).await?;

        tracing::debug!(
            parent: &self.log,
            repository = %resolved.repository.path().display(),
            created = resolved.created,
            service = %operation.service(),
            "routing request"
        );

        RepositoryHandler::new(resolved.repository, self.backend.clone(), self.log.clone())
            .with_update_server_info(self.update_server_info)
            .dispatch(operation, ctx, body)
    }

    /// Locates repository `name`, creating it for a push when allowed.
    pub async fn resolve(&self, name: &str, accept: &str) -> Result<Resolved, ApiError> {
        let path = self.contain(name).await?;
        self.open_or_create(path, accept).await
    }

    /// Checks the name shape and returns its canonical path inside the root.
    async fn contain(&self, name: &str) -> Result<PathBuf, ApiError> {
        if name.len() <= REPOSITORY_SUFFIX.len() || !name.ends_with(REPOSITORY_SUFFIX) {
            return Err(ApiError::NotFound(format!("{name:?} is not a repository name")));
        }

        let path = match canonical_target(&self.root, Path::new(name)).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                tracing::warn!(parent: &self.log, name = %name, error = %e, "refusing repository path");
                return Err(ApiError::Forbidden(name.to_string()));
            }
            Err(e) => {
                tracing::debug!(parent: &self.log, name = %name, error = %e, "unresolvable repository path");
                return Err(ApiError::NotFound(name.to_string()));
            }
        };

        if !is_strict_descendant(&path, &self.root) {
            tracing::warn!(parent: &self.log, name = %name, resolved = %path.display(), "repository path escapes the content root");
            return Err(ApiError::Forbidden(name.to_string()));
        }

        Ok(path)
    }

    async fn open_or_create(&self, path: PathBuf, accept: &str) -> Result<Resolved, ApiError> {
        let path = match Repository::open(path).await {
            Ok(repository) => {
                return Ok(Resolved {
                    repository,
                    created: false,
                })
            }
            Err(gitgate_git::GitError::NotARepository(path)) => path,
            Err(e) => return Err(e.into()),
        };

        if tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            tracing::debug!(parent: &self.log, path = %path.display(), "directory lacks repository markers, serving it anyway");
            return Ok(Resolved {
                repository: Repository::assume(path),
                created: false,
            });
        }

        let push = accept.contains(Service::ReceivePack.result_content_type());
        if !(self.auto_create && push) {
            return Err(ApiError::NotFound(path.display().to_string()));
        }

        self.hooks.pre_create(&path).await?;
        let repository = self.backend.init_bare(&path).await?;
        self.hooks.post_create(&repository).await?;

        tracing::info!(parent: &self.log, path = %path.display(), "created repository");
        Ok(Resolved {
            repository,
            created: true,
        })
    }
}

/// Resolves `relative` against the canonical `root` the way `realpath`
/// does: existing components are canonicalized (following symlinks), `..`
/// is applied to what has been resolved so far and missing components are
/// appended as they are.
///
/// A dangling symlink is reported as `PermissionDenied`, since where it
/// would lead cannot be checked.
pub(crate) async fn canonical_target(root: &Path, relative: &Path) -> io::Result<PathBuf> {
    let mut resolved = root.to_path_buf();

    for component in relative.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                resolved = PathBuf::from(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(segment) => {
                let next = resolved.join(segment);
                resolved = match tokio::fs::canonicalize(&next).await {
                    Ok(canonical) => canonical,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        if tokio::fs::symlink_metadata(&next).await.is_ok() {
                            return Err(io::Error::new(
                                io::ErrorKind::PermissionDenied,
                                format!("{} is a dangling symbolic link", next.display()),
                            ));
                        }
                        next
                    }
                    Err(e) => return Err(e),
                };
            }
        }
    }

    Ok(resolved)
}

pub(crate) fn is_strict_descendant(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const PUSH: &str = "application/x-git-receive-pack-result";
    const FETCH: &str = "application/x-git-upload-pack-result";

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn make_bare(dir: &Path) {
        std::fs::create_dir_all(dir.join("objects")).unwrap();
        std::fs::create_dir_all(dir.join("refs")).unwrap();
        std::fs::write(dir.join("config"), "[core]\n\tbare = true\n").unwrap();
        std::fs::write(dir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    async fn router(root: &Path, auto_create: bool) -> RepositoryRouter {
        RepositoryRouter::new(root, GitBackend::new("git", Span::none()), auto_create, Span::none())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_creates_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("repos");

        let router = router(&root, true).await;
        assert!(root.is_dir());
        assert_eq!(router.root(), std::fs::canonicalize(&root).unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_missing_root_without_auto_create() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repos");

        let err = RepositoryRouter::new(&root, GitBackend::new("git", Span::none()), false, Span::none())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_resolve_existing_repository() {
        let tmp = TempDir::new().unwrap();
        make_bare(&tmp.path().join("project.git"));
        let router = router(tmp.path(), false).await;

        let resolved = router.resolve("project.git", "").await.unwrap();
        assert!(!resolved.created);
        assert_eq!(
            resolved.repository.path(),
            router.root().join("project.git")
        );
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_names() {
        let tmp = TempDir::new().unwrap();
        let router = router(tmp.path(), true).await;

        for name in ["project", ".git", "project.git.bak", ""] {
            let err = router.resolve(name, PUSH).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::NOT_FOUND, "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_resolve_rejects_parent_escape() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repos");
        std::fs::create_dir(&root).unwrap();
        make_bare(&tmp.path().join("outside.git"));
        let router = router(&root, true).await;

        for name in ["../outside.git", "../sibling.git", "a/../../x.git", "/tmp/x.git"] {
            let err = router.resolve(name, PUSH).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::FORBIDDEN, "{name:?}");
        }
        assert!(!tmp.path().join("sibling.git").exists());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_allows_dotdot_inside_root() {
        let tmp = TempDir::new().unwrap();
        make_bare(&tmp.path().join("project.git"));
        std::fs::create_dir(tmp.path().join("group")).unwrap();
        let router = router(tmp.path(), false).await;

        let resolved = router.resolve("group/../project.git", "").await.unwrap();
        assert_eq!(resolved.repository.path(), router.root().join("project.git"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repos");
        std::fs::create_dir(&root).unwrap();
        let outside = tmp.path().join("outside.git");
        make_bare(&outside);
        std::os::unix::fs::symlink(&outside, root.join("link.git")).unwrap();
        std::os::unix::fs::symlink(tmp.path(), root.join("up")).unwrap();
        let router = router(&root, true).await;

        let err = router.resolve("link.git", "").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = router.resolve("up/new.git", PUSH).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(!tmp.path().join("new.git").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_dangling_symlink() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repos");
        std::fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("nowhere.git"), root.join("dangling.git"))
            .unwrap();
        let router = router(&root, true).await;

        let err = router.resolve("dangling.git", PUSH).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(!tmp.path().join("nowhere.git").exists());
    }

    #[tokio::test]
    async fn test_plain_directory_is_tolerated() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("loose.git")).unwrap();
        let router = router(tmp.path(), false).await;

        let resolved = router.resolve("loose.git", "").await.unwrap();
        assert!(!resolved.created);
    }

    #[tokio::test]
    async fn test_missing_repository_not_created_for_fetch() {
        let tmp = TempDir::new().unwrap();
        let router = router(tmp.path(), true).await;

        let err = router.resolve("missing.git", FETCH).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(!tmp.path().join("missing.git").exists());
    }

    #[tokio::test]
    async fn test_missing_repository_not_created_when_disabled() {
        let tmp = TempDir::new().unwrap();
        let router = router(tmp.path(), false).await;

        let err = router.resolve("missing.git", PUSH).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(!tmp.path().join("missing.git").exists());
    }

    #[tokio::test]
    async fn test_push_creates_repository() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let router = router(tmp.path(), true).await;

        let resolved = router.resolve("team/new.git", PUSH).await.unwrap();
        assert!(resolved.created);
        assert!(Repository::open(tmp.path().join("team").join("new.git"))
            .await
            .is_ok());

        let again = router.resolve("team/new.git", PUSH).await.unwrap();
        assert!(!again.created);
    }

    #[derive(Default)]
    struct Counting {
        pre: AtomicUsize,
        post: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl RepositoryHooks for Counting {
        async fn pre_create(&self, path: &Path) -> Result<(), ApiError> {
            self.pre.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(ApiError::Forbidden(path.display().to_string()));
            }
            Ok(())
        }

        async fn post_create(&self, _repository: &Repository) -> Result<(), ApiError> {
            self.post.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pre_create_hook_can_reject() {
        let tmp = TempDir::new().unwrap();
        let hooks = Arc::new(Counting {
            reject: true,
            ..Default::default()
        });
        let router = router(tmp.path(), true).await.with_hooks(hooks.clone());

        let err = router.resolve("denied.git", PUSH).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(hooks.pre.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.post.load(Ordering::SeqCst), 0);
        assert!(!tmp.path().join("denied.git").exists());
    }

    #[tokio::test]
    async fn test_hooks_run_around_creation() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let hooks = Arc::new(Counting::default());
        let router = router(tmp.path(), true).await.with_hooks(hooks.clone());

        router.resolve("hooked.git", PUSH).await.unwrap();
        assert_eq!(hooks.pre.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.post.load(Ordering::SeqCst), 1);
    }

    fn lexical(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    out.pop();
                }
                Component::CurDir => {}
                other => out.push(other.as_os_str()),
            }
        }
        out
    }

    proptest::proptest! {
        // Without symlinks, resolution must agree with plain lexical
        // normalization, and containment follows from it.
        #[test]
        fn prop_resolution_matches_lexical(
            segments in proptest::collection::vec(
                proptest::prop_oneof![
                    proptest::strategy::Just(".."),
                    proptest::strategy::Just("."),
                    proptest::strategy::Just("a"),
                    proptest::strategy::Just("x.git"),
                ],
                1..4,
            )
        ) {
            let tmp = TempDir::new().unwrap();
            let root = tmp.path().join("l1").join("l2").join("root");
            std::fs::create_dir_all(root.join("a")).unwrap();
            let root = std::fs::canonicalize(&root).unwrap();
            let relative = segments.join("/");

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let resolved = runtime
                .block_on(canonical_target(&root, Path::new(&relative)))
                .unwrap();

            let expected = lexical(&root.join(&relative));
            proptest::prop_assert_eq!(&resolved, &expected);
            proptest::prop_assert_eq!(
                is_strict_descendant(&resolved, &root),
                expected.starts_with(&root) && expected != root
            );
        }
    }

    #[test]
    fn test_strict_descendant() {
        let root = Path::new("/srv/git");
        assert!(is_strict_descendant(Path::new("/srv/git/a.git"), root));
        assert!(!is_strict_descendant(Path::new("/srv/git"), root));
        assert!(!is_strict_descendant(Path::new("/srv/gitx/a.git"), root));
        assert!(!is_strict_descendant(Path::new("/srv/a.git"), root));
    }
}
