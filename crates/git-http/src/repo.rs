use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::task;

use crate::errors::GitHttpError;

/// Trait representing repository storage that can resolve repository paths.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Returns the on-disk path of `name`, creating a bare repository there
    /// on first use.
    async fn ensure_repository(&self, name: &str) -> Result<PathBuf, GitHttpError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredRepository {
    pub path: PathBuf,
    /// True only for the call that actually ran the initialization.
    pub created: bool,
}

type InitLocks = Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>;

/// Bare repositories laid out under a single root directory.
#[derive(Debug, Clone)]
pub struct RepositoryStore {
    root: PathBuf,
    init_locks: InitLocks,
}

impl RepositoryStore {
    pub fn new(root: PathBuf) -> Self {
        RepositoryStore {
            root,
            init_locks: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name` under the root, without touching the filesystem.
    pub fn repository_path(&self, name: &str) -> Result<PathBuf, GitHttpError> {
        let mut path = self.root.clone();
        for segment in normalize_repo_name(name)? {
            path.push(segment);
        }
        Ok(path)
    }

    pub async fn ensure(&self, name: &str) -> Result<EnsuredRepository, GitHttpError> {
        let path = self.repository_path(name)?;

        // Released on every exit path, including errors and cancellation.
        let init = self.lock_for(&path);
        let created = {
            let _guard = init.lock.lock().await;
            let root = self.root.clone();
            let target = path.clone();
            task::spawn_blocking(move || init_bare_if_missing(&root, &target))
                .await
                .map_err(|err| GitHttpError::RepositoryInit(anyhow::anyhow!(err)))?
                .map_err(GitHttpError::RepositoryInit)?
        };
        drop(init);

        if created {
            tracing::info!(path = %path.display(), "initialized repository");
        }
        Ok(EnsuredRepository { path, created })
    }

    fn lock_for(&self, path: &Path) -> InitLock<'_> {
        let mut locks = self
            .init_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(path.to_path_buf()).or_default().clone();
        InitLock {
            store: self,
            path: path.to_path_buf(),
            lock,
        }
    }

    fn release_lock(&self, path: &Path, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .init_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference lives in the map, one is ours.
        if Arc::strong_count(lock) <= 2 {
            locks.remove(path);
        }
    }
}

/// Handle on a per-path init lock; dropping it reclaims the map entry once
/// nobody else is waiting on it.
struct InitLock<'a> {
    store: &'a RepositoryStore,
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InitLock<'_> {
    fn drop(&mut self) {
        self.store.release_lock(&self.path, &self.lock);
    }
}

#[async_trait]
impl RepositoryProvider for RepositoryStore {
    async fn ensure_repository(&self, name: &str) -> Result<PathBuf, GitHttpError> {
        self.ensure(name).await.map(|ensured| ensured.path)
    }
}

fn init_bare_if_missing(root: &Path, path: &Path) -> anyhow::Result<bool> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("failed to create repository root {}", root.display()))?;

    if is_bare_repository(path) {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    gix::init_bare(path)
        .with_context(|| format!("failed to init bare repository at {}", path.display()))?;
    Ok(true)
}

/// A directory only counts once it has the layout `init_bare` leaves behind;
/// intermediate or empty directories get initialized.
fn is_bare_repository(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}

/// Splits a repository name into path segments that cannot leave the root.
pub fn normalize_repo_name(name: &str) -> Result<Vec<String>, GitHttpError> {
    let mut segments = Vec::new();
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }

        if segment == ".." {
            return Err(GitHttpError::BadRequest(
                "repository name cannot traverse upwards".into(),
            ));
        }

        if segment.contains('\0') || segment.contains('\\') {
            return Err(GitHttpError::BadRequest(
                "repository name contains an invalid character".into(),
            ));
        }

        segments.push(segment.to_string());
    }

    if segments.is_empty() {
        return Err(GitHttpError::BadRequest(
            "repository name cannot be empty".into(),
        ));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_nested_names() {
        assert_eq!(
            normalize_repo_name("/acme//./widgets/").unwrap(),
            vec!["acme".to_string(), "widgets".to_string()]
        );
    }

    #[test]
    fn rejects_escaping_names() {
        for name in ["..", "acme/../../etc", "a\\b", "nul\0byte", "", "/./"] {
            assert!(
                matches!(normalize_repo_name(name), Err(GitHttpError::BadRequest(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn ensure_creates_bare_repository_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path().join("repos"));

        let ensured = store.ensure("acme/widgets").await.unwrap();
        assert!(ensured.created);
        assert_eq!(ensured.path, dir.path().join("repos/acme/widgets"));
        assert!(ensured.path.join("HEAD").is_file());
        assert!(ensured.path.join("objects").is_dir());
        assert!(!ensured.path.join(".git").exists());

        let again = store.ensure("acme/widgets").await.unwrap();
        assert!(!again.created);
        assert_eq!(again.path, ensured.path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ensure_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path().to_path_buf());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.ensure("fresh").await }));
        }

        let mut created = 0;
        let mut paths = Vec::new();
        for handle in handles {
            let ensured = handle.await.unwrap().unwrap();
            created += usize::from(ensured.created);
            paths.push(ensured.path);
        }

        assert_eq!(created, 1);
        assert!(paths.iter().all(|p| p == &dir.path().join("fresh")));
        assert!(store.init_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("root-is-a-file");
        std::fs::write(&blocker, b"").unwrap();
        let store = RepositoryStore::new(blocker);

        for name in ["repo0", "repo1", "nested/repo2"] {
            let err = store.ensure(name).await.unwrap_err();
            assert!(matches!(err, GitHttpError::RepositoryInit(_)));
        }
        assert!(store.init_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_ensure_releases_its_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path().to_path_buf());
        let path = store.repository_path("busy").unwrap();

        let held = store.lock_for(&path);
        let guard = held.lock.clone().lock_owned().await;

        // Waits on the held lock until the timeout drops it.
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.ensure("busy"),
        )
        .await;
        assert!(waiting.is_err());

        drop(guard);
        drop(held);
        assert!(store.init_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_directory_without_repository_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepositoryStore::new(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path().join("acme")).unwrap();

        let ensured = store.ensure("acme").await.unwrap();
        assert!(ensured.created);
        assert!(ensured.path.join("HEAD").is_file());
        assert!(!store.ensure("acme").await.unwrap().created);
    }
}
