use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::process::ServiceProcessRunner;
use crate::reader::RepositoryReader;
use crate::repo::RepositoryProvider;

/// Abstraction over the state required by Git HTTP handlers.
pub trait GitHttpState: Clone + Send + Sync + 'static {
    type Storage: RepositoryProvider + 'static;
    type Runner: ServiceProcessRunner + 'static;
    type Reader: RepositoryReader;

    fn storage(&self) -> &Self::Storage;
    fn runner(&self) -> &Self::Runner;
    fn reader(&self) -> &Arc<Self::Reader>;
    /// Bounds the number of git subprocesses alive at once.
    fn git_semaphore(&self) -> &Arc<Semaphore>;
    /// Upper bound for a request body, after gzip inflation.
    fn git_max_body(&self) -> usize;
    fn git_timeout(&self) -> Duration;
}

/// Ready-made [`GitHttpState`] holding its collaborators behind `Arc`s.
pub struct GitHttpContext<S, P, R> {
    pub storage: Arc<S>,
    pub runner: Arc<P>,
    pub reader: Arc<R>,
    pub git_semaphore: Arc<Semaphore>,
    pub git_max_body: usize,
    pub git_timeout: Duration,
}

impl<S, P, R> GitHttpContext<S, P, R> {
    pub fn new(storage: S, runner: P, reader: R) -> Self {
        GitHttpContext {
            storage: Arc::new(storage),
            runner: Arc::new(runner),
            reader: Arc::new(reader),
            git_semaphore: Arc::new(Semaphore::new(32)),
            git_max_body: 512 * 1024 * 1024,
            git_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_max_concurrency(mut self, permits: usize) -> Self {
        self.git_semaphore = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.git_max_body = bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }
}

impl<S, P, R> Clone for GitHttpContext<S, P, R> {
    fn clone(&self) -> Self {
        GitHttpContext {
            storage: Arc::clone(&self.storage),
            runner: Arc::clone(&self.runner),
            reader: Arc::clone(&self.reader),
            git_semaphore: Arc::clone(&self.git_semaphore),
            git_max_body: self.git_max_body,
            git_timeout: self.git_timeout,
        }
    }
}

impl<S, P, R> GitHttpState for GitHttpContext<S, P, R>
where
    S: RepositoryProvider + 'static,
    P: ServiceProcessRunner + 'static,
    R: RepositoryReader,
{
    type Storage = S;
    type Runner = P;
    type Reader = R;

    fn storage(&self) -> &S {
        &self.storage
    }

    fn runner(&self) -> &P {
        &self.runner
    }

    fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    fn git_semaphore(&self) -> &Arc<Semaphore> {
        &self.git_semaphore
    }

    fn git_max_body(&self) -> usize {
        self.git_max_body
    }

    fn git_timeout(&self) -> Duration {
        self.git_timeout
    }
}
