use std::path::Path;

use git_http::{GitHttpContext, GitProcessRunner, GixRepositoryReader, RepositoryStore};

use crate::config::Config;

/// Application state handed to the git router.
pub type AppState = GitHttpContext<RepositoryStore, GitProcessRunner, GixRepositoryReader>;

pub fn build_state(config: &Config, root: &Path) -> AppState {
    GitHttpContext::new(
        RepositoryStore::new(root.to_path_buf()),
        GitProcessRunner::new(config.git_bin.clone()),
        GixRepositoryReader,
    )
    .with_max_concurrency(config.git_max_concurrency)
    .with_max_body(config.git_max_body)
    .with_timeout(config.git_timeout)
}
