//! Read-only file access: `GET /{name}/files?path=...&ref=...`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::{counter, histogram};
use tokio::task;

use crate::errors::GitHttpError;
use crate::reader::RepositoryReader;
use crate::repo::RepositoryProvider;
use crate::state::GitHttpState;

/// Ref used when the request does not name one.
pub const DEFAULT_REF: &str = "HEAD";

pub async fn read_file<S: GitHttpState>(
    state: &S,
    name: &str,
    file_path: &str,
    reference: Option<&str>,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    let repo_dir = state.storage().ensure_repository(name).await?;
    let file_path = normalize_file_path(file_path)?;
    let reference = reference.unwrap_or(DEFAULT_REF).to_string();

    let reader = Arc::clone(state.reader());
    let data = task::spawn_blocking(move || {
        resolve_blob(reader.as_ref(), &repo_dir, &reference, &file_path)
    })
    .await
    .map_err(|err| GitHttpError::Internal(anyhow::anyhow!(err)))??;

    counter!("git_http.files").increment(1);
    histogram!("git_http.files_ms").record(start.elapsed().as_millis() as f64);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// Ref → commit → tree entry → blob bytes, keeping the two not-found cases
/// apart.
pub fn resolve_blob<R: RepositoryReader + ?Sized>(
    reader: &R,
    repo_dir: &Path,
    reference: &str,
    file_path: &str,
) -> Result<Vec<u8>, GitHttpError> {
    let repo = reader.open(repo_dir).map_err(GitHttpError::Internal)?;

    let commit = reader
        .resolve_commit(&repo, reference)
        .map_err(GitHttpError::Internal)?
        .ok_or_else(|| GitHttpError::RefNotFound(reference.to_string()))?;

    let entry = reader
        .find_entry(&repo, &commit, file_path)
        .map_err(GitHttpError::Internal)?
        .ok_or_else(|| GitHttpError::FileNotFound(file_path.to_string()))?;

    reader.read_blob(&repo, &entry).map_err(GitHttpError::Internal)
}

pub fn normalize_file_path(file_path: &str) -> Result<String, GitHttpError> {
    if file_path.trim().is_empty() {
        return Err(GitHttpError::BadRequest("path cannot be empty".into()));
    }

    let mut segments = Vec::new();
    for segment in file_path.trim_start_matches('/').split('/') {
        if segment.is_empty() || segment == "." {
            return Err(GitHttpError::BadRequest(
                "path contains an empty segment".into(),
            ));
        }

        if segment == ".." {
            return Err(GitHttpError::BadRequest(
                "path cannot traverse upwards".into(),
            ));
        }

        if segment.contains('\0') {
            return Err(GitHttpError::BadRequest(
                "path contains an invalid character".into(),
            ));
        }

        segments.push(segment);
    }

    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// refs → commit, (commit, path) → blob contents
    #[derive(Default)]
    struct MapReader {
        refs: HashMap<&'static str, u32>,
        files: HashMap<(u32, &'static str), &'static [u8]>,
    }

    impl RepositoryReader for MapReader {
        type Repo = ();
        type Commit = u32;
        type Entry = &'static [u8];

        fn open(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        fn resolve_commit(&self, _repo: &(), spec: &str) -> anyhow::Result<Option<u32>> {
            Ok(self.refs.get(spec).copied())
        }

        fn find_entry(
            &self,
            _repo: &(),
            commit: &u32,
            path: &str,
        ) -> anyhow::Result<Option<&'static [u8]>> {
            Ok(self
                .files
                .iter()
                .find(|((c, p), _)| c == commit && *p == path)
                .map(|(_, data)| *data))
        }

        fn read_blob(&self, _repo: &(), entry: &&'static [u8]) -> anyhow::Result<Vec<u8>> {
            Ok(entry.to_vec())
        }
    }

    fn reader() -> MapReader {
        let mut reader = MapReader::default();
        reader.refs.insert("HEAD", 1);
        reader.refs.insert("main", 1);
        reader.refs.insert("v0.1", 0);
        reader.files.insert((1, "README.md"), b"# widgets\n");
        reader.files.insert((0, "README.md"), b"old\n");
        reader
    }

    #[test]
    fn resolves_blob_at_ref() {
        let reader = reader();
        let dir = Path::new("/unused");
        assert_eq!(
            resolve_blob(&reader, dir, "main", "README.md").unwrap(),
            b"# widgets\n"
        );
        assert_eq!(
            resolve_blob(&reader, dir, "v0.1", "README.md").unwrap(),
            b"old\n"
        );
    }

    #[test]
    fn missing_ref_and_missing_file_are_distinct() {
        let reader = reader();
        let dir = Path::new("/unused");
        assert!(matches!(
            resolve_blob(&reader, dir, "does-not-exist", "README.md"),
            Err(GitHttpError::RefNotFound(r)) if r == "does-not-exist"
        ));
        assert!(matches!(
            resolve_blob(&reader, dir, "main", "missing/file.txt"),
            Err(GitHttpError::FileNotFound(p)) if p == "missing/file.txt"
        ));
    }

    #[test]
    fn normalizes_file_paths() {
        assert_eq!(normalize_file_path("/src/lib.rs").unwrap(), "src/lib.rs");
        for bad in ["", "  ", "a//b", "./a", "a/../b", "nul\0"] {
            assert!(
                matches!(normalize_file_path(bad), Err(GitHttpError::BadRequest(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
