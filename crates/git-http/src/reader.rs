use std::path::Path;

use tracing::debug;

/// Read access to refs, trees and blobs of a repository.
///
/// Implementations are blocking; callers run them on the blocking pool.
pub trait RepositoryReader: Send + Sync + 'static {
    type Repo;
    type Commit;
    type Entry;

    fn open(&self, path: &Path) -> anyhow::Result<Self::Repo>;

    /// Resolves a branch, tag or (short) commit id. `None` when nothing
    /// matches or the target does not peel to a commit.
    fn resolve_commit(&self, repo: &Self::Repo, spec: &str) -> anyhow::Result<Option<Self::Commit>>;

    /// Looks up `path` in the commit's tree. `None` when absent or when the
    /// entry is not a file.
    fn find_entry(
        &self,
        repo: &Self::Repo,
        commit: &Self::Commit,
        path: &str,
    ) -> anyhow::Result<Option<Self::Entry>>;

    fn read_blob(&self, repo: &Self::Repo, entry: &Self::Entry) -> anyhow::Result<Vec<u8>>;
}

const FULL_HEX_LEN: usize = 40;
const MIN_HEX_LEN: usize = 4;

fn is_hex_id(spec: &str) -> bool {
    (MIN_HEX_LEN..=FULL_HEX_LEN).contains(&spec.len())
        && spec.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Accepts branch, tag and other ref names plus (abbreviated) object ids.
/// Revision expressions such as `HEAD~1`, `main@{0}` or `:/message` are
/// rejected.
pub fn is_plain_revision(spec: &str) -> bool {
    if is_hex_id(spec) {
        return true;
    }
    if spec.is_empty()
        || spec.starts_with('-')
        || spec.contains("@{")
        || spec.contains("..")
        || spec
            .chars()
            .any(|c| c.is_control() || c.is_whitespace() || "~^:?*[\\".contains(c))
    {
        return false;
    }
    gix::validate::reference::name_partial(spec.into()).is_ok()
}

/// [`RepositoryReader`] backed by gix.
#[derive(Debug, Clone, Copy, Default)]
pub struct GixRepositoryReader;

impl RepositoryReader for GixRepositoryReader {
    type Repo = gix::Repository;
    type Commit = gix::ObjectId;
    type Entry = gix::ObjectId;

    fn open(&self, path: &Path) -> anyhow::Result<gix::Repository> {
        gix::open(path).map_err(|err| {
            anyhow::anyhow!("failed to open repository at {}: {}", path.display(), err)
        })
    }

    fn resolve_commit(
        &self,
        repo: &gix::Repository,
        spec: &str,
    ) -> anyhow::Result<Option<gix::ObjectId>> {
        if !is_plain_revision(spec) {
            debug!(spec, "not a ref name or object id");
            return Ok(None);
        }

        if let Some(mut reference) = repo
            .try_find_reference(spec)
            .map_err(|err| anyhow::anyhow!(err))?
        {
            // Unborn HEAD and dangling refs do not resolve.
            return match reference.peel_to_commit() {
                Ok(commit) => Ok(Some(commit.id)),
                Err(err) => {
                    debug!(spec, "ref does not peel to a commit: {err}");
                    Ok(None)
                }
            };
        }

        if !is_hex_id(spec) {
            return Ok(None);
        }

        let object = if spec.len() == FULL_HEX_LEN {
            let id = gix::ObjectId::from_hex(spec.as_bytes())?;
            repo.try_find_object(id)
                .map_err(|err| anyhow::anyhow!(err))?
        } else {
            // Abbreviated ids: unknown or ambiguous prefixes both miss.
            match repo.rev_parse_single(spec) {
                Ok(id) => Some(id.object().map_err(|err| anyhow::anyhow!(err))?),
                Err(err) => {
                    debug!(spec, "abbreviated id did not resolve: {err}");
                    None
                }
            }
        };

        Ok(object.and_then(|object| object.peel_to_commit().ok().map(|commit| commit.id)))
    }

    fn find_entry(
        &self,
        repo: &gix::Repository,
        commit: &gix::ObjectId,
        path: &str,
    ) -> anyhow::Result<Option<gix::ObjectId>> {
        let tree = repo
            .find_commit(*commit)
            .map_err(|err| anyhow::anyhow!(err))?
            .tree()
            .map_err(|err| anyhow::anyhow!(err))?;

        let Some(entry) = tree
            .lookup_entry_by_path(Path::new(path))
            .map_err(|err| anyhow::anyhow!(err))?
        else {
            return Ok(None);
        };

        match entry.mode().kind() {
            gix::object::tree::EntryKind::Blob
            | gix::object::tree::EntryKind::BlobExecutable
            | gix::object::tree::EntryKind::Link => Ok(Some(entry.oid().to_owned())),
            gix::object::tree::EntryKind::Tree | gix::object::tree::EntryKind::Commit => Ok(None),
        }
    }

    fn read_blob(&self, repo: &gix::Repository, entry: &gix::ObjectId) -> anyhow::Result<Vec<u8>> {
        let mut blob = repo
            .find_object(*entry)
            .map_err(|err| anyhow::anyhow!(err))?
            .try_into_blob()
            .map_err(|err| anyhow::anyhow!(err))?;
        Ok(std::mem::take(&mut blob.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_revisions_are_accepted() {
        for spec in [
            "HEAD",
            "main",
            "v1",
            "release/1.x",
            "refs/tags/v1",
            "abc1",
            "0123456789abcdef0123456789abcdef01234567",
        ] {
            assert!(is_plain_revision(spec), "{spec:?} should be accepted");
        }
    }

    #[test]
    fn revision_expressions_are_rejected() {
        for spec in [
            "", "HEAD~1", "main^", "main@{0}", ":/initial", "main:README.md", "a..b", "-x",
            "bad name", "*",
        ] {
            assert!(!is_plain_revision(spec), "{spec:?} should be rejected");
        }
    }
}
