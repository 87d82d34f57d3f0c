//! Working checkout and session state.

mod git;
mod session;

pub use git::GitCli;
pub use session::{RepoSession, ResolvedRepo};

use std::path::Path;

use log::debug;
use url::Url;

use crate::error::Result;
use crate::store::records::RepoIdentity;

/// Version-control operations the control plane needs.
pub trait VersionControl {
    /// Whether `source` answers as a repository.
    fn is_reachable(&self, source: &str) -> bool;

    /// Clones `branch` of `source` into the empty directory `dest`.
    ///
    /// When `commit` is given it must be reachable from the branch head; the
    /// branch is then reset to it. On a failed commit check `dest` is emptied
    /// again.
    ///
    /// # Errors
    ///
    /// Returns `RepoState` if the clone fails or the commit is not on the
    /// branch.
    fn clone_repo(
        &self,
        source: &str,
        dest: &Path,
        branch: &str,
        commit: Option<&str>,
    ) -> Result<RepoIdentity>;

    /// Identity of the checkout containing `dir`, if any.
    fn current_checkout_identity(&self, dir: &Path) -> Option<RepoIdentity>;
}

/// Repository name from a remote URL, an scp-style remote or a local path.
///
/// ```text
/// https://github.com/org/cid.git -> cid
/// git@github.com:org/cid.git     -> cid
/// /srv/git/cid/                  -> cid
/// ```
pub fn repo_name_from_url(source: &str) -> String {
    let source = source.trim();
    let path = match Url::parse(source) {
        // Single-letter schemes are Windows drive letters
        Ok(url) if url.scheme().len() > 1 => url.path().to_string(),
        _ => match source.split_once(':') {
            Some((host, path)) if !host.contains('/') && host.len() > 1 => path.to_string(),
            _ => source.to_string(),
        },
    };

    let last = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last).to_string();
    debug!("Extracted repo name '{name}' from {source}");
    name
}

/// Whether `dir` exists and has no entries.
pub(crate) fn is_empty_dir(dir: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}
