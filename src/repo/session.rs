use std::path::Path;

use log::{debug, info, warn};

use crate::error::{CidError, Result};
use crate::store::records::{RepoIdentity, SessionDetail};
use crate::store::Records;

use super::{is_empty_dir, VersionControl};

/// Repository a command works against, and where that answer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepo {
    pub identity: RepoIdentity,
    /// `true` for a live checkout, `false` for the stored session
    pub from_checkout: bool,
}

/// Resolves and records which repository a user is working on.
pub struct RepoSession<'a> {
    vcs: &'a dyn VersionControl,
    records: Records<'a>,
    user_id: String,
}

impl<'a> RepoSession<'a> {
    pub fn new(
        vcs: &'a dyn VersionControl,
        records: Records<'a>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            records,
            user_id: user_id.into(),
        }
    }

    /// Identity of the checkout containing `workdir`, if there is one.
    pub fn resolve_current_repo(&self, workdir: &Path) -> Option<RepoIdentity> {
        self.vcs.current_checkout_identity(workdir)
    }

    /// Clones `source` into the empty `workdir` and makes it the user's
    /// session.
    ///
    /// # Errors
    ///
    /// - `RepoState` if the source is unreachable, `workdir` is not empty,
    ///   the clone fails, or `commit` is not on `branch`
    /// - `Persistence` if the clone succeeded but the session was not saved
    pub fn set_repo(
        &self,
        workdir: &Path,
        source: &str,
        branch: &str,
        commit: Option<&str>,
    ) -> Result<RepoIdentity> {
        debug!("Checking if {source} is a valid git repository");
        if !self.vcs.is_reachable(source) {
            return Err(CidError::RepoState(format!(
                "{source} is not a reachable git repository"
            )));
        }

        if !is_empty_dir(workdir)? {
            warn!("Working directory {} is not empty", workdir.display());
            return Err(CidError::RepoState(format!(
                "working directory {} is not empty, please use an empty directory",
                workdir.display()
            )));
        }

        let identity = self.vcs.clone_repo(source, workdir, branch, commit)?;
        info!(
            "Cloned {} on branch '{}' at {}",
            identity.repo_name, identity.branch, identity.commit_hash
        );

        let is_remote = !Path::new(source).exists();
        self.records
            .save_session(&SessionDetail::new(&self.user_id, &identity, is_remote))?;
        Ok(identity)
    }

    /// Last repository recorded for `user_id`. Store failures read as no
    /// session.
    pub fn get_last_session(&self, user_id: &str) -> Option<SessionDetail> {
        self.records
            .get_session(user_id)
            .inspect_err(|e| warn!("Error retrieving session for user {user_id}: {e}"))
            .ok()
            .flatten()
    }

    /// The repository to work against: a live checkout in `workdir` wins over
    /// the stored session, and refreshes that session when it differs.
    pub fn resolve_identity(&self, workdir: &Path) -> Option<ResolvedRepo> {
        if let Some(identity) = self.resolve_current_repo(workdir) {
            debug!("Using checkout of {} in {}", identity.repo_name, workdir.display());
            self.refresh_session(&identity);
            return Some(ResolvedRepo {
                identity,
                from_checkout: true,
            });
        }

        let session = self.get_last_session(&self.user_id)?;
        debug!("No checkout in {}, using last session of {}", workdir.display(), self.user_id);
        Some(ResolvedRepo {
            identity: session.identity(),
            from_checkout: false,
        })
    }

    fn refresh_session(&self, identity: &RepoIdentity) {
        let stored = self.get_last_session(&self.user_id);
        if stored.is_some_and(|s| s.identity() == *identity) {
            return;
        }

        let is_remote = !Path::new(&identity.repo_url).exists();
        if let Err(e) = self
            .records
            .save_session(&SessionDetail::new(&self.user_id, identity, is_remote))
        {
            warn!("Failed to refresh session for user {}: {e}", self.user_id);
        }
    }
}
