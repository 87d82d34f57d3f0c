use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::{CidError, Result};
use crate::store::records::RepoIdentity;

use super::{repo_name_from_url, VersionControl};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// [`VersionControl`] backed by the `git` executable.
///
/// Every git process is killed once it outlives the timeout. Interactive
/// credential prompts are disabled, so an unauthenticated remote fails
/// instead of hanging.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let subcommand = args.first().copied().unwrap_or_default();
        let mut command = Command::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        debug!("Running git {}", args.join(" "));
        let mut child = command
            .spawn()
            .map_err(|e| CidError::RepoState(format!("cannot run git {subcommand}: {e}")))?;

        // Drain the pipes concurrently so a chatty child never blocks on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let started = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!("git {subcommand} killed after {}s", self.timeout.as_secs());
                    return Err(CidError::RepoState(format!(
                        "git {subcommand} timed out after {}s",
                        self.timeout.as_secs()
                    )));
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = stdout.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
        let stderr = stderr.map(|h| h.join().unwrap_or_default()).unwrap_or_default();

        if status.success() {
            Ok(stdout.trim().to_string())
        } else {
            Err(CidError::RepoState(format!(
                "git {subcommand} failed: {}",
                stderr.trim()
            )))
        }
    }
}

impl VersionControl for GitCli {
    fn is_reachable(&self, source: &str) -> bool {
        match self.run(None, &["ls-remote", source, "HEAD"]) {
            Ok(_) => {
                info!("Repository {source} is reachable");
                true
            }
            Err(e) => {
                warn!("Repository {source} is not reachable: {e}");
                false
            }
        }
    }

    fn clone_repo(
        &self,
        source: &str,
        dest: &Path,
        branch: &str,
        commit: Option<&str>,
    ) -> Result<RepoIdentity> {
        // Local sources are resolved before git runs inside `dest`
        let source = match Path::new(source).canonicalize() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(_) => source.to_string(),
        };

        debug!("Cloning branch '{branch}' of {source} into {}", dest.display());
        self.run(
            Some(dest),
            &["clone", "--quiet", "--single-branch", "--branch", branch, &source, "."],
        )
        .map_err(|e| {
            CidError::RepoState(format!("failed to clone branch '{branch}' of {source}: {e}"))
        })?;

        if let Some(commit) = commit {
            if self
                .run(Some(dest), &["merge-base", "--is-ancestor", commit, "HEAD"])
                .is_err()
            {
                warn!("Commit {commit} does not exist on branch '{branch}'");
                clean_dir(dest);
                return Err(CidError::RepoState(format!(
                    "commit {commit} does not exist on branch '{branch}'"
                )));
            }
            self.run(Some(dest), &["reset", "--quiet", "--hard", commit])?;
            debug!("Reset branch '{branch}' to commit {commit}");
        }

        self.current_checkout_identity(dest).ok_or_else(|| {
            CidError::RepoState("failed to read repository details after cloning".to_string())
        })
    }

    fn current_checkout_identity(&self, dir: &Path) -> Option<RepoIdentity> {
        let git = |args: &[&str]| self.run(Some(dir), args).ok().filter(|out| !out.is_empty());

        let toplevel = git(&["rev-parse", "--show-toplevel"])?;
        // A checkout without an origin is identified by its own path
        let repo_url = git(&["remote", "get-url", "origin"]).unwrap_or(toplevel);
        let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let commit_hash = git(&["rev-parse", "HEAD"])?;

        Some(RepoIdentity {
            repo_name: repo_name_from_url(&repo_url),
            repo_url,
            branch,
            commit_hash,
        })
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut output = String::new();
        let _ = pipe.read_to_string(&mut output);
        output
    })
}

/// Removes everything inside `dir`, keeping `dir` itself.
fn clean_dir(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            error!("Failed to remove {}: {e}", path.display());
        }
    }
    info!("Cleaned up all contents inside the directory {}", dir.display());
}
