//! Fixtures shared by unit tests.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;

use serde_yaml::Value;

use crate::error::{CidError, Result};
use crate::pipeline::{validate, PipelineConfig};
use crate::repo::{repo_name_from_url, VersionControl};
use crate::store::records::{PipelineInfo, RepoIdentity};

pub const PIPELINE_YAML: &str = r#"
global:
  pipeline_name: cicd_pipeline
  docker:
    registry: dockerhub
    image: gradle:jdk17
  artifact_upload_path: build/artifacts
stages:
  - build
  - test
jobs:
  checkout:
    stage: build
    scripts: [git status]
  compile:
    stage: build
    needs: [checkout]
    scripts: [./gradlew assemble]
  lint:
    stage: build
    needs: [checkout]
    allow_failure: true
    scripts: [./gradlew check]
  unit:
    stage: test
    needs: [compile]
    scripts: [./gradlew test]
"#;

pub fn pipeline_yaml(name: &str) -> String {
    PIPELINE_YAML.replace("pipeline_name: cicd_pipeline", &format!("pipeline_name: {name}"))
}

pub fn pipeline_config() -> PipelineConfig {
    pipeline_config_named("cicd_pipeline")
}

pub fn pipeline_config_named(name: &str) -> PipelineConfig {
    let raw: Value = serde_yaml::from_str(&pipeline_yaml(name)).unwrap();
    let outcome = validate(&raw);
    assert!(outcome.valid, "fixture must be valid: {}", outcome.error_message);
    outcome.pipeline_config.unwrap()
}

pub fn identity() -> RepoIdentity {
    RepoIdentity {
        repo_name: "cid".to_string(),
        repo_url: "https://github.com/cid-pipelines/cid.git".to_string(),
        branch: "main".to_string(),
        commit_hash: "abc123".to_string(),
    }
}

pub fn pipeline_info(name: &str) -> PipelineInfo {
    PipelineInfo {
        pipeline_name: name.to_string(),
        pipeline_file_name: format!("{name}.yml"),
        last_commit_hash: "abc123".to_string(),
        pipeline_config: pipeline_config_named(name),
        job_run_history: Vec::new(),
    }
}

/// Version control double. Clones write a marker file and become the current
/// checkout.
#[derive(Debug, Default)]
pub struct FakeVcs {
    pub reachable: bool,
    /// Commits of every branch, oldest first
    pub commits: Vec<String>,
    pub checkout: RefCell<Option<RepoIdentity>>,
    pub clones: Cell<usize>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            reachable: true,
            commits: vec!["abc123".to_string(), "def456".to_string()],
            ..Self::default()
        }
    }

    pub fn with_checkout(identity: RepoIdentity) -> Self {
        let vcs = Self::new();
        *vcs.checkout.borrow_mut() = Some(identity);
        vcs
    }
}

impl VersionControl for FakeVcs {
    fn is_reachable(&self, _source: &str) -> bool {
        self.reachable
    }

    fn clone_repo(
        &self,
        source: &str,
        dest: &Path,
        branch: &str,
        commit: Option<&str>,
    ) -> Result<RepoIdentity> {
        self.clones.set(self.clones.get() + 1);

        let commit_hash = match commit {
            Some(commit) if !self.commits.iter().any(|c| c == commit) => {
                return Err(CidError::RepoState(format!(
                    "commit {commit} does not exist on branch '{branch}'"
                )));
            }
            Some(commit) => commit.to_string(),
            None => self.commits.last().cloned().unwrap_or_default(),
        };

        fs::write(dest.join("README.md"), "cloned")?;
        let identity = RepoIdentity {
            repo_name: repo_name_from_url(source),
            repo_url: source.to_string(),
            branch: branch.to_string(),
            commit_hash,
        };
        *self.checkout.borrow_mut() = Some(identity.clone());
        Ok(identity)
    }

    fn current_checkout_identity(&self, _dir: &Path) -> Option<RepoIdentity> {
        self.checkout.borrow().clone()
    }
}
