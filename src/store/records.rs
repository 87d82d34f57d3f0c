use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineConfig;

use super::DocumentKey;

/// Where a working checkout came from and what it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub repo_name: String,
    pub repo_url: String,
    pub branch: String,
    pub commit_hash: String,
}

impl RepoIdentity {
    /// Natural key of the repository's `repo_configs` record.
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new()
            .field("repo_name", &self.repo_name)
            .field("repo_url", &self.repo_url)
            .field("branch", &self.branch)
    }
}

/// Pipelines saved for one repository branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_name: String,
    pub repo_url: String,
    pub branch: String,
    #[serde(default)]
    pub pipelines: IndexMap<String, PipelineInfo>,
}

impl RepoConfig {
    pub fn new(identity: &RepoIdentity) -> Self {
        Self {
            repo_name: identity.repo_name.clone(),
            repo_url: identity.repo_url.clone(),
            branch: identity.branch.clone(),
            pipelines: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub pipeline_name: String,
    pub pipeline_file_name: String,
    pub last_commit_hash: String,
    pub pipeline_config: PipelineConfig,
    /// Ids of recorded runs, oldest first
    #[serde(default)]
    pub job_run_history: Vec<String>,
}

impl PipelineInfo {
    pub fn next_run_number(&self) -> u32 {
        u32::try_from(self.job_run_history.len()).map_or(u32::MAX, |runs| runs.saturating_add(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub user_id: String,
    pub repo_name: String,
    pub repo_url: String,
    pub branch: String,
    pub commit_hash: String,
    pub is_remote: bool,
    pub time: DateTime<Utc>,
}

impl SessionDetail {
    pub fn new(user_id: &str, identity: &RepoIdentity, is_remote: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            repo_name: identity.repo_name.clone(),
            repo_url: identity.repo_url.clone(),
            branch: identity.branch.clone(),
            commit_hash: identity.commit_hash.clone(),
            is_remote,
            time: Utc::now(),
        }
    }

    pub fn key(user_id: &str) -> DocumentKey {
        DocumentKey::new().field("user_id", user_id)
    }

    pub fn identity(&self) -> RepoIdentity {
        RepoIdentity {
            repo_name: self.repo_name.clone(),
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            commit_hash: self.commit_hash.clone(),
        }
    }
}

/// Status of a run or of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Started,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!(
                "unknown status '{other}', expected one of: pending, running, success, failed"
            )),
        }
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!(
                "unknown stage status '{other}', expected one of: pending, started, success, failed"
            )),
        }
    }
}

/// One execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub pipeline_name: String,
    pub run_number: u32,
    pub git_commit_hash: String,
    /// Snapshot of the configuration the run was started with
    pub pipeline_config_used: PipelineConfig,
    pub status: Option<RunStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub logs: Vec<StageLog>,
}

impl JobRun {
    pub fn stage(&self, stage_name: &str) -> Option<&StageLog> {
        self.logs.iter().find(|log| log.stage_name == stage_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLog {
    pub stage_name: String,
    pub stage_status: StageStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub jobs: Vec<JobResult>,
}

impl StageLog {
    pub fn pending(stage_name: &str) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            stage_status: StageStatus::Pending,
            start_time: None,
            completion_time: None,
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_name: String,
    pub job_status: RunStatus,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTiming {
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

/// Narrows a run summary. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub stage: Option<String>,
    pub job: Option<String>,
    pub run_number: Option<u32>,
}

impl RunFilter {
    /// Keeps only the stage logs and job results the filter names.
    ///
    /// Returns `None` when nothing of `run` matches.
    pub fn narrow(&self, mut run: JobRun) -> Option<JobRun> {
        if self.run_number.is_some_and(|number| number != run.run_number) {
            return None;
        }
        if let Some(stage) = &self.stage {
            run.logs.retain(|log| &log.stage_name == stage);
        }
        if let Some(job) = &self.job {
            for log in &mut run.logs {
                log.jobs.retain(|result| &result.job_name == job);
            }
            run.logs.retain(|log| !log.jobs.is_empty());
        }
        if run.logs.is_empty() && (self.stage.is_some() || self.job.is_some()) {
            return None;
        }
        Some(run)
    }
}
