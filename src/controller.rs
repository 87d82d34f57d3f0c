use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::error::{CidError, Result};
use crate::jobs::JobRecordManager;
use crate::pipeline::checker::{self, is_yaml_file};
use crate::pipeline::overrides::{apply_overrides, parse_overrides};
use crate::pipeline::{validate, ValidationOutcome};
use crate::repo::{RepoSession, ResolvedRepo, VersionControl};
use crate::store::records::{
    JobResult, JobRun, PipelineInfo, RepoIdentity, RunFilter, RunStatus, StageStatus, StageTiming,
};
use crate::store::{Document, DocumentStore, Records};

/// What happened to a configuration after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum Persisted {
    /// Not attempted: the configuration was invalid or saving was not asked for
    Skipped,
    Saved,
    /// Valid, but the datastore did not take it
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigReport {
    #[serde(flatten)]
    pub outcome: ValidationOutcome,
    pub persisted: Persisted,
}

/// A validated candidate waiting for confirmation before it is saved.
#[derive(Debug, Clone)]
pub struct OverridePreview {
    pub identity: RepoIdentity,
    pub base: PipelineInfo,
    /// Overridden paths in the order given
    pub paths: Vec<String>,
    pub candidate: serde_yaml::Value,
    pub outcome: ValidationOutcome,
}

/// Orchestrates one command invocation.
///
/// The repository identity is resolved at most once per call and passed
/// down explicitly.
pub struct Controller<'a> {
    settings: &'a Settings,
    records: Records<'a>,
    session: RepoSession<'a>,
    workdir: PathBuf,
}

impl<'a> Controller<'a> {
    pub fn new(
        settings: &'a Settings,
        store: &'a dyn DocumentStore,
        vcs: &'a dyn VersionControl,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        let records = Records::new(store);
        Self {
            settings,
            records,
            session: RepoSession::new(vcs, records, settings.user_id()),
            workdir: workdir.into(),
        }
    }

    fn jobs(&self) -> JobRecordManager<'a> {
        JobRecordManager::new(self.records)
    }

    /// Finds a pipeline file: as given relative to the working directory,
    /// else inside the pipelines directory.
    pub fn resolve_config_path(&self, file: Option<&Path>) -> Result<PathBuf> {
        let file = file.map_or_else(
            || PathBuf::from(&self.settings.pipelines.default_file),
            Path::to_path_buf,
        );
        if !is_yaml_file(&file) {
            return Err(CidError::structural(
                file.display().to_string(),
                "configuration files must have a .yml or .yaml extension",
            ));
        }

        let direct = self.workdir.join(&file);
        if direct.is_file() {
            return Ok(direct);
        }
        let in_dir = self.pipelines_dir(None).join(&file);
        if in_dir.is_file() {
            return Ok(in_dir);
        }
        Err(CidError::structural(
            file.display().to_string(),
            format!("configuration file not found, also looked in {}", in_dir.display()),
        ))
    }

    pub fn pipelines_dir(&self, dir: Option<&Path>) -> PathBuf {
        self.workdir
            .join(dir.unwrap_or(self.settings.pipelines.dir.as_path()))
    }

    pub fn validate_config(&self, path: &Path) -> ValidationOutcome {
        checker::validate_file(path)
    }

    pub fn validate_configs(&self, dir: &Path) -> Result<IndexMap<String, ValidationOutcome>> {
        checker::validate_dir(dir)
    }

    /// Validates one file and saves it against the current repository.
    pub fn validate_n_save_config(&self, path: &Path) -> ConfigReport {
        let outcome = self.validate_config(path);
        let persisted = if outcome.valid {
            match self.session.resolve_identity(&self.workdir) {
                Some(resolved) => self.persist(&resolved.identity, &outcome),
                None => no_repository(),
            }
        } else {
            Persisted::Skipped
        };
        ConfigReport { outcome, persisted }
    }

    /// Validates a directory and saves every valid file. One failure never
    /// stops the rest.
    pub fn validate_n_save_configs(&self, dir: &Path) -> Result<IndexMap<String, ConfigReport>> {
        let outcomes = self.validate_configs(dir)?;
        let identity = if outcomes.values().any(|o| o.valid) {
            self.session.resolve_identity(&self.workdir).map(|r| r.identity)
        } else {
            None
        };

        Ok(outcomes
            .into_iter()
            .map(|(name, outcome)| {
                let persisted = match (&identity, outcome.valid) {
                    (_, false) => Persisted::Skipped,
                    (Some(identity), true) => self.persist(identity, &outcome),
                    (None, true) => no_repository(),
                };
                (name, ConfigReport { outcome, persisted })
            })
            .collect())
    }

    fn persist(&self, identity: &RepoIdentity, outcome: &ValidationOutcome) -> Persisted {
        let Some(config) = &outcome.pipeline_config else {
            return Persisted::Skipped;
        };
        let name = config.pipeline_name();

        let history = match self.records.get_pipeline_info(identity, name) {
            Ok(existing) => existing.map(|info| info.job_run_history).unwrap_or_default(),
            Err(e) => {
                warn!("Error saving repo to datastore: {e}");
                return Persisted::Failed(e.to_string());
            }
        };
        let info = PipelineInfo {
            pipeline_name: name.to_string(),
            pipeline_file_name: outcome.source_file.clone().unwrap_or_default(),
            last_commit_hash: identity.commit_hash.clone(),
            pipeline_config: config.clone(),
            job_run_history: history,
        };

        match self.records.save_pipeline_info(identity, &info) {
            Ok(()) => {
                info!("Saved pipeline '{name}' for {}", identity.repo_name);
                Persisted::Saved
            }
            Err(e) => {
                warn!("Error saving repo to datastore: {e}");
                Persisted::Failed(e.to_string())
            }
        }
    }

    /// Applies overrides to a saved pipeline and re-validates the result.
    /// Nothing is written.
    ///
    /// # Errors
    ///
    /// Fails when no repository is set, the pipeline is not saved, or an
    /// override is malformed. An invalid candidate is not an error; it is
    /// reported through `outcome`.
    pub fn preview_override(
        &self,
        pipeline_name: &str,
        entries: &[String],
    ) -> Result<OverridePreview> {
        let identity = self.require_identity()?;
        let base = self.require_pipeline(&identity, pipeline_name)?;

        let overrides = parse_overrides(entries)?;
        let candidate = apply_overrides(&base.pipeline_config, &overrides)?;
        let mut outcome = validate(&candidate);

        let renamed = outcome
            .pipeline_config
            .as_ref()
            .is_some_and(|c| c.pipeline_name() != pipeline_name);
        if renamed {
            let issue = CidError::referential(
                "global.pipeline_name",
                "overrides cannot rename a pipeline",
            );
            outcome = ValidationOutcome::failed(Some(pipeline_name), &[issue]);
        }

        debug!("Override preview for '{pipeline_name}' valid: {}", outcome.valid);
        Ok(OverridePreview {
            identity,
            base,
            paths: overrides.into_keys().collect(),
            candidate,
            outcome,
        })
    }

    /// Saves a previewed candidate. Call only after the user confirmed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOverride` for an invalid candidate, or the store error.
    pub fn save_override(&self, preview: OverridePreview) -> Result<PipelineInfo> {
        let outcome = preview.outcome;
        let config = match outcome.pipeline_config {
            Some(config) if outcome.valid => config,
            _ => return Err(CidError::InvalidOverride(outcome.error_message)),
        };

        let info = PipelineInfo {
            pipeline_config: config,
            ..preview.base
        };
        self.records.save_pipeline_info(&preview.identity, &info)?;
        info!("Pipeline '{}' updated with overrides", info.pipeline_name);
        Ok(info)
    }

    pub fn set_repo(
        &self,
        source: &str,
        branch: Option<&str>,
        commit: Option<&str>,
    ) -> Result<RepoIdentity> {
        let branch = branch.unwrap_or(&self.settings.git.default_branch);
        self.session.set_repo(&self.workdir, source, branch, commit)
    }

    pub fn get_repo(&self) -> Option<ResolvedRepo> {
        self.session.resolve_identity(&self.workdir)
    }

    /// Saved pipeline to show as a dry run.
    pub fn plan(&self, pipeline_name: &str) -> Result<PipelineInfo> {
        let identity = self.require_identity()?;
        self.require_pipeline(&identity, pipeline_name)
    }

    /// Records a new running run of a saved pipeline.
    pub fn start_run(&self, pipeline_name: &str, stages: &[String]) -> Result<(String, JobRun)> {
        let identity = self.require_identity()?;
        let info = self.require_pipeline(&identity, pipeline_name)?;
        let jobs = self.jobs();

        let run_id = jobs
            .create_job_run(&info, &info.pipeline_config, Some(stages))
            .ok_or_else(|| CidError::Persistence("failed to record the new run".into()))?;
        if !self.records.append_run_history(&identity, pipeline_name, &run_id)? {
            warn!(
                "Pipeline '{pipeline_name}' vanished before run {run_id} was added to its history"
            );
        }
        if !jobs.update_job(&run_id, fields(json!({ "status": RunStatus::Running }))) {
            return Err(CidError::Persistence(format!("failed to mark run {run_id} as running")));
        }

        let run = self.require_run(&run_id)?;
        info!("Started run #{} of '{pipeline_name}' ({run_id})", run.run_number);
        Ok((run_id, run))
    }

    /// Sets a stage status and its job results. Jobs must belong to the
    /// stage; their `allow_failure` comes from the run's configuration.
    pub fn update_stage(
        &self,
        run_id: &str,
        stage_name: &str,
        status: StageStatus,
        job_statuses: &[(String, RunStatus)],
    ) -> Result<JobRun> {
        let run = self.require_run(run_id)?;
        let Some(stage) = run.stage(stage_name) else {
            return Err(CidError::referential(
                format!("logs.{stage_name}"),
                format!("stage '{stage_name}' was not initialized for run {run_id}"),
            ));
        };

        let config = &run.pipeline_config_used;
        let now = Utc::now();
        let mut results = Vec::with_capacity(job_statuses.len());
        for (job_name, job_status) in job_statuses {
            let (_, job) = config
                .jobs_in_stage(stage_name)
                .find(|(name, _)| *name == job_name)
                .ok_or_else(|| {
                    CidError::referential(
                        format!("jobs.{job_name}"),
                        format!("job '{job_name}' is not part of stage '{stage_name}'"),
                    )
                })?;
            results.push(JobResult {
                job_name: job_name.clone(),
                job_status: *job_status,
                allow_failure: job.allow_failure,
                start_time: None,
                completion_time: finished(*job_status).then_some(now),
                output: Vec::new(),
            });
        }

        let timing = StageTiming {
            start_time: stage.start_time.or(Some(now)),
            completion_time: matches!(status, StageStatus::Success | StageStatus::Failed)
                .then_some(now),
        };

        if !self
            .jobs()
            .update_stage_log(run_id, stage_name, status, results, Some(timing))
        {
            return Err(CidError::Persistence(format!(
                "failed to update stage '{stage_name}' of run {run_id}"
            )));
        }
        self.require_run(run_id)
    }

    pub fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<JobRun> {
        self.require_run(run_id)?;
        let update = fields(json!({ "status": status, "completion_time": Utc::now() }));
        if !self.jobs().update_job(run_id, update) {
            return Err(CidError::Persistence(format!("failed to finish run {run_id}")));
        }
        self.require_run(run_id)
    }

    pub fn run_log(&self, run_id: &str) -> Result<JobRun> {
        self.require_run(run_id)
    }

    /// Past runs of a saved pipeline matching `filter`, newest first.
    pub fn report(&self, pipeline_name: &str, filter: &RunFilter) -> Result<Vec<(String, JobRun)>> {
        let identity = self.require_identity()?;
        self.records
            .run_summary(&identity, pipeline_name, filter)?
            .ok_or_else(|| pipeline_not_found(&identity, pipeline_name))
    }

    fn require_identity(&self) -> Result<RepoIdentity> {
        self.session
            .resolve_identity(&self.workdir)
            .map(|resolved| resolved.identity)
            .ok_or_else(|| {
                CidError::RepoState(
                    "no repository is configured; work inside a checkout or run 'cid config set-repo'"
                        .to_string(),
                )
            })
    }

    fn require_pipeline(
        &self,
        identity: &RepoIdentity,
        pipeline_name: &str,
    ) -> Result<PipelineInfo> {
        self.records
            .get_pipeline_info(identity, pipeline_name)?
            .ok_or_else(|| pipeline_not_found(identity, pipeline_name))
    }

    fn require_run(&self, run_id: &str) -> Result<JobRun> {
        self.jobs()
            .get_job_run(run_id)
            .ok_or_else(|| CidError::RunNotFound(run_id.to_string()))
    }
}

fn pipeline_not_found(identity: &RepoIdentity, pipeline_name: &str) -> CidError {
    CidError::PipelineNotFound {
        pipeline: pipeline_name.to_string(),
        repo: identity.repo_name.clone(),
        branch: identity.branch.clone(),
    }
}

fn no_repository() -> Persisted {
    Persisted::Failed("no repository is configured to save against".to_string())
}

fn finished(status: RunStatus) -> bool {
    matches!(status, RunStatus::Success | RunStatus::Failed)
}

fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
