use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;

use crate::pipeline::PipelineConfig;
use crate::store::records::{JobResult, JobRun, PipelineInfo, StageLog, StageStatus, StageTiming};
use crate::store::{from_document, Collection, Document, Records, ID_FIELD};

/// Creates and updates run records in the `jobs_history` collection.
///
/// Store failures stop here: every operation logs a warning and reports
/// failure as `None` or `false`, so callers never see a raw store error.
pub struct JobRecordManager<'a> {
    records: Records<'a>,
}

impl<'a> JobRecordManager<'a> {
    pub fn new(records: Records<'a>) -> Self {
        Self { records }
    }

    /// Inserts a new run for `info` and returns its id.
    ///
    /// One pending stage log is created per stage of `config`, or per stage of
    /// `stages_to_run` that `config` declares. Stage logs follow the declared
    /// stage order either way; unknown requested stages are skipped. The run
    /// number is one more than the length of the pipeline's run history.
    pub fn create_job_run(
        &self,
        info: &PipelineInfo,
        config: &PipelineConfig,
        stages_to_run: Option<&[String]>,
    ) -> Option<String> {
        let requested = stages_to_run.filter(|stages| !stages.is_empty());
        if let Some(stages) = requested {
            for stage in stages.iter().filter(|s| !config.stages.contains_key(*s)) {
                info!(
                    "Stage '{stage}' is not declared by pipeline '{}', skipping",
                    info.pipeline_name
                );
            }
        }

        let logs: Vec<StageLog> = config
            .stages
            .keys()
            .filter(|stage| requested.map_or(true, |stages| stages.contains(stage)))
            .map(|stage| StageLog::pending(stage))
            .collect();
        info!(
            "Initialized stages: {}",
            logs.iter().map(|l| l.stage_name.as_str()).collect::<Vec<_>>().join(", ")
        );

        let run = JobRun {
            pipeline_name: info.pipeline_name.clone(),
            run_number: info.next_run_number(),
            git_commit_hash: info.last_commit_hash.clone(),
            pipeline_config_used: config.clone(),
            status: None,
            start_time: Some(Utc::now()),
            completion_time: None,
            logs,
        };

        match self.records.insert_job_run(&run) {
            Ok(id) => {
                debug!("Created run #{} of '{}' as {id}", run.run_number, run.pipeline_name);
                Some(id)
            }
            Err(e) => {
                warn!("Error inserting new job run: {e}");
                None
            }
        }
    }

    /// Merges `fields` over the top-level fields of the stored run.
    ///
    /// The merged document must still be a valid run, and must keep the
    /// pipeline name, run number, commit, config snapshot and stage set the
    /// run was created with. Otherwise nothing is written and `false` is
    /// returned.
    pub fn update_job(&self, run_id: &str, fields: Document) -> bool {
        let mut document = match self.records.get_job_run_document(run_id) {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!("Job run with ID {run_id} not found.");
                return false;
            }
            Err(e) => {
                warn!("Error updating job run {run_id}: {e}");
                return false;
            }
        };

        let current: JobRun = match from_document(Collection::JobsHistory, document.clone()) {
            Ok(run) => run,
            Err(e) => {
                warn!("Error updating job run {run_id}: {e}");
                return false;
            }
        };

        document.extend(fields);
        document.insert(ID_FIELD.to_string(), Value::String(run_id.to_string()));
        let run: JobRun = match from_document(Collection::JobsHistory, document) {
            Ok(run) => run,
            Err(e) => {
                warn!("Rejected update of job run {run_id}: {e}");
                return false;
            }
        };
        if let Some(field) = changed_fixed_field(&current, &run) {
            warn!("Rejected update of job run {run_id}: {field} is fixed when the run is created");
            return false;
        }

        self.replace(run_id, &run)
    }

    /// Sets the status and job results of one stage of a run.
    ///
    /// Only stages created with the run can be updated: an unknown run or
    /// stage returns `false` and leaves the run untouched. Timing, when
    /// given, replaces both stage timestamps.
    pub fn update_stage_log(
        &self,
        run_id: &str,
        stage_name: &str,
        stage_status: StageStatus,
        job_results: Vec<JobResult>,
        timing: Option<StageTiming>,
    ) -> bool {
        let mut run = match self.records.get_job_run(run_id) {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!("Job run with ID {run_id} not found.");
                return false;
            }
            Err(e) => {
                warn!("Error updating job log for run {run_id}: {e}");
                return false;
            }
        };

        let Some(stage) = run.logs.iter_mut().find(|log| log.stage_name == stage_name) else {
            warn!("Stage '{stage_name}' not initialized. Cannot update job log.");
            return false;
        };
        stage.stage_status = stage_status;
        stage.jobs = job_results;
        if let Some(timing) = timing {
            stage.start_time = timing.start_time;
            stage.completion_time = timing.completion_time;
        }

        self.replace(run_id, &run)
    }

    pub fn get_job_run(&self, run_id: &str) -> Option<JobRun> {
        self.records
            .get_job_run(run_id)
            .inspect_err(|e| warn!("Error retrieving job run {run_id}: {e}"))
            .ok()
            .flatten()
    }

    fn replace(&self, run_id: &str, run: &JobRun) -> bool {
        match self.records.replace_job_run(run_id, run) {
            Ok(()) => true,
            Err(e) => {
                warn!("Error writing job run {run_id}: {e}");
                false
            }
        }
    }
}

/// First field set at creation that differs between `before` and `after`.
/// Stage logs may change, but not which stages there are or their order.
fn changed_fixed_field(before: &JobRun, after: &JobRun) -> Option<&'static str> {
    let stage_names = |run: &JobRun| -> Vec<String> {
        run.logs.iter().map(|log| log.stage_name.clone()).collect()
    };

    if before.pipeline_name != after.pipeline_name {
        Some("pipeline_name")
    } else if before.run_number != after.run_number {
        Some("run_number")
    } else if before.git_commit_hash != after.git_commit_hash {
        Some("git_commit_hash")
    } else if before.pipeline_config_used != after.pipeline_config_used {
        Some("pipeline_config_used")
    } else if stage_names(before) != stage_names(after) {
        Some("the stage set")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::RunStatus;
    use crate::store::MemoryStore;
    use crate::testing::{pipeline_config, pipeline_info};
    use serde_json::json;

    fn fields(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn job_result(name: &str, status: RunStatus) -> JobResult {
        JobResult {
            job_name: name.to_string(),
            job_status: status,
            allow_failure: false,
            start_time: None,
            completion_time: None,
            output: vec![format!("running {name}")],
        }
    }

    #[test]
    fn test_run_numbers_follow_history() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let config = pipeline_config();
        let mut info = pipeline_info("cicd_pipeline");

        let first = manager.create_job_run(&info, &config, None).unwrap();
        info.job_run_history.push(first.clone());
        let second = manager.create_job_run(&info, &config, None).unwrap();

        assert_eq!(manager.get_job_run(&first).unwrap().run_number, 1);
        assert_eq!(manager.get_job_run(&second).unwrap().run_number, 2);
    }

    #[test]
    fn test_new_run_starts_with_pending_stages() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let config = pipeline_config();

        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &config, None)
            .unwrap();
        let run = manager.get_job_run(&id).unwrap();

        assert_eq!(run.status, None);
        assert!(run.start_time.is_some());
        assert_eq!(run.git_commit_hash, "abc123");
        assert_eq!(run.pipeline_config_used, config);
        let stages: Vec<_> = run.logs.iter().map(|l| l.stage_name.as_str()).collect();
        assert_eq!(stages, vec!["build", "test"]);
        for log in &run.logs {
            assert_eq!(log.stage_status, StageStatus::Pending);
            assert!(log.jobs.is_empty());
            assert!(log.start_time.is_none() && log.completion_time.is_none());
        }
    }

    #[test]
    fn test_requested_stages_use_declared_order_and_skip_unknown() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let requested = vec!["test".to_string(), "deploy".to_string(), "build".to_string()];

        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), Some(&requested))
            .unwrap();
        let run = manager.get_job_run(&id).unwrap();

        let stages: Vec<_> = run.logs.iter().map(|l| l.stage_name.as_str()).collect();
        assert_eq!(stages, vec!["build", "test"]);
    }

    #[test]
    fn test_update_stage_log() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), None)
            .unwrap();
        let timing = StageTiming {
            start_time: Some(Utc::now()),
            completion_time: Some(Utc::now()),
        };

        let updated = manager.update_stage_log(
            &id,
            "build",
            StageStatus::Success,
            vec![job_result("compile", RunStatus::Success)],
            Some(timing),
        );

        assert!(updated);
        let run = manager.get_job_run(&id).unwrap();
        let build = run.stage("build").unwrap();
        assert_eq!(build.stage_status, StageStatus::Success);
        assert_eq!(build.jobs[0].job_name, "compile");
        assert_eq!(build.start_time, timing.start_time);
        assert_eq!(run.stage("test").unwrap().stage_status, StageStatus::Pending);
    }

    #[test]
    fn test_stage_not_created_with_run_cannot_be_updated() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let only_build = vec!["build".to_string()];
        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), Some(&only_build))
            .unwrap();
        let before = manager.get_job_run(&id).unwrap();

        let updated = manager.update_stage_log(&id, "test", StageStatus::Started, vec![], None);

        assert!(!updated);
        assert_eq!(manager.get_job_run(&id).unwrap(), before);
    }

    #[test]
    fn test_unknown_run_cannot_be_updated() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));

        assert!(!manager.update_stage_log("missing", "build", StageStatus::Started, vec![], None));
        assert!(!manager.update_job("missing", fields(json!({"status": "running"}))));
        assert!(manager.get_job_run("missing").is_none());
    }

    #[test]
    fn test_update_job_merges_fields() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), None)
            .unwrap();

        assert!(manager.update_job(
            &id,
            fields(json!({"status": "failed", "completion_time": "2026-01-02T03:04:05Z"}))
        ));

        let run = manager.get_job_run(&id).unwrap();
        assert_eq!(run.status, Some(RunStatus::Failed));
        assert!(run.completion_time.is_some());
        assert_eq!(run.logs.len(), 2, "fields not named in the update are kept");
    }

    #[test]
    fn test_update_job_rejects_fields_that_break_the_record() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), None)
            .unwrap();
        let before = manager.get_job_run(&id).unwrap();

        assert!(!manager.update_job(&id, fields(json!({"status": "exploded"}))));
        assert!(!manager.update_job(&id, fields(json!({"run_number": "two"}))));

        assert_eq!(manager.get_job_run(&id).unwrap(), before);
    }

    #[test]
    fn test_update_job_cannot_rewrite_creation_fields() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let only_build = vec!["build".to_string()];
        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), Some(&only_build))
            .unwrap();
        let before = manager.get_job_run(&id).unwrap();

        let mut other_config = pipeline_config();
        other_config.global.pipeline_name = "rewritten".to_string();
        let snapshot = serde_json::to_value(&other_config).unwrap();
        let extra_stage =
            serde_json::to_value(vec![StageLog::pending("build"), StageLog::pending("test")])
                .unwrap();

        assert!(!manager.update_job(&id, fields(json!({"pipeline_config_used": snapshot}))));
        assert!(!manager.update_job(&id, fields(json!({"run_number": 99}))));
        assert!(!manager.update_job(&id, fields(json!({"pipeline_name": "other"}))));
        assert!(!manager.update_job(&id, fields(json!({"git_commit_hash": "def456"}))));
        assert!(!manager.update_job(&id, fields(json!({"logs": extra_stage}))));

        assert_eq!(manager.get_job_run(&id).unwrap(), before);
        assert!(!manager.update_stage_log(&id, "test", StageStatus::Started, vec![], None));
    }

    #[test]
    fn test_update_job_may_rewrite_logs_of_existing_stages() {
        let store = MemoryStore::new();
        let manager = JobRecordManager::new(Records::new(&store));
        let id = manager
            .create_job_run(&pipeline_info("cicd_pipeline"), &pipeline_config(), None)
            .unwrap();
        let mut build = StageLog::pending("build");
        build.stage_status = StageStatus::Started;
        let logs = serde_json::to_value(vec![build, StageLog::pending("test")]).unwrap();

        assert!(manager.update_job(&id, fields(json!({"logs": logs}))));

        let run = manager.get_job_run(&id).unwrap();
        assert_eq!(run.stage("build").unwrap().stage_status, StageStatus::Started);
    }
}
