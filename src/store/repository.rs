use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CidError, Result};

use super::records::{JobRun, PipelineInfo, RepoConfig, RepoIdentity, RunFilter, SessionDetail};
use super::{Collection, Document, DocumentStore};

/// Typed operations over the three collections of a [`DocumentStore`].
///
/// Every read distinguishes a missing record (`Ok(None)`) from a failed or
/// unreadable store (`Err`).
#[derive(Clone, Copy)]
pub struct Records<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> Records<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn get_repo_config(&self, identity: &RepoIdentity) -> Result<Option<RepoConfig>> {
        self.store
            .get_by_key(Collection::RepoConfigs, &identity.key())?
            .map(|doc| from_document(Collection::RepoConfigs, doc))
            .transpose()
    }

    pub fn get_pipeline_info(
        &self,
        identity: &RepoIdentity,
        pipeline_name: &str,
    ) -> Result<Option<PipelineInfo>> {
        Ok(self
            .get_repo_config(identity)?
            .and_then(|mut repo| repo.pipelines.shift_remove(pipeline_name)))
    }

    /// Adds or replaces one pipeline of the repository record, creating the
    /// record on first save. Other pipelines are left as they are.
    pub fn save_pipeline_info(&self, identity: &RepoIdentity, info: &PipelineInfo) -> Result<()> {
        let mut repo = self
            .get_repo_config(identity)?
            .unwrap_or_else(|| RepoConfig::new(identity));
        repo.pipelines.insert(info.pipeline_name.clone(), info.clone());

        self.store
            .upsert_by_key(Collection::RepoConfigs, &identity.key(), to_document(&repo)?)?;
        debug!(
            "Saved pipeline '{}' for {} on branch '{}'",
            info.pipeline_name, identity.repo_name, identity.branch
        );
        Ok(())
    }

    /// Records `run_id` at the end of the pipeline's run history.
    ///
    /// Returns `false` when the pipeline is not saved for this repository.
    pub fn append_run_history(
        &self,
        identity: &RepoIdentity,
        pipeline_name: &str,
        run_id: &str,
    ) -> Result<bool> {
        let Some(mut info) = self.get_pipeline_info(identity, pipeline_name)? else {
            return Ok(false);
        };
        info.job_run_history.push(run_id.to_string());
        self.save_pipeline_info(identity, &info)?;
        Ok(true)
    }

    pub fn get_session(&self, user_id: &str) -> Result<Option<SessionDetail>> {
        self.store
            .get_by_key(Collection::Sessions, &SessionDetail::key(user_id))?
            .map(|doc| from_document(Collection::Sessions, doc))
            .transpose()
    }

    pub fn save_session(&self, session: &SessionDetail) -> Result<()> {
        self.store.upsert_by_key(
            Collection::Sessions,
            &SessionDetail::key(&session.user_id),
            to_document(session)?,
        )
    }

    pub fn insert_job_run(&self, run: &JobRun) -> Result<String> {
        self.store.insert(Collection::JobsHistory, to_document(run)?)
    }

    /// The stored run document as is, with its `_id`.
    pub fn get_job_run_document(&self, run_id: &str) -> Result<Option<Document>> {
        self.store.get_by_id(Collection::JobsHistory, run_id)
    }

    pub fn get_job_run(&self, run_id: &str) -> Result<Option<JobRun>> {
        self.get_job_run_document(run_id)?
            .map(|doc| from_document(Collection::JobsHistory, doc))
            .transpose()
    }

    pub fn replace_job_run(&self, run_id: &str, run: &JobRun) -> Result<()> {
        self.store
            .replace_by_id(Collection::JobsHistory, run_id, to_document(run)?)
    }

    /// Past runs of a pipeline, newest first, resolved through its run
    /// history and narrowed by `filter`.
    ///
    /// Returns `None` when the pipeline is not saved for this repository.
    /// History entries whose run record is gone are skipped.
    pub fn run_summary(
        &self,
        identity: &RepoIdentity,
        pipeline_name: &str,
        filter: &RunFilter,
    ) -> Result<Option<Vec<(String, JobRun)>>> {
        let Some(info) = self.get_pipeline_info(identity, pipeline_name)? else {
            return Ok(None);
        };

        let mut runs = Vec::new();
        for run_id in &info.job_run_history {
            let Some(run) = self.get_job_run(run_id)? else {
                warn!("Run {run_id} of '{pipeline_name}' is in the run history but not stored");
                continue;
            };
            if let Some(run) = filter.narrow(run) {
                runs.push((run_id.clone(), run));
            }
        }
        runs.sort_by(|(_, a), (_, b)| b.run_number.cmp(&a.run_number));
        debug!(
            "Run summary of '{pipeline_name}' matched {} of {} runs",
            runs.len(),
            info.job_run_history.len()
        );
        Ok(Some(runs))
    }
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CidError::Persistence(format!(
            "records must serialize to objects, found {other}"
        ))),
    }
}

pub(crate) fn from_document<T: DeserializeOwned>(
    collection: Collection,
    document: Document,
) -> Result<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| CidError::Persistence(format!("malformed {collection} document: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{JobResult, RunStatus, StageLog};
    use crate::store::{DocumentKey, MemoryStore};
    use crate::testing::{identity, pipeline_config, pipeline_info};
    use serde_json::json;

    #[test]
    fn test_pipeline_info_round_trip() {
        let store = MemoryStore::new();
        let records = Records::new(&store);
        let info = pipeline_info("cicd_pipeline");

        records.save_pipeline_info(&identity(), &info).unwrap();

        let loaded = records.get_pipeline_info(&identity(), "cicd_pipeline").unwrap();
        assert_eq!(loaded, Some(info));
        assert!(records.get_pipeline_info(&identity(), "other").unwrap().is_none());
    }

    #[test]
    fn test_saving_second_pipeline_keeps_the_first() {
        let store = MemoryStore::new();
        let records = Records::new(&store);

        records.save_pipeline_info(&identity(), &pipeline_info("first")).unwrap();
        records.save_pipeline_info(&identity(), &pipeline_info("second")).unwrap();

        let repo = records.get_repo_config(&identity()).unwrap().unwrap();
        assert_eq!(repo.pipelines.keys().collect::<Vec<_>>(), vec!["first", "second"]);
        assert_eq!(store.count(Collection::RepoConfigs), 1);
    }

    #[test]
    fn test_branches_are_separate_records() {
        let store = MemoryStore::new();
        let records = Records::new(&store);
        let mut dev = identity();
        dev.branch = "dev".to_string();

        records.save_pipeline_info(&identity(), &pipeline_info("release")).unwrap();

        assert!(records.get_pipeline_info(&dev, "release").unwrap().is_none());
        assert_eq!(store.count(Collection::RepoConfigs), 1);
    }

    #[test]
    fn test_append_run_history() {
        let store = MemoryStore::new();
        let records = Records::new(&store);
        records.save_pipeline_info(&identity(), &pipeline_info("release")).unwrap();

        assert!(records.append_run_history(&identity(), "release", "run-1").unwrap());
        assert!(!records.append_run_history(&identity(), "missing", "run-2").unwrap());

        let info = records.get_pipeline_info(&identity(), "release").unwrap().unwrap();
        assert_eq!(info.job_run_history, vec!["run-1"]);
        assert_eq!(info.next_run_number(), 2);
    }

    #[test]
    fn test_one_session_per_user() {
        let store = MemoryStore::new();
        let records = Records::new(&store);
        let mut moved = identity();
        moved.branch = "feature".to_string();

        records.save_session(&SessionDetail::new("alice", &identity(), true)).unwrap();
        records.save_session(&SessionDetail::new("alice", &moved, true)).unwrap();
        records.save_session(&SessionDetail::new("bob", &identity(), false)).unwrap();

        let session = records.get_session("alice").unwrap().unwrap();
        assert_eq!(session.branch, "feature");
        assert_eq!(store.count(Collection::Sessions), 2);
        assert!(records.get_session("carol").unwrap().is_none());
    }

    #[test]
    fn test_job_run_round_trip() {
        let store = MemoryStore::new();
        let records = Records::new(&store);
        let mut run = JobRun {
            pipeline_name: "release".to_string(),
            run_number: 1,
            git_commit_hash: "abc123".to_string(),
            pipeline_config_used: pipeline_config(),
            status: None,
            start_time: None,
            completion_time: None,
            logs: vec![StageLog::pending("build")],
        };

        let id = records.insert_job_run(&run).unwrap();
        assert_eq!(records.get_job_run(&id).unwrap().as_ref(), Some(&run));

        run.run_number = 7;
        records.replace_job_run(&id, &run).unwrap();
        assert_eq!(records.get_job_run(&id).unwrap().unwrap().run_number, 7);

        let raw = records.get_job_run_document(&id).unwrap().unwrap();
        assert_eq!(raw["_id"], json!(id));
    }

    #[test]
    fn test_malformed_document_is_a_persistence_error() {
        let store = MemoryStore::new();
        store
            .upsert_by_key(
                Collection::Sessions,
                &DocumentKey::new().field("user_id", "alice"),
                json!({"is_remote": "yes"}).as_object().cloned().unwrap(),
            )
            .unwrap();

        let err = Records::new(&store).get_session("alice").unwrap_err();

        assert!(matches!(err, CidError::Persistence(_)));
        assert!(err.to_string().contains("malformed sessions document"));
    }

    fn job(name: &str, status: RunStatus) -> JobResult {
        JobResult {
            job_name: name.to_string(),
            job_status: status,
            allow_failure: false,
            start_time: None,
            completion_time: None,
            output: Vec::new(),
        }
    }

    /// Stores runs 1 to 3 of "release". Only run 2 reached the test stage.
    fn release_history(store: &MemoryStore) -> Records<'_> {
        let records = Records::new(store);
        records.save_pipeline_info(&identity(), &pipeline_info("release")).unwrap();

        for number in 1..=3 {
            let mut build = StageLog::pending("build");
            build.jobs.push(job("compile", RunStatus::Success));
            let mut test = StageLog::pending("test");
            if number == 2 {
                test.jobs.push(job("unit", RunStatus::Failed));
            }
            let run = JobRun {
                pipeline_name: "release".to_string(),
                run_number: number,
                git_commit_hash: "abc123".to_string(),
                pipeline_config_used: pipeline_config(),
                status: Some(RunStatus::Success),
                start_time: None,
                completion_time: None,
                logs: vec![build, test],
            };
            let id = records.insert_job_run(&run).unwrap();
            assert!(records.append_run_history(&identity(), "release", &id).unwrap());
        }
        records
    }

    fn run_numbers(runs: &[(String, JobRun)]) -> Vec<u32> {
        runs.iter().map(|(_, run)| run.run_number).collect()
    }

    #[test]
    fn test_run_summary_lists_newest_first() {
        let store = MemoryStore::new();
        let records = release_history(&store);

        let runs = records
            .run_summary(&identity(), "release", &RunFilter::default())
            .unwrap()
            .unwrap();

        assert_eq!(run_numbers(&runs), vec![3, 2, 1]);
        assert_eq!(runs[0].1.logs.len(), 2);
        assert!(records
            .run_summary(&identity(), "missing", &RunFilter::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_run_summary_filters_by_run_number() {
        let store = MemoryStore::new();
        let records = release_history(&store);
        let filter = RunFilter {
            run_number: Some(2),
            ..RunFilter::default()
        };

        let runs = records.run_summary(&identity(), "release", &filter).unwrap().unwrap();

        assert_eq!(run_numbers(&runs), vec![2]);
        let info = records.get_pipeline_info(&identity(), "release").unwrap().unwrap();
        assert_eq!(runs[0].0, info.job_run_history[1]);
    }

    #[test]
    fn test_run_summary_filters_by_stage() {
        let store = MemoryStore::new();
        let records = release_history(&store);
        let filter = RunFilter {
            stage: Some("test".to_string()),
            ..RunFilter::default()
        };

        let runs = records.run_summary(&identity(), "release", &filter).unwrap().unwrap();

        assert_eq!(run_numbers(&runs), vec![3, 2, 1]);
        for (_, run) in &runs {
            assert_eq!(run.logs.len(), 1);
            assert_eq!(run.logs[0].stage_name, "test");
        }

        let unknown = RunFilter {
            stage: Some("deploy".to_string()),
            ..RunFilter::default()
        };
        assert!(records.run_summary(&identity(), "release", &unknown).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_run_summary_filters_by_job() {
        let store = MemoryStore::new();
        let records = release_history(&store);
        let filter = RunFilter {
            job: Some("unit".to_string()),
            ..RunFilter::default()
        };

        let runs = records.run_summary(&identity(), "release", &filter).unwrap().unwrap();

        assert_eq!(run_numbers(&runs), vec![2]);
        assert_eq!(runs[0].1.logs.len(), 1);
        assert_eq!(runs[0].1.logs[0].jobs[0].job_name, "unit");
        assert_eq!(runs[0].1.logs[0].jobs[0].job_status, RunStatus::Failed);
    }

    #[test]
    fn test_run_summary_combines_filters() {
        let store = MemoryStore::new();
        let records = release_history(&store);
        let filter = RunFilter {
            stage: Some("build".to_string()),
            job: Some("unit".to_string()),
            run_number: None,
        };

        let runs = records.run_summary(&identity(), "release", &filter).unwrap().unwrap();

        assert!(runs.is_empty(), "unit never ran in the build stage");
    }

    #[test]
    fn test_run_summary_skips_runs_missing_from_store() {
        let store = MemoryStore::new();
        let records = release_history(&store);
        records.append_run_history(&identity(), "release", "gone").unwrap();

        let runs = records
            .run_summary(&identity(), "release", &RunFilter::default())
            .unwrap()
            .unwrap();

        assert_eq!(run_numbers(&runs), vec![3, 2, 1]);
    }
}
