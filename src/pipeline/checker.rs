use std::fs;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{CidError, Result};

use super::graph::resolve_job_groups;
use super::model::{DockerConfig, GlobalConfig, JobConfig, PipelineConfig, StageConfig};

const TOP_LEVEL_KEYS: &[&str] = &["global", "stages", "jobs"];
const GLOBAL_KEYS: &[&str] = &["pipeline_name", "docker", "artifact_upload_path"];
const DOCKER_KEYS: &[&str] = &["registry", "image"];
const STAGE_KEYS: &[&str] = &["job_graph", "job_groups"];
const JOB_KEYS: &[&str] = &[
    "stage",
    "allow_failure",
    "needs",
    "docker",
    "artifact_upload_path",
    "scripts",
];

/// Result of checking one pipeline configuration.
///
/// `error_message` holds one line per failure cause and is empty when the
/// configuration is valid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error_message: String,
    pub pipeline_config: Option<PipelineConfig>,
    /// File the configuration was read from, when validated from disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl ValidationOutcome {
    fn passed(config: PipelineConfig) -> Self {
        Self {
            valid: true,
            error_message: String::new(),
            pipeline_config: Some(config),
            source_file: None,
        }
    }

    pub(crate) fn failed(pipeline_name: Option<&str>, issues: &[CidError]) -> Self {
        let error_message = issues
            .iter()
            .map(|issue| match pipeline_name {
                Some(name) => format!("pipeline '{name}': {issue}"),
                None => issue.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            valid: false,
            error_message,
            pipeline_config: None,
            source_file: None,
        }
    }

    fn with_source(mut self, source_file: String) -> Self {
        self.source_file = Some(source_file);
        self
    }
}

/// Validates a raw configuration tree and builds the typed pipeline model.
///
/// Checking runs in three phases: structure and types, cross references, and
/// the per-stage job graphs. Every cause found in the first failing phase is
/// reported. This function never fails; malformed input produces an invalid
/// outcome.
pub fn validate(raw: &Value) -> ValidationOutcome {
    let pipeline_name = peek_pipeline_name(raw);
    let name = pipeline_name.as_deref();

    let mut decoder = Decoder::default();
    let decoded = decoder.decode(raw);
    let (global, stages, jobs) = match decoded {
        Some(parts) if decoder.issues.is_empty() => parts,
        _ => return ValidationOutcome::failed(name, &decoder.issues),
    };

    let graphs = match check_references(&stages, &jobs) {
        Ok(graphs) => graphs,
        Err(issues) => return ValidationOutcome::failed(name, &issues),
    };

    let mut resolved = IndexMap::new();
    let mut issues = Vec::new();
    for (stage, job_graph) in graphs {
        match resolve_job_groups(&job_graph) {
            Ok(job_groups) => {
                resolved.insert(
                    stage,
                    StageConfig {
                        job_graph,
                        job_groups,
                    },
                );
            }
            Err(err) => issues.push(CidError::in_stage(stage, err)),
        }
    }
    if !issues.is_empty() {
        return ValidationOutcome::failed(name, &issues);
    }

    debug!(
        "Pipeline '{}' is valid with {} stages and {} jobs",
        global.pipeline_name,
        resolved.len(),
        jobs.len()
    );

    ValidationOutcome::passed(PipelineConfig {
        global,
        stages: resolved,
        jobs,
    })
}

/// Reads, parses and validates a single configuration file.
pub fn validate_file(path: &Path) -> ValidationOutcome {
    let source = file_label(path);
    let (_, outcome) = check_file(path);
    outcome.with_source(source)
}

/// Validates every `.yml`/`.yaml` file directly inside `dir`.
///
/// Results are keyed by pipeline name, or by file name when the pipeline name
/// cannot be read or already belongs to another file. A valid configuration
/// takes a name over from an invalid one; a second valid configuration with
/// the same name fails as a duplicate. A file that fails does not stop the
/// others.
///
/// # Errors
///
/// Returns an error only if the directory itself cannot be listed.
pub fn validate_dir(dir: &Path) -> Result<IndexMap<String, ValidationOutcome>> {
    let mut files: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();
    files.sort();

    info!("Validating {} configuration files in {}", files.len(), dir.display());

    let mut results: IndexMap<String, ValidationOutcome> = IndexMap::new();
    for path in files {
        let file_name = file_label(&path);
        let (pipeline_name, outcome) = check_file(&path);
        let outcome = outcome.with_source(file_name.clone());

        let Some(name) = pipeline_name else {
            results.insert(file_name, outcome);
            continue;
        };
        let Some(holder) = results.get(&name) else {
            results.insert(name, outcome);
            continue;
        };

        // Only a valid configuration owns its pipeline name
        match (holder.valid, outcome.valid) {
            (_, false) => {
                results.insert(file_name, outcome);
            }
            (false, true) => {
                if let Some(displaced) = results.shift_remove(&name) {
                    let label = displaced.source_file.clone().unwrap_or_else(|| name.clone());
                    results.insert(label, displaced);
                }
                results.insert(name, outcome);
            }
            (true, true) => {
                let first = holder.source_file.clone().unwrap_or_default();
                warn!("Pipeline name '{name}' in {file_name} already defined by {first}");
                let issue = CidError::referential(
                    "global.pipeline_name",
                    format!("duplicate pipeline name, already defined in {first}"),
                );
                results.insert(
                    file_name.clone(),
                    ValidationOutcome::failed(Some(&name), &[issue]).with_source(file_name),
                );
            }
        }
    }

    Ok(results)
}

pub fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml" | "yaml")
    )
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn check_file(path: &Path) -> (Option<String>, ValidationOutcome) {
    debug!("Checking configuration file {}", path.display());

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            let issue =
                CidError::structural(path.display().to_string(), format!("cannot read file: {e}"));
            return (None, ValidationOutcome::failed(None, &[issue]));
        }
    };

    let raw: Value = match serde_yaml::from_str(&contents) {
        Ok(raw) => raw,
        Err(e) => {
            let issue =
                CidError::structural(path.display().to_string(), format!("invalid YAML: {e}"));
            return (None, ValidationOutcome::failed(None, &[issue]));
        }
    };

    (peek_pipeline_name(&raw), validate(&raw))
}

/// Best-effort read of `global.pipeline_name` for labelling results.
pub fn peek_pipeline_name(raw: &Value) -> Option<String> {
    raw.get("global")?
        .get("pipeline_name")?
        .as_str()
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
}

struct RawStage {
    name: String,
    declared_graph: Option<IndexMap<String, Vec<String>>>,
}

type Decoded = (GlobalConfig, Vec<RawStage>, IndexMap<String, JobConfig>);

/// Coerces loosely typed YAML into the typed model, recording every failure
/// with the dotted path of the offending field.
#[derive(Default)]
struct Decoder {
    issues: Vec<CidError>,
}

impl Decoder {
    fn report(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(CidError::structural(path, message));
    }

    fn decode(&mut self, raw: &Value) -> Option<Decoded> {
        let root = self.mapping(raw, "<root>")?;
        self.check_keys(root, "", TOP_LEVEL_KEYS);

        let global = self.required(root, "", "global").and_then(|v| self.global(v));
        let stages = self.required(root, "", "stages").and_then(|v| self.stages(v));
        let jobs = self.required(root, "", "jobs").and_then(|v| self.jobs(v));

        let (global, stages, jobs) = (global?, stages?, jobs?);
        self.check_docker(&global, &jobs);
        Some((global, stages, jobs))
    }

    fn global(&mut self, value: &Value) -> Option<GlobalConfig> {
        let map = self.mapping(value, "global")?;
        self.check_keys(map, "global", GLOBAL_KEYS);

        let pipeline_name = self
            .required(map, "global", "pipeline_name")
            .and_then(|v| self.non_empty_string(v, "global.pipeline_name"));
        let docker = self.docker(map.get("docker"), "global.docker");
        let artifact_upload_path =
            self.optional_string(map.get("artifact_upload_path"), "global.artifact_upload_path");

        Some(GlobalConfig {
            pipeline_name: pipeline_name?,
            docker: docker?,
            artifact_upload_path: artifact_upload_path?,
        })
    }

    /// `Some(None)` when absent, `None` when present but malformed.
    fn docker(&mut self, value: Option<&Value>, path: &str) -> Option<Option<DockerConfig>> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Some(None);
        };
        let map = self.mapping(value, path)?;
        self.check_keys(map, path, DOCKER_KEYS);

        let registry = self.optional_string(map.get("registry"), &child(path, "registry"));
        let image = self.optional_string(map.get("image"), &child(path, "image"));

        Some(Some(DockerConfig {
            registry: registry?,
            image: image?,
        }))
    }

    fn stages(&mut self, value: &Value) -> Option<Vec<RawStage>> {
        let mut stages: Vec<RawStage> = Vec::new();

        match value {
            Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let path = format!("stages[{i}]");
                    if let Some(name) = self.non_empty_string(item, &path) {
                        if stages.iter().any(|s| s.name == name) {
                            self.report(&path, format!("stage '{name}' is declared twice"));
                        } else {
                            stages.push(RawStage {
                                name,
                                declared_graph: None,
                            });
                        }
                    }
                }
            }
            Value::Mapping(map) => {
                for (name, stage_value) in self.entries(map, "stages") {
                    let path = child("stages", &name);
                    let declared_graph = self.stage_body(stage_value, &path);
                    stages.push(RawStage {
                        name,
                        declared_graph: declared_graph.flatten(),
                    });
                }
            }
            other => {
                self.report(
                    "stages",
                    format!("expected a list of stage names or a mapping, found {}", kind(other)),
                );
                return None;
            }
        }

        if stages.is_empty() {
            self.report("stages", "at least one stage is required");
            return None;
        }
        Some(stages)
    }

    fn stage_body(
        &mut self,
        value: &Value,
        path: &str,
    ) -> Option<Option<IndexMap<String, Vec<String>>>> {
        if value.is_null() {
            return Some(None);
        }
        let map = self.mapping(value, path)?;
        self.check_keys(map, path, STAGE_KEYS);

        let graph_path = child(path, "job_graph");
        let Some(graph_value) = map.get("job_graph").filter(|v| !v.is_null()) else {
            return Some(None);
        };
        let graph_map = self.mapping(graph_value, &graph_path)?;

        let mut graph = IndexMap::new();
        for (job, deps) in self.entries(graph_map, &graph_path) {
            let dep_path = child(&graph_path, &job);
            if let Some(deps) = self.string_list(deps, &dep_path) {
                graph.insert(job, deps);
            }
        }
        Some(Some(graph))
    }

    fn jobs(&mut self, value: &Value) -> Option<IndexMap<String, JobConfig>> {
        let map = self.mapping(value, "jobs")?;
        if map.is_empty() {
            self.report("jobs", "at least one job is required");
            return None;
        }

        let mut jobs = IndexMap::new();
        for (name, job_value) in self.entries(map, "jobs") {
            let path = child("jobs", &name);
            if let Some(job) = self.job(job_value, &path) {
                jobs.insert(name, job);
            }
        }
        Some(jobs)
    }

    fn job(&mut self, value: &Value, path: &str) -> Option<JobConfig> {
        let map = self.mapping(value, path)?;
        self.check_keys(map, path, JOB_KEYS);

        let stage = self
            .required(map, path, "stage")
            .and_then(|v| self.non_empty_string(v, &child(path, "stage")));
        let allow_failure = match map.get("allow_failure").filter(|v| !v.is_null()) {
            Some(v) => self.boolean(v, &child(path, "allow_failure")),
            None => Some(false),
        };
        let needs = match map.get("needs").filter(|v| !v.is_null()) {
            Some(v) => self.string_list(v, &child(path, "needs")),
            None => Some(Vec::new()),
        };
        let docker = self.docker(map.get("docker"), &child(path, "docker"));
        let artifact_upload_path = self.optional_string(
            map.get("artifact_upload_path"),
            &child(path, "artifact_upload_path"),
        );
        let scripts = self
            .required(map, path, "scripts")
            .and_then(|v| self.scripts(v, &child(path, "scripts")));

        Some(JobConfig {
            stage: stage?,
            allow_failure: allow_failure?,
            needs: needs?,
            docker: docker?,
            artifact_upload_path: artifact_upload_path?,
            scripts: scripts?,
        })
    }

    fn scripts(&mut self, value: &Value, path: &str) -> Option<Vec<String>> {
        let scripts = match value {
            Value::String(line) => vec![line.clone()],
            other => self.string_list(other, path)?,
        };
        if scripts.iter().all(|line| line.trim().is_empty()) {
            self.report(path, "at least one script line is required");
            return None;
        }
        Some(scripts)
    }

    fn check_docker(&mut self, global: &GlobalConfig, jobs: &IndexMap<String, JobConfig>) {
        for (name, job) in jobs {
            if job.effective_registry(global).is_none() {
                self.report(
                    &format!("jobs.{name}.docker.registry"),
                    "no docker registry for this job and global.docker.registry is not set",
                );
            }
            if job.effective_image(global).is_none() {
                self.report(
                    &format!("jobs.{name}.docker.image"),
                    "no docker image for this job and global.docker.image is not set",
                );
            }
        }
    }

    fn required<'a>(&mut self, map: &'a Mapping, path: &str, key: &str) -> Option<&'a Value> {
        let value = map.get(key).filter(|v| !v.is_null());
        if value.is_none() {
            self.report(&child(path, key), "required field is missing");
        }
        value
    }

    fn mapping<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Mapping> {
        match value {
            Value::Mapping(map) => Some(map),
            other => {
                self.report(path, format!("expected a mapping, found {}", kind(other)));
                None
            }
        }
    }

    /// String-keyed entries of `map`; other keys are reported and skipped.
    fn entries<'a>(&mut self, map: &'a Mapping, path: &str) -> Vec<(String, &'a Value)> {
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                Some(name) if !name.trim().is_empty() => entries.push((name.to_string(), value)),
                _ => self.report(
                    path,
                    format!("keys must be non-empty strings, found {}", kind(key)),
                ),
            }
        }
        entries
    }

    fn check_keys(&mut self, map: &Mapping, path: &str, allowed: &[&str]) {
        for key in map.keys() {
            match key.as_str() {
                Some(name) if allowed.contains(&name) => {}
                Some(name) => self.report(&child(path, name), "unknown field"),
                None => self.report(
                    if path.is_empty() { "<root>" } else { path },
                    format!("keys must be strings, found {}", kind(key)),
                ),
            }
        }
    }

    fn non_empty_string(&mut self, value: &Value, path: &str) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::String(_) => {
                self.report(path, "must not be empty");
                None
            }
            other => {
                self.report(path, format!("expected a string, found {}", kind(other)));
                None
            }
        }
    }

    /// `Some(None)` when absent or null.
    fn optional_string(&mut self, value: Option<&Value>, path: &str) -> Option<Option<String>> {
        match value.filter(|v| !v.is_null()) {
            Some(v) => self.non_empty_string(v, path).map(Some),
            None => Some(None),
        }
    }

    fn boolean(&mut self, value: &Value, path: &str) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            other => {
                self.report(path, format!("expected a boolean, found {}", kind(other)));
                None
            }
        }
    }

    fn string_list(&mut self, value: &Value, path: &str) -> Option<Vec<String>> {
        let Value::Sequence(items) = value else {
            if value.is_null() {
                return Some(Vec::new());
            }
            self.report(path, format!("expected a list, found {}", kind(value)));
            return None;
        };

        let mut strings = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::String(s) => strings.push(s.clone()),
                other => {
                    self.report(
                        &format!("{path}[{i}]"),
                        format!("expected a string, found {}", kind(other)),
                    );
                    ok = false;
                }
            }
        }
        ok.then_some(strings)
    }
}

/// Checks stage and job references and returns each stage's canonical job
/// graph: same-stage `needs`, keyed in declared graph order when the stage
/// declares one, else in job declaration order.
fn check_references(
    stages: &[RawStage],
    jobs: &IndexMap<String, JobConfig>,
) -> std::result::Result<IndexMap<String, IndexMap<String, Vec<String>>>, Vec<CidError>> {
    let mut issues = Vec::new();
    let stage_index: IndexMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    for (name, job) in jobs {
        let Some(&own_stage) = stage_index.get(job.stage.as_str()) else {
            issues.push(CidError::referential(
                format!("jobs.{name}.stage"),
                format!("stage '{}' is not declared in stages", job.stage),
            ));
            continue;
        };

        for need in &job.needs {
            match jobs.get(need) {
                None => issues.push(CidError::referential(
                    format!("jobs.{name}.needs"),
                    format!("needs unknown job '{need}'"),
                )),
                Some(other) => {
                    let later = stage_index
                        .get(other.stage.as_str())
                        .is_some_and(|&i| i > own_stage);
                    if later {
                        issues.push(CidError::referential(
                            format!("jobs.{name}.needs"),
                            format!("needs job '{need}' from later stage '{}'", other.stage),
                        ));
                    }
                }
            }
        }
    }

    let mut graphs = IndexMap::new();
    for stage in stages {
        let stage_jobs: Vec<&String> = jobs
            .iter()
            .filter(|(_, job)| job.stage == stage.name)
            .map(|(name, _)| name)
            .collect();

        if stage_jobs.is_empty() {
            issues.push(CidError::referential(
                format!("stages.{}", stage.name),
                "stage has no jobs",
            ));
            continue;
        }

        let same_stage_needs = |job: &str| -> Vec<String> {
            jobs.get(job)
                .map(|config| {
                    config
                        .needs
                        .iter()
                        .filter(|need| jobs.get(*need).is_some_and(|n| n.stage == stage.name))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let graph: IndexMap<String, Vec<String>> = match &stage.declared_graph {
            None => stage_jobs
                .iter()
                .map(|job| ((*job).clone(), same_stage_needs(job)))
                .collect(),
            Some(declared) => {
                let graph_path = format!("stages.{}.job_graph", stage.name);
                check_declared_graph(&graph_path, stage, declared, jobs, &stage_jobs, &mut issues);

                declared
                    .iter()
                    .filter(|(job, deps)| {
                        let derived = same_stage_needs(job);
                        let matches = as_set(deps) == as_set(&derived);
                        let known = deps.iter().all(|d| jobs.contains_key(d));
                        let in_stage = jobs.get(*job).is_some_and(|j| j.stage == stage.name);
                        if known && !matches && in_stage {
                            issues.push(CidError::referential(
                                format!("jobs.{job}.needs"),
                                format!(
                                    "same-stage needs [{}] do not match {graph_path}.{job} [{}]",
                                    derived.join(", "),
                                    deps.join(", ")
                                ),
                            ));
                        }
                        jobs.contains_key(*job)
                    })
                    .map(|(job, _)| (job.clone(), same_stage_needs(job)))
                    .collect()
            }
        };
        graphs.insert(stage.name.clone(), graph);
    }

    if issues.is_empty() {
        Ok(graphs)
    } else {
        Err(issues)
    }
}

fn check_declared_graph(
    graph_path: &str,
    stage: &RawStage,
    declared: &IndexMap<String, Vec<String>>,
    jobs: &IndexMap<String, JobConfig>,
    stage_jobs: &[&String],
    issues: &mut Vec<CidError>,
) {
    for (job, deps) in declared {
        match jobs.get(job) {
            None => issues.push(CidError::referential(
                child(graph_path, job),
                format!("job '{job}' is not declared in jobs"),
            )),
            Some(config) if config.stage != stage.name => issues.push(CidError::referential(
                child(graph_path, job),
                format!("job '{job}' belongs to stage '{}'", config.stage),
            )),
            Some(_) => {}
        }
        for dep in deps.iter().filter(|d| !jobs.contains_key(*d)) {
            issues.push(CidError::referential(
                child(graph_path, job),
                format!("depends on unknown job '{dep}'"),
            ));
        }
    }

    for job in stage_jobs {
        if !declared.contains_key(*job) {
            issues.push(CidError::referential(
                graph_path,
                format!("job '{job}' belongs to this stage but is missing from job_graph"),
            ));
        }
    }
}

fn as_set(items: &[String]) -> IndexSet<&str> {
    items.iter().map(String::as_str).collect()
}

fn child(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
