use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A validated pipeline configuration.
///
/// Only the config checker builds these from untrusted input. Values read
/// back from the datastore were validated before they were saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub global: GlobalConfig,
    /// Stages in declaration order
    pub stages: IndexMap<String, StageConfig>,
    /// Jobs in declaration order
    pub jobs: IndexMap<String, JobConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Unique within a repository branch
    pub pipeline_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_upload_path: Option<String>,
}

/// Docker settings. Either field may be left to the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Job name to the same-stage jobs it waits for
    pub job_graph: IndexMap<String, Vec<String>>,
    /// Jobs that may run concurrently, in execution order
    pub job_groups: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub stage: String,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_upload_path: Option<String>,
    pub scripts: Vec<String>,
}

/// Registry and image a job runs with after applying global fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveDocker<'a> {
    pub registry: &'a str,
    pub image: &'a str,
}

impl JobConfig {
    pub fn effective_registry<'a>(&'a self, global: &'a GlobalConfig) -> Option<&'a str> {
        self.docker
            .as_ref()
            .and_then(|d| d.registry.as_deref())
            .or_else(|| global.docker.as_ref().and_then(|d| d.registry.as_deref()))
    }

    pub fn effective_image<'a>(&'a self, global: &'a GlobalConfig) -> Option<&'a str> {
        self.docker
            .as_ref()
            .and_then(|d| d.image.as_deref())
            .or_else(|| global.docker.as_ref().and_then(|d| d.image.as_deref()))
    }

    pub fn effective_docker<'a>(&'a self, global: &'a GlobalConfig) -> Option<EffectiveDocker<'a>> {
        Some(EffectiveDocker {
            registry: self.effective_registry(global)?,
            image: self.effective_image(global)?,
        })
    }

    pub fn effective_artifact_path<'a>(&'a self, global: &'a GlobalConfig) -> Option<&'a str> {
        self.artifact_upload_path
            .as_deref()
            .or(global.artifact_upload_path.as_deref())
    }
}

impl PipelineConfig {
    pub fn pipeline_name(&self) -> &str {
        &self.global.pipeline_name
    }

    /// Jobs declared for `stage`, in declaration order.
    pub fn jobs_in_stage<'a>(
        &'a self,
        stage: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a JobConfig)> + 'a {
        self.jobs.iter().filter(move |(_, job)| job.stage == stage)
    }
}
