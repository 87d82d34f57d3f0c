use thiserror::Error;

#[derive(Error, Debug)]
pub enum CidError {
    #[error("{path}: {message}")]
    StructuralConfig { path: String, message: String },

    #[error("{path}: {message}")]
    ReferentialConfig { path: String, message: String },

    #[error("cyclic dependency between jobs: {}", jobs.join(", "))]
    CyclicDependency { jobs: Vec<String> },

    #[error("job '{job}' depends on unknown job '{dependency}'")]
    UnknownJobReference { job: String, dependency: String },

    #[error("stage '{stage}': {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<CidError>,
    },

    #[error("malformed override '{entry}': {reason}")]
    MalformedOverride { entry: String, reason: String },

    #[error("override pipeline configuration validation failed:\n{0}")]
    InvalidOverride(String),

    #[error("no pipeline config found for '{pipeline}' in '{repo}' on branch '{branch}'")]
    PipelineNotFound {
        pipeline: String,
        repo: String,
        branch: String,
    },

    #[error("no pipeline run with id '{0}'")]
    RunNotFound(String),

    #[error("repository error: {0}")]
    RepoState(String),

    #[error("datastore error: {0}")]
    Persistence(String),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CidError {
    pub fn structural(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StructuralConfig {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn referential(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReferentialConfig {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn in_stage(stage: impl Into<String>, source: CidError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    pub fn malformed_override(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedOverride {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CidError>;
