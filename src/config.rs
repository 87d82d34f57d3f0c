use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CidError;
use crate::pipeline::checker::is_yaml_file;

/// Settings file structure for cid.
///
/// Loaded from `--settings PATH`, or from the first of `cid.toml`,
/// `cid.json`, `cid.yaml` and `cid.yml` found in the working directory.
/// Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub pipelines: PipelineSettings,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreSettings {
    /// Directory holding the collection files
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineSettings {
    /// Directory of pipeline files, relative to the working directory
    #[serde(default = "default_pipelines_dir")]
    pub dir: PathBuf,

    /// File checked when no `--config-file` is given
    #[serde(default = "default_pipeline_file")]
    pub default_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitSettings {
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Seconds before a git process is killed
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionSettings {
    /// Owner of the stored session; defaults to the login name
    pub user_id: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dir: default_pipelines_dir(),
            default_file: default_pipeline_file(),
        }
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_pipelines_dir() -> PathBuf {
    PathBuf::from(".cicd-pipelines")
}

fn default_pipeline_file() -> String {
    "pipelines.yml".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Settings {
    /// Load settings from a file.
    ///
    /// Searches for settings files in this order:
    /// 1. Specified path
    /// 2. `dir/cid.toml`
    /// 3. `dir/cid.json`
    /// 4. `dir/cid.yaml`
    /// 5. `dir/cid.yml`
    ///
    /// Returns default settings if no file is found.
    pub fn load(path: Option<&Path>, dir: &Path) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let candidates = ["cid.toml", "cid.json", "cid.yaml", "cid.yml"];
                match candidates.iter().map(|c| dir.join(c)).find(|p| p.is_file()) {
                    Some(path) => Self::load_from_path(&path)?,
                    None => Self::default(),
                }
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML settings: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON settings: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML settings: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse settings file: {}", path.display()))
            }
        }
    }

    fn validate(&self) -> std::result::Result<(), CidError> {
        if self.git.timeout_secs == 0 {
            return Err(CidError::Settings("git.timeout-secs must be at least 1".into()));
        }
        if self.git.default_branch.trim().is_empty() {
            return Err(CidError::Settings("git.default-branch must not be empty".into()));
        }
        if !is_yaml_file(Path::new(&self.pipelines.default_file)) {
            return Err(CidError::Settings(format!(
                "pipelines.default-file '{}' must have a .yml or .yaml extension",
                self.pipelines.default_file
            )));
        }
        Ok(())
    }

    /// Directory of the document store.
    pub fn store_dir(&self) -> std::result::Result<PathBuf, CidError> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("cid").join("store"))
                .ok_or_else(|| {
                    CidError::Settings("No data directory found, set store.path".into())
                }),
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout_secs)
    }

    /// Configured user id, else `$USER`, else `$USERNAME`, else `anonymous`.
    pub fn user_id(&self) -> String {
        self.session
            .user_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
            .or_else(|| std::env::var("USERNAME").ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "anonymous".to_string())
    }
}
