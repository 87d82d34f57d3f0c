use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use log::info;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::controller::Controller;
use crate::error::CidError;
use crate::output;
use crate::pipeline::checker::peek_pipeline_name;
use crate::repo::GitCli;
use crate::store::records::{RunFilter, RunStatus, StageStatus};
use crate::store::{JsonFileStore, MemoryStore};

#[derive(Parser)]
#[command(name = "cid")]
#[command(author, version, about = "CI/CD control plane", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML, JSON or YAML)
    #[arg(long, global = true, env = "CID_SETTINGS")]
    settings: Option<PathBuf>,

    /// Directory to work in instead of the current one
    #[arg(short = 'C', long, global = true)]
    workdir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and save pipeline configurations, and manage the repository
    Config(ConfigArgs),

    /// Plan pipelines and record their runs
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },
}

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,

    /// Check a single configuration file (the default)
    #[arg(long)]
    check: bool,

    /// Check every configuration file in the pipelines directory
    #[arg(long, conflicts_with = "check")]
    check_all: bool,

    /// Only validate; do not save anything
    #[arg(long)]
    no_set: bool,

    /// Configuration file to check [default: pipelines.yml]
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Directory checked by --check-all [default: .cicd-pipelines]
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Clone a repository into the empty working directory and remember it
    SetRepo {
        /// Repository URL or local path
        repo_url: String,

        #[arg(short, long)]
        branch: Option<String>,

        #[arg(long)]
        commit: Option<String>,
    },

    /// Show the repository commands work against
    GetRepo,

    /// Apply `key=value` overrides to a saved pipeline
    Override {
        #[arg(short, long)]
        pipeline: String,

        /// Dotted path and value, e.g. global.docker.image=gradle:jdk8
        #[arg(short, long = "override", required = true)]
        overrides: Vec<String>,

        /// Save without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Show the stages and job groups a run would execute
    Plan {
        #[arg(short, long)]
        pipeline: String,
    },

    /// Record a new run
    Start {
        #[arg(short, long)]
        pipeline: String,

        /// Stage to include; repeat for several, omit for all
        #[arg(short, long = "stage")]
        stages: Vec<String>,
    },

    /// Record the status of a stage and its jobs
    Stage {
        #[arg(short, long)]
        run: String,

        #[arg(short, long)]
        stage: String,

        #[arg(long)]
        status: StageStatus,

        /// Job result as name=status; repeat for several
        #[arg(short, long = "job", value_parser = parse_job_status)]
        jobs: Vec<(String, RunStatus)>,
    },

    /// Record the final status of a run
    Finish {
        #[arg(short, long)]
        run: String,

        #[arg(long)]
        status: RunStatus,
    },

    /// Show a run record
    Log {
        #[arg(short, long)]
        run: String,
    },

    /// List past runs of a pipeline, newest first
    Report {
        #[arg(short, long)]
        pipeline: String,

        /// Only runs that include this stage
        #[arg(short, long)]
        stage: Option<String>,

        /// Only runs where this job reported a result
        #[arg(short, long)]
        job: Option<String>,

        /// Only the run with this number
        #[arg(short, long)]
        run: Option<u32>,
    },
}

fn parse_job_status(entry: &str) -> std::result::Result<(String, RunStatus), String> {
    let (name, status) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected 'job=status', got '{entry}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing job name in '{entry}'"));
    }
    Ok((name.to_string(), status.trim().parse()?))
}

impl Cli {
    fn workdir(&self) -> Result<PathBuf> {
        match &self.workdir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to read the current directory"),
        }
    }

    /// `config --no-set` neither reads nor writes the datastore.
    fn validates_only(&self) -> bool {
        matches!(&self.command, Commands::Config(args) if args.no_set && args.command.is_none())
    }

    pub fn execute(&self) -> Result<()> {
        let workdir = self.workdir()?;
        let settings = Settings::load(self.settings.as_deref(), &workdir)?;
        let git = GitCli::new(settings.git_timeout());

        if self.validates_only() {
            let store = MemoryStore::new();
            return self.dispatch(&Controller::new(&settings, &store, &git, &workdir));
        }

        let store = JsonFileStore::open(settings.store_dir()?)?;
        self.dispatch(&Controller::new(&settings, &store, &git, &workdir))
    }

    fn dispatch(&self, controller: &Controller<'_>) -> Result<()> {
        match &self.command {
            Commands::Config(args) => execute_config(controller, args),
            Commands::Pipeline { command } => execute_pipeline(controller, command),
        }
    }
}

fn execute_config(controller: &Controller<'_>, args: &ConfigArgs) -> Result<()> {
    match &args.command {
        Some(ConfigCommand::SetRepo {
            repo_url,
            branch,
            commit,
        }) => set_repo(controller, repo_url, branch.as_deref(), commit.as_deref()),
        Some(ConfigCommand::GetRepo) => {
            match controller.get_repo() {
                Some(resolved) => print!("{}", output::render_repo(&resolved)),
                None => {
                    println!("No repository currently configured.");
                    println!(
                        "Work inside a git checkout, or run 'cid config set-repo <URL>' \
                         in an empty directory."
                    );
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Override {
            pipeline,
            overrides,
            yes,
        }) => override_pipeline(controller, pipeline, overrides, *yes),
        None if args.check || !args.check_all => check_one(controller, args),
        None => check_all(controller, args),
    }
}

fn check_one(controller: &Controller<'_>, args: &ConfigArgs) -> Result<()> {
    let path = controller.resolve_config_path(args.config_file.as_deref())?;
    let label = label_for(&path);

    if args.no_set {
        info!("Checking configuration file {}", path.display());
        let outcome = controller.validate_config(&path);
        let valid = outcome.valid;
        print!("{}", output::render_validation(&IndexMap::from([(label, outcome)])));
        return finish_check(valid);
    }

    info!("Checking and saving configuration file {}", path.display());
    let report = controller.validate_n_save_config(&path);
    let valid = report.outcome.valid;
    print!("{}", output::render_config_reports(&IndexMap::from([(label, report)])));
    finish_check(valid)
}

fn check_all(controller: &Controller<'_>, args: &ConfigArgs) -> Result<()> {
    let dir = controller.pipelines_dir(args.dir.as_deref());
    if !dir.is_dir() {
        bail!("Invalid directory: {}", dir.display());
    }

    if args.no_set {
        info!("Checking all configuration files in {}", dir.display());
        let outcomes = controller.validate_configs(&dir)?;
        print!("{}", output::render_validation(&outcomes));
        return finish_check(outcomes.values().all(|o| o.valid));
    }

    info!("Checking and saving all configuration files in {}", dir.display());
    let reports = controller.validate_n_save_configs(&dir)?;
    print!("{}", output::render_config_reports(&reports));
    finish_check(reports.values().all(|r| r.outcome.valid))
}

fn finish_check(all_valid: bool) -> Result<()> {
    if all_valid {
        Ok(())
    } else {
        bail!("pipeline configuration check failed")
    }
}

/// Result row label: the pipeline name when it can be read, else the file name.
fn label_for(path: &Path) -> String {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_yaml::from_str(&contents).ok())
        .and_then(|raw| peek_pipeline_name(&raw))
        .unwrap_or_else(|| {
            path.file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
        })
}

fn set_repo(
    controller: &Controller<'_>,
    source: &str,
    branch: Option<&str>,
    commit: Option<&str>,
) -> Result<()> {
    let progress = output::StepProgress::start(&format!("Cloning {source}"));
    match controller.set_repo(source, branch, commit) {
        Ok(identity) => {
            progress.succeed(&format!("Cloned {}", identity.repo_name));
            println!(
                "Repository set successfully in the working directory: {} ({} @ {})",
                identity.repo_url, identity.branch, identity.commit_hash
            );
            Ok(())
        }
        Err(e) => {
            progress.fail(&format!("Could not set {source}"));
            Err(e.into())
        }
    }
}

fn override_pipeline(
    controller: &Controller<'_>,
    pipeline: &str,
    overrides: &[String],
    yes: bool,
) -> Result<()> {
    let preview = controller.preview_override(pipeline, overrides)?;
    print!("{}", output::render_override_preview(&preview));
    if !preview.outcome.valid {
        return Err(CidError::InvalidOverride(preview.outcome.error_message).into());
    }

    if !yes && !output::confirm("Save the overridden configuration?")? {
        println!("{}", output::dim("Override discarded; nothing was saved."));
        return Ok(());
    }

    let info = controller.save_override(preview)?;
    println!(
        "{}",
        output::bright_green(format!("Pipeline '{}' saved with overrides", info.pipeline_name))
    );
    Ok(())
}

fn execute_pipeline(controller: &Controller<'_>, command: &PipelineCommand) -> Result<()> {
    match command {
        PipelineCommand::Plan { pipeline } => {
            let info = controller.plan(pipeline)?;
            print!("{}", output::render_plan(&info));
        }
        PipelineCommand::Start { pipeline, stages } => {
            let (run_id, run) = controller.start_run(pipeline, stages)?;
            print!("{}", output::render_run(&run_id, &run));
        }
        PipelineCommand::Stage {
            run,
            stage,
            status,
            jobs,
        } => {
            let updated = controller.update_stage(run, stage, *status, jobs)?;
            println!("{}", output::render_stage_update(&updated, stage));
        }
        PipelineCommand::Finish { run, status } => {
            let finished = controller.finish_run(run, *status)?;
            print!("{}", output::render_run(run, &finished));
        }
        PipelineCommand::Log { run } => {
            let record = controller.run_log(run)?;
            print!("{}", output::render_run(run, &record));
        }
        PipelineCommand::Report {
            pipeline,
            stage,
            job,
            run,
        } => {
            let filter = RunFilter {
                stage: stage.clone(),
                job: job.clone(),
                run_number: *run,
            };
            let runs = controller.report(pipeline, &filter)?;
            print!("{}", output::render_run_summary(pipeline, &runs));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_job_status() {
        assert_eq!(
            parse_job_status("lint = failed").unwrap(),
            ("lint".to_string(), RunStatus::Failed)
        );
        assert!(parse_job_status("lint").is_err());
        assert!(parse_job_status("=success").is_err());
        assert!(parse_job_status("lint=exploded").is_err());
    }

    #[test]
    fn test_parse_config_flags() {
        let cli =
            Cli::try_parse_from(["cid", "config", "--check-all", "--no-set", "--dir", "ci"])
                .unwrap();
        let Commands::Config(args) = cli.command else {
            panic!("expected config command");
        };
        assert!(args.check_all);
        assert!(args.no_set);
        assert_eq!(args.dir, Some(PathBuf::from("ci")));
        assert!(args.command.is_none());
    }

    #[test]
    fn test_parse_stage_update() {
        let cli = Cli::try_parse_from([
            "cid", "pipeline", "stage", "--run", "r1", "--stage", "build", "--status", "started",
            "--job", "checkout=running", "--job", "lint=pending",
        ])
        .unwrap();
        let Commands::Pipeline {
            command: PipelineCommand::Stage { status, jobs, .. },
        } = cli.command
        else {
            panic!("expected pipeline stage command");
        };
        assert_eq!(status, StageStatus::Started);
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_parse_report_filters() {
        let cli = Cli::try_parse_from([
            "cid", "pipeline", "report", "-p", "release", "--stage", "test", "-j", "unit",
            "--run", "4",
        ])
        .unwrap();
        let Commands::Pipeline {
            command: PipelineCommand::Report { pipeline, stage, job, run },
        } = cli.command
        else {
            panic!("expected pipeline report command");
        };
        assert_eq!(pipeline, "release");
        assert_eq!(stage.as_deref(), Some("test"));
        assert_eq!(job.as_deref(), Some("unit"));
        assert_eq!(run, Some(4));

        let not_a_number = ["cid", "pipeline", "report", "-p", "x", "--run", "latest"];
        assert!(Cli::try_parse_from(not_a_number).is_err());
    }

    #[test]
    fn test_only_plain_no_set_skips_the_datastore() {
        let validate = Cli::try_parse_from(["cid", "config", "--no-set"]).unwrap();
        let save = Cli::try_parse_from(["cid", "config", "--check"]).unwrap();
        let get_repo = Cli::try_parse_from(["cid", "config", "get-repo"]).unwrap();

        assert!(validate.validates_only());
        assert!(!save.validates_only());
        assert!(!get_repo.validates_only());
    }

    #[test]
    fn test_override_requires_entries() {
        assert!(Cli::try_parse_from(["cid", "config", "override", "--pipeline", "p"]).is_err());
    }

    #[test]
    fn test_label_for_prefers_pipeline_name() {
        let dir = tempfile::tempdir().unwrap();
        let named = dir.path().join("a.yml");
        std::fs::write(&named, crate::testing::PIPELINE_YAML).unwrap();
        let broken = dir.path().join("b.yml");
        std::fs::write(&broken, "global: [").unwrap();

        assert_eq!(label_for(&named), "cicd_pipeline");
        assert_eq!(label_for(&broken), "b.yml");
    }
}
