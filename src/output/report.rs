use std::fmt::Write;

use comfy_table::Cell;
use indexmap::IndexMap;

use crate::controller::{ConfigReport, OverridePreview};
use crate::pipeline::overrides::get_path;
use crate::pipeline::ValidationOutcome;
use crate::repo::ResolvedRepo;
use crate::store::records::{JobRun, PipelineInfo};

use super::styling::{bright, bright_green, bright_red, cyan, dim, run_status, stage_status};
use super::tables::{
    create_cyan_header, create_table, persisted_cell, run_status_cell, stage_status_cell,
    validity_cell,
};

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn append_errors<'a>(
    output: &mut String,
    failures: impl Iterator<Item = (&'a String, &'a ValidationOutcome)>,
) {
    for (name, outcome) in failures {
        let _ = writeln!(output, "  {}", bright_red(name));
        for line in outcome.error_message.lines() {
            let _ = writeln!(output, "    {}", dim(line));
        }
    }
}

/// Validation results without saving, one row per configuration.
pub fn render_validation(outcomes: &IndexMap<String, ValidationOutcome>) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔎", "Validation");

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Pipeline", "File", "Result"]));
    for (name, outcome) in outcomes {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(outcome.source_file.as_deref().unwrap_or("-")),
            validity_cell(outcome.valid),
        ]);
    }
    let _ = writeln!(output, "{table}\n");

    append_errors(&mut output, outcomes.iter().filter(|(_, o)| !o.valid));
    output
}

/// Validation results together with what was saved.
pub fn render_config_reports(reports: &IndexMap<String, ConfigReport>) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔎", "Validation");

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Pipeline", "File", "Result", "Saved"]));
    for (name, report) in reports {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(report.outcome.source_file.as_deref().unwrap_or("-")),
            validity_cell(report.outcome.valid),
            persisted_cell(&report.persisted),
        ]);
    }
    let _ = writeln!(output, "{table}\n");

    append_errors(
        &mut output,
        reports
            .iter()
            .filter(|(_, r)| !r.outcome.valid)
            .map(|(name, r)| (name, &r.outcome)),
    );
    output
}

pub fn render_repo(resolved: &ResolvedRepo) -> String {
    let identity = &resolved.identity;
    let source = if resolved.from_checkout {
        "working directory checkout"
    } else {
        "last session"
    };
    format!(
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Repository:"),
        cyan(&identity.repo_name),
        dim("URL:"),
        identity.repo_url,
        dim("Branch:"),
        identity.branch,
        dim("Commit:"),
        identity.commit_hash,
        dim("Source:"),
        dim(source),
    )
}

/// Dry run: the stages and job groups a run of `info` would execute.
pub fn render_plan(info: &PipelineInfo) -> String {
    let config = &info.pipeline_config;
    let mut output = String::new();
    add_section_header(&mut output, "🗺️", "Plan");
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n",
        dim("Pipeline:"),
        cyan(&info.pipeline_name),
        dim("File:"),
        info.pipeline_file_name,
        dim("Commit:"),
        info.last_commit_hash,
    );

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Stage",
        "Group",
        "Job",
        "Needs",
        "Docker",
        "Artifacts",
        "Allow failure",
    ]));
    for (stage, stage_config) in &config.stages {
        for (index, group) in stage_config.job_groups.iter().enumerate() {
            for job_name in group {
                let Some(job) = config.jobs.get(job_name) else {
                    continue;
                };
                let needs = if job.needs.is_empty() {
                    "-".to_string()
                } else {
                    job.needs.join(", ")
                };
                let docker = job
                    .effective_docker(&config.global)
                    .map_or_else(|| "-".to_string(), |d| format!("{}/{}", d.registry, d.image));
                table.add_row(vec![
                    Cell::new(stage),
                    Cell::new(index + 1),
                    Cell::new(job_name),
                    Cell::new(needs),
                    Cell::new(docker),
                    Cell::new(job.effective_artifact_path(&config.global).unwrap_or("-")),
                    Cell::new(if job.allow_failure { "yes" } else { "no" }),
                ]);
            }
        }
    }
    let _ = writeln!(output, "{table}");
    output
}

/// A run record with one row per job result, or per stage when a stage has
/// no job results yet.
pub fn render_run(run_id: &str, run: &JobRun) -> String {
    let mut output = String::new();
    let title = format!("Run #{} of {}", run.run_number, run.pipeline_name);
    add_section_header(&mut output, "🚀", &title);
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Run id:"),
        cyan(run_id),
        dim("Commit:"),
        run.git_commit_hash,
        dim("Status:"),
        run_status(run.status),
        dim("Started:"),
        format_time(run.start_time),
        dim("Completed:"),
        format_time(run.completion_time),
    );

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Stage",
        "Stage status",
        "Job",
        "Job status",
        "Completed",
    ]));
    for stage in &run.logs {
        if stage.jobs.is_empty() {
            table.add_row(vec![
                Cell::new(&stage.stage_name),
                stage_status_cell(stage.stage_status),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(format_time(stage.completion_time)),
            ]);
            continue;
        }
        for job in &stage.jobs {
            let job_name = if job.allow_failure {
                format!("{} (allowed to fail)", job.job_name)
            } else {
                job.job_name.clone()
            };
            table.add_row(vec![
                Cell::new(&stage.stage_name),
                stage_status_cell(stage.stage_status),
                Cell::new(job_name),
                run_status_cell(job.job_status),
                Cell::new(format_time(job.completion_time)),
            ]);
        }
    }
    let _ = writeln!(output, "{table}");
    output
}

/// Short confirmation line after a stage update.
pub fn render_stage_update(run: &JobRun, stage_name: &str) -> String {
    match run.stage(stage_name) {
        Some(stage) => format!(
            "Stage {} of run #{} is now {}",
            cyan(stage_name),
            run.run_number,
            stage_status(stage.stage_status)
        ),
        None => format!("Stage {} of run #{} updated", cyan(stage_name), run.run_number),
    }
}

fn yaml_cell(value: Option<&serde_yaml::Value>) -> Cell {
    let text = value
        .and_then(|v| serde_yaml::to_string(v).ok())
        .map_or_else(|| "-".to_string(), |yaml| yaml.trim_end().to_string());
    Cell::new(text)
}

/// Past runs of a pipeline, one row per run, newest first.
pub fn render_run_summary(pipeline_name: &str, runs: &[(String, JobRun)]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "📜", &format!("Runs of {pipeline_name}"));
    if runs.is_empty() {
        let _ = writeln!(output, "  {}", dim("No runs match"));
        return output;
    }

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Run",
        "Run id",
        "Commit",
        "Status",
        "Started",
        "Completed",
        "Stages",
    ]));
    for (run_id, run) in runs {
        let stages: Vec<String> = run
            .logs
            .iter()
            .map(|stage| {
                let jobs: Vec<String> = stage
                    .jobs
                    .iter()
                    .map(|job| format!("{} {}", job.job_name, job.job_status))
                    .collect();
                if jobs.is_empty() {
                    format!("{} {}", stage.stage_name, stage.stage_status)
                } else {
                    format!("{} {} ({})", stage.stage_name, stage.stage_status, jobs.join(", "))
                }
            })
            .collect();
        table.add_row(vec![
            Cell::new(format!("#{}", run.run_number)),
            Cell::new(run_id),
            Cell::new(&run.git_commit_hash),
            run.status.map_or_else(|| Cell::new("-"), run_status_cell),
            Cell::new(format_time(run.start_time)),
            Cell::new(format_time(run.completion_time)),
            Cell::new(stages.join("\n")),
        ]);
    }
    let _ = writeln!(output, "{table}");
    output
}

/// The overridden values, the candidate configuration, and whether it is valid.
pub fn render_override_preview(preview: &OverridePreview) -> String {
    let mut output = String::new();
    let title = format!("Override of {}", preview.base.pipeline_name);
    add_section_header(&mut output, "✏️", &title);

    let before = serde_yaml::to_value(&preview.base.pipeline_config).ok();
    let mut table = create_table();
    table.set_header(create_cyan_header(&["Path", "Saved", "Candidate"]));
    for path in &preview.paths {
        table.add_row(vec![
            Cell::new(path),
            yaml_cell(before.as_ref().and_then(|tree| get_path(tree, path))),
            yaml_cell(get_path(&preview.candidate, path)),
        ]);
    }
    let _ = writeln!(output, "{table}\n");

    match serde_yaml::to_string(&preview.candidate) {
        Ok(yaml) => {
            for line in yaml.lines() {
                let _ = writeln!(output, "  {line}");
            }
        }
        Err(e) => {
            let _ = writeln!(output, "  {}", bright_red(format!("cannot display candidate: {e}")));
        }
    }
    output.push('\n');

    if preview.outcome.valid {
        let _ = writeln!(output, "{}", bright_green("Overridden configuration is valid"));
    } else {
        let _ = writeln!(output, "{}", bright_red("Overridden configuration is invalid"));
        for line in preview.outcome.error_message.lines() {
            let _ = writeln!(output, "  {}", dim(line));
        }
    }
    output
}
