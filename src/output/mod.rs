mod progress;
mod prompt;
mod report;
mod styling;
mod tables;

pub use progress::StepProgress;
pub use prompt::confirm;
pub use report::{
    render_config_reports, render_override_preview, render_plan, render_repo, render_run,
    render_run_summary, render_stage_update, render_validation,
};
pub use styling::{bright_green, dim, magenta_bold};

/// Prints the `cid` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("⚙️ cid"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI/CD control plane")
    );
}
