use console::style;

use crate::store::records::{RunStatus, StageStatus};

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

pub fn run_status(status: Option<RunStatus>) -> console::StyledObject<String> {
    match status {
        None => dim("not started"),
        Some(RunStatus::Pending) => dim(RunStatus::Pending),
        Some(RunStatus::Running) => bright_yellow(RunStatus::Running),
        Some(RunStatus::Success) => bright_green(RunStatus::Success),
        Some(RunStatus::Failed) => bright_red(RunStatus::Failed),
    }
}

pub fn stage_status(status: StageStatus) -> console::StyledObject<String> {
    match status {
        StageStatus::Pending => dim(status),
        StageStatus::Started => bright_yellow(status),
        StageStatus::Success => bright_green(status),
        StageStatus::Failed => bright_red(status),
    }
}
