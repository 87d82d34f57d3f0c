use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::controller::Persisted;
use crate::store::records::{RunStatus, StageStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn validity_cell(valid: bool) -> Cell {
    if valid {
        Cell::new("valid").fg(TableColor::Green)
    } else {
        Cell::new("invalid").fg(TableColor::Red)
    }
}

pub fn persisted_cell(persisted: &Persisted) -> Cell {
    match persisted {
        Persisted::Skipped => Cell::new("-").fg(TableColor::DarkGrey),
        Persisted::Saved => Cell::new("saved").fg(TableColor::Green),
        Persisted::Failed(reason) => {
            Cell::new(format!("not saved: {reason}")).fg(TableColor::Yellow)
        }
    }
}

pub fn run_status_cell(status: RunStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        RunStatus::Pending => cell.fg(TableColor::DarkGrey),
        RunStatus::Running => cell.fg(TableColor::Yellow),
        RunStatus::Success => cell.fg(TableColor::Green),
        RunStatus::Failed => cell.fg(TableColor::Red),
    }
}

pub fn stage_status_cell(status: StageStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        StageStatus::Pending => cell.fg(TableColor::DarkGrey),
        StageStatus::Started => cell.fg(TableColor::Yellow),
        StageStatus::Success => cell.fg(TableColor::Green),
        StageStatus::Failed => cell.fg(TableColor::Red),
    }
}
