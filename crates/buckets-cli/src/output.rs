//! Table and JSON rendering shared by commands.

use anyhow::Result;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use buckets_mount::MountState;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Colored cell for a mount state label.
pub fn state_cell(state: MountState) -> Cell {
    Cell::new(state.label()).fg(match state {
        MountState::Mounted => Color::Green,
        MountState::Disconnected => Color::Red,
        MountState::Plain => Color::Yellow,
        MountState::Missing | MountState::Symlink => Color::DarkGrey,
    })
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
