//! Output formatting: table, JSON, plain.
//!
//! Table uses `tabled`, structured formats use serde, plain emits one
//! identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use labsync_core::{AlertSeverity, EquipmentStatus, SensorStatus};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

pub fn paint_severity(severity: AlertSeverity, color: bool) -> String {
    let text = severity.to_string();
    if !color {
        return text;
    }
    match severity {
        AlertSeverity::Info => text.cyan().to_string(),
        AlertSeverity::Warning => text.yellow().to_string(),
        AlertSeverity::Error => text.red().bold().to_string(),
    }
}

pub fn paint_sensor_status(status: SensorStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        SensorStatus::Normal => text.green().to_string(),
        SensorStatus::Warning => text.yellow().to_string(),
        SensorStatus::Error => text.red().to_string(),
    }
}

pub fn paint_equipment_status(status: &EquipmentStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        EquipmentStatus::Running => text.green().to_string(),
        EquipmentStatus::Error => text.red().to_string(),
        EquipmentStatus::Stopped | EquipmentStatus::Other(_) => text.dimmed().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render rows in the chosen format.
///
/// `json` receives the structured form of the whole list; `plain` emits
/// `id_fn` for each item.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
    to_json: impl Fn(&T) -> serde_json::Value,
) -> Result<String, CliError>
where
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json | OutputFormat::JsonCompact => {
            let values: Vec<_> = data.iter().map(to_json).collect();
            render_json(&values, format == OutputFormat::JsonCompact)?
        }
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Print to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    if rows.is_empty() {
        return "(none)".into();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> Result<String, CliError> {
    Ok(if compact {
        serde_json::to_string(data)?
    } else {
        serde_json::to_string_pretty(data)?
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: String,
    }

    #[test]
    fn plain_lists_ids() {
        let data = ["a", "b"];
        let out = render_list(
            OutputFormat::Plain,
            &data,
            |s| Row { id: (*s).into() },
            |s| (*s).to_owned(),
            |s| json!(s),
        )
        .unwrap();
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn compact_json_is_one_line() {
        let data = ["a"];
        let out = render_list(
            OutputFormat::JsonCompact,
            &data,
            |s| Row { id: (*s).into() },
            |s| (*s).to_owned(),
            |s| json!({ "id": s }),
        )
        .unwrap();
        assert_eq!(out, r#"[{"id":"a"}]"#);
    }

    #[test]
    fn empty_table_says_none() {
        let rows: Vec<Row> = Vec::new();
        assert_eq!(render_table(&rows), "(none)");
    }

    #[test]
    fn colors_are_skipped_when_disabled() {
        assert_eq!(paint_severity(AlertSeverity::Error, false), "error");
        assert_eq!(
            paint_equipment_status(&EquipmentStatus::Other("open".into()), false),
            "open"
        );
    }
}
