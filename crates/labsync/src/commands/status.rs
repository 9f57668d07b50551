//! One-shot status: hydrate, print, disconnect.

use std::sync::Arc;

use tabled::Tabled;

use labsync_core::{Alert, Entity, Equipment, LabState, Sensor};

use crate::cli::{GlobalOpts, OutputFormat, StatusArgs, StatusSection};
use crate::config::Session;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct SensorRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

#[derive(Tabled)]
struct EquipmentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn sensor_row(s: &Arc<Sensor>, color: bool) -> SensorRow {
    SensorRow {
        id: s.id().to_owned(),
        value: util::format_number(s.value()),
        unit: s.unit().to_owned(),
        status: output::paint_sensor_status(s.status(), color),
        updated: s.last_updated().format("%H:%M:%S").to_string(),
    }
}

fn equipment_row(e: &Arc<Equipment>, color: bool) -> EquipmentRow {
    EquipmentRow {
        id: e.id().to_owned(),
        kind: e.kind().to_owned(),
        status: output::paint_equipment_status(e.status(), color),
        speed: e.as_pump().map_or_else(
            || "-".into(),
            |p| {
                format!(
                    "{} RPM ({:.0}%)",
                    util::format_number(p.speed()),
                    p.speed_percentage()
                )
            },
        ),
        updated: e.last_updated().format("%H:%M:%S").to_string(),
    }
}

fn alert_row(a: &Arc<Alert>, color: bool) -> AlertRow {
    AlertRow {
        time: a.timestamp.format("%H:%M:%S").to_string(),
        severity: output::paint_severity(a.severity, color),
        message: a.message.clone(),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: Session, args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = util::connect(&session).await?;
    let rendered = {
        let state = client.state().lock().await;
        render(&state, args.section, global)
    };
    client.shutdown().await;
    output::print_output(&rendered?, global.quiet);
    Ok(())
}

pub(crate) fn render(
    state: &LabState,
    section: StatusSection,
    global: &GlobalOpts,
) -> Result<String, CliError> {
    let format = global.output;
    let color = output::should_color(global.color);

    if section == StatusSection::All
        && matches!(format, OutputFormat::Json | OutputFormat::JsonCompact)
    {
        return output::render_json(&state.to_json(), format == OutputFormat::JsonCompact);
    }

    let sensor_list = state.sensors().values();
    let equipment_list = state.equipment().values();
    let alert_list = state.alerts().snapshot();

    let sensors = || {
        output::render_list(
            format,
            sensor_list.as_slice(),
            |s| sensor_row(s, color),
            |s| s.id().to_owned(),
            |s| s.to_json(),
        )
    };
    let equipment = || {
        output::render_list(
            format,
            equipment_list.as_slice(),
            |e| equipment_row(e, color),
            |e| e.id().to_owned(),
            |e| e.to_json(),
        )
    };
    let alerts = || {
        output::render_list(
            format,
            alert_list.as_slice(),
            |a| alert_row(a, color),
            |a| a.id.clone(),
            |a| serde_json::to_value(a.as_ref()).unwrap_or_default(),
        )
    };

    match section {
        StatusSection::Sensors => sensors(),
        StatusSection::Equipment => equipment(),
        StatusSection::Alerts => alerts(),
        StatusSection::All => {
            let meta = state.meta();
            let header = format!(
                "Server version {}, last update {}",
                if meta.version.is_empty() { "-" } else { meta.version.as_str() },
                meta.last_update
                    .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            );
            Ok([
                header,
                format!("Sensors\n{}", sensors()?),
                format!("Equipment\n{}", equipment()?),
                format!("Alerts\n{}", alerts()?),
            ]
            .join("\n\n"))
        }
    }
}
