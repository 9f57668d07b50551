//! Live view: print every entity change, alert and connection transition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::time::Instant;

use labsync_core::{Alert, ConnectionState, Entity, Equipment, Sensor, SyncClient};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Session;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Change tracking ─────────────────────────────────────────────────

/// Remembers the last `last_updated` printed per entity id.
#[derive(Debug, Default)]
struct Tracker {
    seen: HashMap<String, DateTime<Utc>>,
}

impl Tracker {
    /// Entities that changed since the previous call, and ids that vanished.
    fn diff<T: Entity>(&mut self, list: &[Arc<T>]) -> (Vec<Arc<T>>, Vec<String>) {
        let mut changed = Vec::new();
        let mut present = HashSet::with_capacity(list.len());
        for entity in list {
            present.insert(entity.id());
            if self.seen.get(entity.id()) != Some(&entity.last_updated()) {
                self.seen.insert(entity.id().to_owned(), entity.last_updated());
                changed.push(Arc::clone(entity));
            }
        }
        let mut removed: Vec<String> = self
            .seen
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        removed.sort();
        for id in &removed {
            self.seen.remove(id);
        }
        (changed, removed)
    }
}

/// Alerts not printed yet, oldest first.
fn fresh_alerts(seen: &mut HashSet<String>, list: &[Arc<Alert>]) -> Vec<Arc<Alert>> {
    let fresh: Vec<_> = list
        .iter()
        .rev()
        .filter(|a| !seen.contains(&a.id))
        .cloned()
        .collect();
    seen.clear();
    seen.extend(list.iter().map(|a| a.id.clone()));
    fresh
}

// ── Printing ────────────────────────────────────────────────────────

struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    fn new(global: &GlobalOpts) -> Self {
        Self {
            format: global.output,
            color: output::should_color(global.color),
            quiet: global.quiet,
        }
    }

    fn emit(&self, event: &str, text: &str, data: Value) -> Result<(), CliError> {
        let line = match self.format {
            OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(
                &json!({ "event": event, "at": Utc::now(), "data": data }),
                true,
            )?,
            OutputFormat::Table | OutputFormat::Plain => {
                format!("[{}] {text}", Utc::now().format("%H:%M:%S"))
            }
        };
        output::print_output(&line, self.quiet);
        Ok(())
    }

    fn sensor(&self, s: &Sensor) -> Result<(), CliError> {
        let text = format!(
            "sensor {} = {} {} ({})",
            s.id(),
            util::format_number(s.value()),
            s.unit(),
            output::paint_sensor_status(s.status(), self.color)
        );
        self.emit("sensor", &text, s.to_json())
    }

    fn equipment(&self, e: &Equipment) -> Result<(), CliError> {
        let mut text = format!(
            "{} {} is {}",
            e.kind(),
            e.id(),
            output::paint_equipment_status(e.status(), self.color)
        );
        if let Some(pump) = e.as_pump() {
            text.push_str(&format!(" at {} RPM", util::format_number(pump.speed())));
        }
        self.emit("equipment", &text, e.to_json())
    }

    fn removed(&self, category: &str, id: &str) -> Result<(), CliError> {
        self.emit(
            "removed",
            &format!("{category} {id} removed"),
            json!({ "category": category, "id": id }),
        )
    }

    fn alert(&self, a: &Alert) -> Result<(), CliError> {
        let text = format!(
            "{}: {}",
            output::paint_severity(a.severity, self.color),
            a.message
        );
        self.emit("alert", &text, serde_json::to_value(a)?)
    }

    fn connection(&self, state: ConnectionState, attempts: u32) -> Result<(), CliError> {
        let text = if attempts > 0 && state != ConnectionState::Connected {
            format!("connection {state} (attempt {attempts})")
        } else {
            format!("connection {state}")
        };
        self.emit(
            "connection",
            &text,
            json!({ "state": state.to_string(), "attempts": attempts }),
        )
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: Session, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = util::connect(&session).await?;
    let result = run(&client, &args, &Printer::new(global)).await;
    client.shutdown().await;
    result
}

async fn run(client: &SyncClient, args: &WatchArgs, printer: &Printer) -> Result<(), CliError> {
    let (mut sensors, mut equipment, mut alerts) = {
        let state = client.state().lock().await;
        (
            state.subscribe_sensors(),
            state.subscribe_equipment(),
            state.subscribe_alerts(),
        )
    };
    let mut connection = client.subscribe_connection_state();

    let mut sensor_tracker = Tracker::default();
    let mut equipment_tracker = Tracker::default();
    let mut alert_ids = HashSet::new();

    // Initial picture, then deltas only.
    if !args.alerts_only {
        for s in sensor_tracker.diff(sensors.current().as_slice()).0 {
            printer.sensor(&s)?;
        }
        for e in equipment_tracker.diff(equipment.current().as_slice()).0 {
            printer.equipment(&e)?;
        }
    }
    let initial = Arc::clone(&alerts.borrow_and_update());
    for a in fresh_alerts(&mut alert_ids, &initial) {
        printer.alert(&a)?;
    }

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            () = &mut expired => break,

            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                printer.connection(state, client.reconnect_attempts())?;
            }

            Some(list) = sensors.changed(), if !args.alerts_only => {
                let (changed, removed) = sensor_tracker.diff(list.as_slice());
                for s in changed {
                    printer.sensor(&s)?;
                }
                for id in removed {
                    printer.removed("sensors", &id)?;
                }
            }

            Some(list) = equipment.changed(), if !args.alerts_only => {
                let (changed, removed) = equipment_tracker.diff(list.as_slice());
                for e in changed {
                    printer.equipment(&e)?;
                }
                for id in removed {
                    printer.removed("equipment", &id)?;
                }
            }

            changed = alerts.changed() => {
                if changed.is_err() {
                    break;
                }
                let list = Arc::clone(&alerts.borrow_and_update());
                for a in fresh_alerts(&mut alert_ids, &list) {
                    printer.alert(&a)?;
                }
            }
        }
    }
    tracing::debug!("watch finished");
    Ok(())
}
