//! Pump commands through the optimistic controller.

use std::time::Duration;

use serde_json::json;
use tracing::debug;

use labsync_core::{CommandOutcome, Entity, PumpCommand, PumpController, SyncClient};

use crate::cli::{GlobalOpts, OutputFormat, PumpAction, PumpArgs};
use crate::config::Session;
use crate::error::CliError;
use crate::output;

use super::util;

/// How long to wait for the server to echo the change back.
const CONFIRM_WAIT: Duration = Duration::from_secs(2);

pub async fn handle(session: Session, args: PumpArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = util::connect(&session).await?;
    let result = run(&client, &args, global).await;
    client.shutdown().await;
    result
}

async fn run(client: &SyncClient, args: &PumpArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = PumpController::new(client.clone(), args.id.clone());

    let outcome = match args.action {
        PumpAction::Start => controller.execute(PumpCommand::Start).await?,
        PumpAction::Stop => controller.execute(PumpCommand::Stop).await?,
        PumpAction::Toggle => controller.toggle().await?,
        PumpAction::Speed { rpm } => controller.execute(PumpCommand::SetSpeed(rpm)).await?,
    };

    // Subscribed after the optimistic write, so the next change is the
    // server's patch. A patch that lands before this point reads as
    // unconfirmed.
    let mut equipment = client.state().lock().await.subscribe_equipment();
    let confirmed = tokio::time::timeout(CONFIRM_WAIT, equipment.changed())
        .await
        .ok()
        .flatten()
        .is_some();
    debug!(equipment = %args.id, confirmed, "command round trip finished");

    let status = client
        .state()
        .lock()
        .await
        .equipment_item(&args.id)
        .map(|e| e.to_json());

    print_outcome(&outcome, confirmed, status, global)
}

fn print_outcome(
    outcome: &CommandOutcome,
    confirmed: bool,
    status: Option<serde_json::Value>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let rendered = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(
            &json!({
                "succeeded": outcome.succeeded,
                "message": outcome.message,
                "confirmed": confirmed,
                "equipment": status,
            }),
            global.output == OutputFormat::JsonCompact,
        )?,
        OutputFormat::Table | OutputFormat::Plain if confirmed => outcome.message.clone(),
        OutputFormat::Table | OutputFormat::Plain => {
            format!("{} (not yet confirmed by the server)", outcome.message)
        }
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
