// ── Pump controller ──

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use labsync_api::{Connector, WsConnector};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{CommandOutcome, PumpCommand};
use crate::connection::SyncClient;
use crate::error::CoreError;
use crate::model::Equipment;

/// Issues commands for one pump, at most one in flight at a time.
///
/// Cheaply cloneable; clones share the pending flag and result.
pub struct PumpController<C: Connector = WsConnector> {
    id: String,
    client: SyncClient<C>,
    shared: Arc<ControllerShared>,
}

impl<C: Connector> Clone for PumpController<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            client: self.client.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

struct ControllerShared {
    pending: AtomicBool,
    result: watch::Sender<Option<CommandOutcome>>,
    /// Bumped per command so a stale auto-clear leaves a newer result alone.
    generation: AtomicU64,
}

/// Clears the pending flag however the command ends.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What the optimistic step changed, for rollback.
struct Applied {
    previous: Arc<Equipment>,
    optimistic: Arc<Equipment>,
    speed: Option<f64>,
}

impl<C: Connector> PumpController<C> {
    pub fn new(client: SyncClient<C>, equipment_id: impl Into<String>) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            id: equipment_id.into(),
            client,
            shared: Arc::new(ControllerShared {
                pending: AtomicBool::new(false),
                result,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn equipment_id(&self) -> &str {
        &self.id
    }

    pub fn is_pending(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn last_result(&self) -> Option<CommandOutcome> {
        self.shared.result.borrow().clone()
    }

    pub fn subscribe_result(&self) -> watch::Receiver<Option<CommandOutcome>> {
        self.shared.result.subscribe()
    }

    pub async fn start(&self) -> Result<CommandOutcome, CoreError> {
        self.execute(PumpCommand::Start).await
    }

    pub async fn stop(&self) -> Result<CommandOutcome, CoreError> {
        self.execute(PumpCommand::Stop).await
    }

    /// Start if stopped, stop if running.
    pub async fn toggle(&self) -> Result<CommandOutcome, CoreError> {
        let running = self
            .client
            .state()
            .lock()
            .await
            .equipment_item(&self.id)
            .is_some_and(|e| e.is_running());
        if running { self.stop().await } else { self.start().await }
    }

    /// The requested speed is clamped into the pump's range before it is
    /// applied and sent.
    pub async fn set_speed(&self, requested: f64) -> Result<CommandOutcome, CoreError> {
        self.execute(PumpCommand::SetSpeed(requested)).await
    }

    pub async fn execute(&self, command: PumpCommand) -> Result<CommandOutcome, CoreError> {
        if self.shared.pending.swap(true, Ordering::SeqCst) {
            return Err(CoreError::CommandPending {
                id: self.id.clone(),
            });
        }
        let _pending = PendingGuard(&self.shared.pending);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.result.send_replace(None);

        let outcome = self.run(command).await;

        let message = match &outcome {
            Ok(message) => CommandOutcome::success(message.clone()),
            Err(e) => CommandOutcome::failure(format!("Failed to {}: {e}", describe(command))),
        };
        self.shared.result.send_replace(Some(message.clone()));
        self.schedule_clear(generation);

        outcome.map(|_| message)
    }

    async fn run(&self, command: PumpCommand) -> Result<String, CoreError> {
        let applied = self.apply_optimistic(command).await?;

        let params = command.params(&self.id, applied.speed);
        if let Err(e) = self.client.send_command(command.wire_name(), params).await {
            self.roll_back(&applied).await;
            return Err(e);
        }

        info!(equipment = %self.id, command = command.wire_name(), "command sent");
        Ok(match (command, applied.speed) {
            (PumpCommand::Start, _) => "Pump started".to_owned(),
            (PumpCommand::Stop, _) => "Pump stopped".to_owned(),
            (PumpCommand::SetSpeed(_), Some(speed)) => format!("Speed set to {speed} RPM"),
            (PumpCommand::SetSpeed(requested), None) => format!("Speed set to {requested} RPM"),
        })
    }

    async fn apply_optimistic(&self, command: PumpCommand) -> Result<Applied, CoreError> {
        let mut state = self.client.state().lock().await;
        let previous = state
            .equipment
            .get(&self.id)
            .ok_or_else(|| CoreError::NotFound {
                category: "equipment".into(),
                id: self.id.clone(),
            })?;

        if previous.as_pump().is_none() {
            return Err(CoreError::WrongKind {
                id: self.id.clone(),
                expected: "pump",
            });
        }
        let allowed = match command {
            PumpCommand::Start => previous.can_start(),
            PumpCommand::Stop => previous.can_stop(),
            PumpCommand::SetSpeed(_) => true,
        };
        if !allowed {
            return Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                action: describe(command),
                status: previous.status().to_string(),
            });
        }

        let speed = state
            .equipment
            .modify(&self.id, |pump| match command {
                PumpCommand::Start => {
                    pump.start();
                    None
                }
                PumpCommand::Stop => {
                    pump.stop();
                    None
                }
                PumpCommand::SetSpeed(requested) => pump.set_speed(requested),
            })
            .flatten();
        let optimistic = state
            .equipment
            .get(&self.id)
            .unwrap_or_else(|| Arc::clone(&previous));

        Ok(Applied {
            previous,
            optimistic,
            speed,
        })
    }

    /// Restore the pre-command entity unless something newer replaced the
    /// optimistic one in the meantime.
    async fn roll_back(&self, applied: &Applied) {
        let mut state = self.client.state().lock().await;
        let untouched = state
            .equipment
            .get(&self.id)
            .is_some_and(|current| Arc::ptr_eq(&current, &applied.optimistic));
        if untouched {
            debug!(equipment = %self.id, "rolling back optimistic update");
            state.equipment.set(Arc::clone(&applied.previous));
        }
    }

    fn schedule_clear(&self, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let ttl = self.client.config().result_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if shared.generation.load(Ordering::SeqCst) == generation {
                shared.result.send_replace(None);
            }
        });
    }
}

fn describe(command: PumpCommand) -> &'static str {
    match command {
        PumpCommand::Start => "start pump",
        PumpCommand::Stop => "stop pump",
        PumpCommand::SetSpeed(_) => "set pump speed",
    }
}

// ── Tests ────────────────────────────────────────────────────────────
