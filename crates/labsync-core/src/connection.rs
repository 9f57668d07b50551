// ── Connection manager ──
//
// Owns the transport and the connection lifecycle: open, hydrate, apply
// patches, reconnect with linear backoff. All mutation of the shared
// `LabState` happens under its mutex, one reaction at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use labsync_api::{ClientMessage, Connector, Link, LinkEvent, LinkSender, ServerMessage, WsConnector};
use serde_json::Value;
use strum::Display;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::{AlertSeverity, EquipmentKinds};
use crate::store::LabState;

/// The session's single mirror, shared between the connection manager,
/// controllers and UI consumers.
pub type SharedState = Arc<Mutex<LabState>>;

/// Build an empty mirror configured for `config`.
pub fn new_shared_state(config: &SyncConfig) -> SharedState {
    let kinds = EquipmentKinds::new(config.infer_equipment_kind);
    Arc::new(Mutex::new(LabState::with_equipment_kinds(kinds)))
}

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Why a link stopped being driven.
enum LinkEnd {
    Closed,
    Manual,
    Shutdown,
}

// ── SyncClient ───────────────────────────────────────────────────────

/// Keeps a [`LabState`] synchronized with the lab server.
///
/// Cheaply cloneable. Does not connect until [`connect`](Self::connect)
/// is called; after [`shutdown`](Self::shutdown) it cannot be restarted.
pub struct SyncClient<C: Connector = WsConnector> {
    inner: Arc<SyncInner<C>>,
}

impl<C: Connector> Clone for SyncClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Snapshots applied so far, and why the most recent one failed (if it did).
#[derive(Debug, Default)]
struct HydrationProgress {
    applied: u64,
    failure: Option<String>,
}

struct SyncInner<C> {
    config: SyncConfig,
    connector: C,
    client_id: String,
    session_url: Url,
    state: SharedState,
    connection_state: watch::Sender<ConnectionState>,
    link: Mutex<Option<LinkSender>>,
    attempts: AtomicU32,
    last_message: watch::Sender<Option<DateTime<Utc>>>,
    hydration: watch::Sender<HydrationProgress>,
    manual_reconnect: Notify,
    reconnect_pending: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient<WsConnector> {
    /// WebSocket-backed client.
    pub fn new(config: SyncConfig, state: SharedState) -> Result<Self, CoreError> {
        Self::with_connector(config, WsConnector, state)
    }
}

impl<C: Connector> SyncClient<C> {
    pub fn with_connector(
        config: SyncConfig,
        connector: C,
        state: SharedState,
    ) -> Result<Self, CoreError> {
        let client_id = Uuid::new_v4().simple().to_string();
        let session_url = config
            .session_url(&client_id)
            .map_err(|e| CoreError::Config {
                message: format!("invalid server URL '{}': {e}", config.url),
            })?;
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_message, _) = watch::channel(None);
        let (hydration, _) = watch::channel(HydrationProgress::default());

        Ok(Self {
            inner: Arc::new(SyncInner {
                config,
                connector,
                client_id,
                session_url,
                state,
                connection_state,
                link: Mutex::new(None),
                attempts: AtomicU32::new(0),
                last_message,
                hydration,
                manual_reconnect: Notify::new(),
                reconnect_pending: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Generated once; reused by every reconnect of this client.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn session_url(&self) -> &Url {
        &self.inner.session_url
    }

    pub fn state(&self) -> &SharedState {
        &self.inner.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection_state.borrow()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn last_message_time(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_message.borrow()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the connection loop. Idempotent while the loop is running.
    pub async fn connect(&self) {
        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) || self.inner.cancel.is_cancelled() {
            return;
        }
        info!(url = %self.inner.session_url, "connecting to lab server");
        *task = Some(tokio::spawn(lifecycle_task(Arc::clone(&self.inner))));
    }

    /// Drop the current link (if any), reset the backoff counter and
    /// retry after a short fixed delay.
    pub async fn reconnect(&self) {
        info!("manual reconnect requested");
        self.inner.attempts.store(0, Ordering::SeqCst);
        let running = self
            .inner
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        if running {
            self.inner.reconnect_pending.store(true, Ordering::SeqCst);
            self.inner.manual_reconnect.notify_waiters();
        } else {
            self.connect().await;
        }
    }

    /// Stop the connection loop and close the transport.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.task.lock().await.take() {
            let _ = handle.await;
        }
        self.inner.mark_closed().await;
        debug!("sync client shut down");
    }

    /// Wait until at least one `initial_state` has been applied.
    ///
    /// Fails early with [`CoreError::HydrationFailed`] when a snapshot
    /// arrives but cannot be applied; the mirror is then partially
    /// populated until the next snapshot.
    pub async fn wait_for_hydration(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.inner.hydration.subscribe();
        let settled = rx.wait_for(|p| p.applied > 0 || p.failure.is_some());
        match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(progress)) => match &progress.failure {
                Some(reason) if progress.applied == 0 => Err(CoreError::HydrationFailed {
                    reason: reason.clone(),
                }),
                _ => Ok(()),
            },
            Ok(Err(_)) => Err(CoreError::NotConnected),
            Err(_) => Err(CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
                waiting_for: "initial state",
            }),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send `{type: "command", command, params}` if the transport is open.
    ///
    /// Never queued: when the link is down a warning alert is raised and
    /// the command is dropped. Must not be called with the state lock held.
    pub async fn send_command(&self, name: &str, params: Value) -> Result<(), CoreError> {
        let text = ClientMessage::command(name, params).to_text()?;
        let sender = self
            .inner
            .link
            .lock()
            .await
            .clone()
            .filter(LinkSender::is_open);

        let result = match sender {
            Some(sender) => sender.send(text).map_err(CoreError::from),
            None => Err(CoreError::NotConnected),
        };

        match &result {
            Ok(()) => debug!(command = name, "command sent"),
            Err(e) => {
                warn!(command = name, error = %e, "command not sent");
                self.inner.state.lock().await.add_alert(
                    format!("Cannot send command '{name}': {e}"),
                    AlertSeverity::Warning,
                );
            }
        }
        result
    }
}

// ── Lifecycle internals ──────────────────────────────────────────────

impl<C: Connector> SyncInner<C> {
    fn set_connection_state(&self, state: ConnectionState) {
        self.connection_state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn mark_open(&self, link: &Link) {
        *self.link.lock().await = Some(link.sender());
        self.attempts.store(0, Ordering::SeqCst);
        self.set_connection_state(ConnectionState::Connected);
        self.state.lock().await.set_connected(true);
        info!("connected to lab server");
    }

    async fn mark_closed(&self) {
        if let Some(sender) = self.link.lock().await.take() {
            sender.close();
        }
        self.set_connection_state(ConnectionState::Disconnected);
        self.state.lock().await.set_connected(false);
    }

    async fn on_transport_error(&self, reason: &str) {
        warn!(error = reason, "transport error");
        self.set_connection_state(ConnectionState::Error);
        self.state.lock().await.add_alert(
            format!("Connection error: {reason}"),
            AlertSeverity::Error,
        );
    }

    async fn on_message(&self, text: &str) {
        self.last_message.send_replace(Some(Utc::now()));

        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable frame");
                self.state
                    .lock()
                    .await
                    .add_alert(format!("Received malformed message: {e}"), AlertSeverity::Error);
                return;
            }
        };

        let mut state = self.state.lock().await;
        match message {
            ServerMessage::InitialState { data } => match state.hydrate(&data) {
                Ok(()) => {
                    self.hydration.send_modify(|p| {
                        p.applied += 1;
                        p.failure = None;
                    });
                    info!(version = %state.version(), "initial state loaded");
                }
                Err(e) => {
                    warn!(error = %e, "hydration failed");
                    self.hydration
                        .send_modify(|p| p.failure = Some(e.to_string()));
                    state.add_alert(format!("Failed to load lab state: {e}"), AlertSeverity::Error);
                }
            },
            ServerMessage::Patch { patch, version } => {
                debug!(ops = patch.len(), "applying patch");
                if let Err(e) = state.apply_server_patch(&patch, version.as_ref()) {
                    warn!(error = %e, "patch rejected");
                    state.add_alert(format!("Failed to apply update: {e}"), AlertSeverity::Error);
                }
            }
            ServerMessage::CommandError { error } => {
                state.add_alert(format!("Command failed: {error}"), AlertSeverity::Warning);
            }
            ServerMessage::Unknown => debug!("ignoring unknown message type"),
        }
    }

    /// Pump one open link until it closes or is abandoned.
    async fn drive(&self, mut link: Link) -> LinkEnd {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    link.close();
                    return LinkEnd::Shutdown;
                }
                () = self.reconnect_requested() => {
                    link.close();
                    return LinkEnd::Manual;
                }
                event = link.next_event() => match event {
                    Some(LinkEvent::Message(text)) => self.on_message(&text).await,
                    Some(LinkEvent::Error(reason)) => self.on_transport_error(&reason).await,
                    Some(LinkEvent::Closed { code, reason }) => {
                        info!(?code, reason = %reason, "connection closed");
                        return LinkEnd::Closed;
                    }
                    None => {
                        info!("transport ended");
                        return LinkEnd::Closed;
                    }
                },
            }
        }
    }

    /// Resolves once a manual reconnect is pending, consuming the request.
    async fn reconnect_requested(&self) {
        loop {
            let notified = self.manual_reconnect.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.reconnect_pending.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `delay` unless cancelled. `false` means shut down.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Decide what follows a closed link. `false` means shut down.
    async fn back_off(&self) -> bool {
        let attempt = self.attempts.load(Ordering::SeqCst) + 1;
        let reconnect = &self.config.reconnect;

        let Some(delay) = reconnect.delay_for(attempt) else {
            warn!(attempts = reconnect.max_attempts, "giving up on reconnect");
            self.state.lock().await.add_alert(
                format!(
                    "Unable to reach the lab server after {} attempts. Reconnect manually.",
                    reconnect.max_attempts
                ),
                AlertSeverity::Error,
            );
            return tokio::select! {
                () = self.cancel.cancelled() => false,
                () = self.reconnect_requested() => self.pause(reconnect.manual_delay).await,
            };
        };

        self.attempts.store(attempt, Ordering::SeqCst);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(attempt, delay_ms, "scheduling reconnect");
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
            () = self.reconnect_requested() => self.pause(reconnect.manual_delay).await,
        }
    }
}

async fn lifecycle_task<C: Connector>(inner: Arc<SyncInner<C>>) {
    loop {
        inner.set_connection_state(ConnectionState::Connecting);

        let opened = tokio::select! {
            () = inner.cancel.cancelled() => break,
            opened = inner.connector.open(&inner.session_url) => opened,
        };

        let end = match opened {
            Ok(link) => {
                // A request made while opening is satisfied by this link.
                inner.reconnect_pending.store(false, Ordering::SeqCst);
                inner.mark_open(&link).await;
                inner.drive(link).await
            }
            Err(e) => {
                inner.on_transport_error(&e.to_string()).await;
                LinkEnd::Closed
            }
        };

        inner.mark_closed().await;

        let proceed = match end {
            LinkEnd::Shutdown => false,
            LinkEnd::Manual => inner.pause(inner.config.reconnect.manual_delay).await,
            LinkEnd::Closed => inner.back_off().await,
        };
        if !proceed {
            break;
        }
    }
    debug!("connection loop exited");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::testing::{Harness, settle};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::Instant;

    fn initial_state() -> String {
        json!({
            "type": "initial_state",
            "data": {
                "version": 1,
                "sensors": { "temperature": { "value": 22.0, "unit": "C", "status": "normal" } },
                "equipment": { "pump_1": { "status": "stopped", "speed": 1000 } },
                "alerts": []
            }
        })
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn hydrates_then_applies_patches() {
        let mut h = Harness::new();
        h.client.connect().await;
        let peer = h.open_peer().await;
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Connected);

        peer.send_text(initial_state()).await;
        h.client
            .wait_for_hydration(Duration::from_secs(1))
            .await
            .unwrap();

        peer.send_text(
            json!({
                "type": "patch",
                "version": 2,
                "patch": [{ "op": "replace", "path": "/sensors/temperature/value", "value": 23.5 }]
            })
            .to_string(),
        )
        .await;
        settle().await;

        let state = h.client.state().lock().await;
        assert!((state.sensor("temperature").unwrap().value() - 23.5).abs() < f64::EPSILON);
        assert_eq!(state.version(), "2");
        assert!(state.is_connected());
        assert_eq!(state.equipment_item("pump_1").unwrap().kind(), "pump");
        drop(state);
        assert!(h.client.last_message_time().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn bad_frames_become_alerts() {
        let mut h = Harness::new();
        h.client.connect().await;
        let peer = h.open_peer().await;

        peer.send_text("{ not json").await;
        peer.send_text(
            json!({
                "type": "patch",
                "patch": [{ "op": "replace", "path": "/sensors/t/value", "value": "hot" }]
            })
            .to_string(),
        )
        .await;
        peer.send_text(json!({ "type": "command_error", "error": "Unknown command: x" }).to_string())
            .await;
        peer.send_text(json!({ "type": "heartbeat" }).to_string()).await;
        settle().await;

        let severities: Vec<_> = h.alerts().await.into_iter().map(|(s, _)| s).collect();
        // Newest first.
        assert_eq!(
            severities,
            vec![AlertSeverity::Warning, AlertSeverity::Error, AlertSeverity::Error]
        );
        assert_eq!(h.client.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn send_command_while_closed_fails_with_one_warning() {
        let h = Harness::new();
        let err = h
            .client
            .send_command("toggle_pump", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::NotConnected));
        let alerts = h.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, AlertSeverity::Warning);
        assert_eq!(h.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_command_writes_a_frame() {
        let mut h = Harness::new();
        h.client.connect().await;
        let mut peer = h.open_peer().await;
        settle().await;

        h.client
            .send_command("set_pump_speed", json!({ "speed": 1500 }))
            .await
            .unwrap();

        let frame: Value = serde_json::from_str(&peer.recv_frame().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({ "type": "command", "command": "set_pump_speed", "params": { "speed": 1500 } })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_linear_then_gives_up() {
        let mut h = Harness::new();
        h.connector.refuse.store(true, Ordering::SeqCst);
        h.client.connect().await;

        tokio::time::sleep(Duration::from_secs(120)).await;

        let opens = h.opens();
        assert_eq!(opens.len(), 6, "initial attempt plus five retries");
        let gaps: Vec<u64> = opens
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).as_secs())
            .collect();
        assert_eq!(gaps, vec![2, 4, 6, 8, 10]);
        assert_eq!(h.client.reconnect_attempts(), 5);

        let alerts = h.alerts().await;
        assert!(alerts[0].1.contains("after 5 attempts"));
        assert_eq!(alerts[0].0, AlertSeverity::Error);

        // A manual reconnect overrides the exhausted schedule.
        h.connector.refuse.store(false, Ordering::SeqCst);
        h.client.reconnect().await;
        let _peer = h.open_peer().await;
        settle().await;
        assert_eq!(h.open_count(), 7);
        assert_eq!(h.client.connection_state(), ConnectionState::Connected);
        assert_eq!(h.client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_reset_on_open_and_client_id_is_stable() {
        let mut h = Harness::new();
        h.client.connect().await;
        let peer = h.open_peer().await;
        settle().await;

        peer.close(1006, "gone").await;
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(h.client.reconnect_attempts(), 1);
        assert!(!h.client.state().lock().await.is_connected());

        let _peer = h.open_peer().await;
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Connected);
        assert_eq!(h.client.reconnect_attempts(), 0);

        let opens = h.opens();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[0].1, opens[1].1);
        assert!(opens[0].1.as_str().ends_with(h.client.client_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_replaces_the_link() {
        let mut h = Harness::new();
        h.client.connect().await;
        let first = h.open_peer().await;
        settle().await;

        let before = Instant::now();
        h.client.reconnect().await;
        let _second = h.open_peer().await;
        assert!(first.is_closed_by_client());
        assert!(Instant::now() - before < Duration::from_secs(1));
        assert_eq!(h.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_during_open_keeps_the_new_link() {
        let mut h = Harness::new();
        *h.connector.open_delay.lock().unwrap() = Some(Duration::from_secs(3));
        h.client.connect().await;
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Connecting);

        h.client.reconnect().await;
        let peer = h.open_peer().await;
        settle().await;

        assert!(!peer.is_closed_by_client());
        assert_eq!(h.client.connection_state(), ConnectionState::Connected);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_hydration_is_reported_to_waiters() {
        let mut h = Harness::new();
        let peer = h.connected().await;

        peer.send_text(
            json!({
                "type": "initial_state",
                "data": { "sensors": { "temperature": { "value": "warm" } } }
            })
            .to_string(),
        )
        .await;

        let err = h
            .client
            .wait_for_hydration(Duration::from_secs(5))
            .await
            .unwrap_err();
        let CoreError::HydrationFailed { reason } = err else {
            panic!("expected a hydration failure, got {err:?}");
        };
        assert!(reason.contains("temperature"));

        // A good snapshot afterwards clears the failure.
        peer.send_text(initial_state()).await;
        settle().await;
        h.client
            .wait_for_hydration(Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_sets_error_state() {
        let mut h = Harness::new();
        h.client.connect().await;
        let peer = h.open_peer().await;
        settle().await;

        peer.emit(LinkEvent::Error("reset by peer".into())).await;
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Error);
        assert_eq!(h.alerts().await[0].0, AlertSeverity::Error);
        // No reconnect until the close arrives.
        assert_eq!(h.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let mut h = Harness::new();
        h.client.connect().await;
        let peer = h.open_peer().await;
        settle().await;

        h.client.shutdown().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
        assert!(peer.is_closed_by_client());

        h.client.connect().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hydration_timeout() {
        let h = Harness::new();
        let err = h
            .client
            .wait_for_hydration(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { timeout_secs: 2, .. }));
    }
}
