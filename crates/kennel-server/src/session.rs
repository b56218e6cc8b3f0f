//! Client session: one robot's snapshot, pursuit state and command channel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kennel_core::{
    Capabilities, ClientId, Command, ControlMode, RelayError, RelayMessage, TelemetrySnapshot,
    TelemetryUpdate, DEFAULT_HISTORY_LEN,
};
use kennel_pursuit::{Mode, Observation, PursuitConfig, PursuitMachine, StepOutcome};

use crate::registry::RelayCounters;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub pursuit: PursuitConfig,
    /// Distance readings kept for charting
    pub history_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pursuit: PursuitConfig::default(),
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

/// Read-only copy of a session for dashboard queries
#[derive(Debug, Clone)]
pub struct SessionView {
    pub client_id: ClientId,
    pub telemetry: TelemetrySnapshot,
    pub mode: Mode,
    pub manual_override: bool,
    pub camera_unavailable: bool,
}

struct SessionState {
    snapshot: TelemetrySnapshot,
    machine: PursuitMachine,
    manual_override: bool,
}

/// Live state for one attached robot.
///
/// Inbound telemetry and outbound commands for a client are serialized
/// through `state`, so pursuit steps never race and commands reach the
/// robot in the order they were accepted. Dashboard reads go through the
/// `view` watch channel and never wait on that lock.
pub struct ClientSession {
    id: ClientId,
    attached_at: Instant,
    /// Milliseconds after `attached_at` of the last robot message
    last_activity_ms: AtomicU64,
    state: Mutex<SessionState>,
    view: watch::Sender<SessionView>,
    outbound: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
    counters: Arc<RelayCounters>,
    history_len: usize,
}

impl ClientSession {
    pub fn new(
        id: ClientId,
        capabilities: Capabilities,
        config: &SessionConfig,
        outbound: mpsc::Sender<RelayMessage>,
        counters: Arc<RelayCounters>,
    ) -> Self {
        let state = SessionState {
            snapshot: TelemetrySnapshot::new(capabilities),
            machine: PursuitMachine::new(config.pursuit.clone()),
            manual_override: false,
        };
        let (view, _) = watch::channel(state.view(&id));
        Self {
            id,
            attached_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            state: Mutex::new(state),
            view,
            outbound,
            cancel: CancellationToken::new(),
            counters,
            history_len: config.history_len,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Merge a telemetry update and, in autonomous mode, step the pursuit
    /// machine and forward the resulting commands.
    ///
    /// Returns the step outcome when a step ran.
    pub async fn ingest_telemetry(
        &self,
        update: TelemetryUpdate,
    ) -> Result<Option<StepOutcome>, RelayError> {
        self.ensure_open()?;
        let mut guard = self.state.lock().await;
        self.ensure_open()?;

        let now = Instant::now();
        self.touch(now);
        let observe = update.has_observation();

        let state = &mut *guard;
        state
            .snapshot
            .merge(update, now.into_std(), unix_millis(), self.history_len);
        self.counters.record_telemetry();

        if !observe || state.manual_override {
            self.publish(state);
            return Ok(None);
        }

        let snapshot = &state.snapshot;
        let observation = Observation {
            detections: snapshot.detections.as_ref(),
            distance_cm: snapshot.distance_cm.as_ref(),
            capabilities: snapshot.capabilities,
        };
        let outcome = state.machine.step(&observation, now.into_std());
        self.publish(state);

        for t in &outcome.transitions {
            info!(client = %self.id, from = %t.from, to = %t.to, "Pursuit mode changed");
        }
        if let Some(action) = outcome.action {
            debug!(client = %self.id, ?action, "Pursuit action");
            for command in action.commands() {
                self.forward(RelayMessage::Command(command)).await?;
            }
        }

        Ok(Some(outcome))
    }

    /// Record a robot's self-description (capabilities and address)
    pub async fn record_hello(
        &self,
        capabilities: Capabilities,
        ip_address: Option<String>,
    ) -> Result<(), RelayError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        let now = Instant::now();
        self.touch(now);

        let update = TelemetryUpdate {
            capabilities: Some(capabilities),
            ..Default::default()
        };
        state
            .snapshot
            .merge(update, now.into_std(), unix_millis(), self.history_len);
        if ip_address.is_some() {
            state.snapshot.ip_address = ip_address;
        }
        self.publish(&state);
        Ok(())
    }

    /// Accept a command for this robot.
    ///
    /// `mode_switch` only toggles the manual override and is not sent on.
    /// Everything else is forwarded whatever the override state, waiting
    /// for queue space when the robot is slow.
    pub async fn enqueue_command(&self, command: Command) -> Result<(), RelayError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;

        match command {
            Command::ModeSwitch(params) => {
                state.manual_override = params.mode == ControlMode::Manual;
                info!(
                    client = %self.id,
                    manual = state.manual_override,
                    "Control mode switched"
                );
                self.publish(&state);
                Ok(())
            }
            command => {
                if let Some(capability) = command.required_capability(&state.snapshot.capabilities)
                {
                    return Err(RelayError::ActuatorUnavailable {
                        client: self.id.clone(),
                        capability,
                    });
                }
                self.forward(RelayMessage::Command(command)).await
            }
        }
    }

    /// Ask the robot to describe itself
    pub async fn request_status(&self) -> Result<(), RelayError> {
        self.forward(RelayMessage::StatusRequest).await
    }

    /// Latest published view
    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Invalidate the session; in-flight and later operations fail with
    /// `UnknownClient` and the connection handler shuts down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the session is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn last_activity(&self) -> Instant {
        self.attached_at + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Open and heard from within `liveness`; attaching counts as activity
    pub fn is_healthy(&self, now: Instant, liveness: Duration) -> bool {
        !self.is_closed() && now.saturating_duration_since(self.last_activity()) <= liveness
    }

    fn touch(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.attached_at).as_millis() as u64;
        self.last_activity_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.is_closed() {
            Err(RelayError::UnknownClient(self.id.clone()))
        } else {
            Ok(())
        }
    }

    async fn forward(&self, message: RelayMessage) -> Result<(), RelayError> {
        let is_command = matches!(message, RelayMessage::Command(_));
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = self.outbound.send(message) => result.is_ok(),
        };
        if !sent {
            return Err(RelayError::UnknownClient(self.id.clone()));
        }
        if is_command {
            self.counters.record_command();
        }
        Ok(())
    }

    fn publish(&self, state: &SessionState) {
        self.view.send_replace(state.view(&self.id));
    }
}

impl SessionState {
    fn view(&self, id: &ClientId) -> SessionView {
        SessionView {
            client_id: id.clone(),
            telemetry: self.snapshot.clone(),
            mode: self.machine.mode(),
            manual_override: self.manual_override,
            camera_unavailable: !self.snapshot.capabilities.has_camera,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}


impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
