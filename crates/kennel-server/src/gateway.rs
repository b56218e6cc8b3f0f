//! Relay gateway: wire-level entry points onto the registry and sessions

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use kennel_core::{
    Capabilities, ClientId, CommandKind, DashboardCommand, RelayError, RelayMessage,
    TelemetryUpdate,
};
use kennel_pursuit::StepOutcome;

use crate::config::RelayConfig;
use crate::registry::{Registry, RelayStats};
use crate::session::{ClientSession, SessionView};

/// What a robot connection handler holds for its lifetime
pub struct RobotLink {
    pub session: Arc<ClientSession>,
    /// Pass back to [`RelayGateway::on_robot_disconnect`]
    pub generation: u64,
    /// Messages to write to the robot, in order
    pub outbound: mpsc::Receiver<RelayMessage>,
}

#[derive(Clone)]
pub struct RelayGateway {
    registry: Registry,
    config: Arc<RelayConfig>,
}

impl RelayGateway {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Registry::new(config.liveness),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> RelayStats {
        self.registry.stats()
    }

    /// Attach a robot, replacing a stale session under the same id.
    ///
    /// The robot is asked for a status report straight away so its
    /// capabilities are known before the first telemetry arrives.
    pub async fn on_robot_connect(
        &self,
        id: ClientId,
        capabilities: Capabilities,
    ) -> Result<RobotLink, RelayError> {
        let (tx, outbound) = mpsc::channel(self.config.command_buffer.max(1));
        let session = Arc::new(ClientSession::new(
            id.clone(),
            capabilities,
            &self.config.session,
            tx,
            self.registry.counters(),
        ));
        let generation = self.registry.register(id, Arc::clone(&session)).await?;

        if let Err(e) = session.request_status().await {
            debug!(client = %session.id(), error = %e, "Status request not queued");
        }

        Ok(RobotLink {
            session,
            generation,
            outbound,
        })
    }

    pub async fn on_robot_hello(
        &self,
        id: &ClientId,
        capabilities: Capabilities,
        ip_address: Option<String>,
    ) -> Result<(), RelayError> {
        info!(
            client = %id,
            camera = capabilities.has_camera,
            distance = capabilities.has_distance_sensor,
            imu = capabilities.has_imu,
            rgb = capabilities.has_rgb,
            ip = ip_address.as_deref().unwrap_or("-"),
            "Robot hello"
        );
        self.registry
            .lookup(id)
            .await?
            .record_hello(capabilities, ip_address)
            .await
    }

    pub async fn on_robot_telemetry(
        &self,
        id: &ClientId,
        update: TelemetryUpdate,
    ) -> Result<Option<StepOutcome>, RelayError> {
        self.registry.lookup(id).await?.ingest_telemetry(update).await
    }

    /// Detach a robot connection; a no-op if a newer connection took over
    pub async fn on_robot_disconnect(&self, id: &ClientId, generation: u64) -> bool {
        self.registry.unregister_generation(id, generation).await
    }

    pub async fn on_dashboard_list_clients(&self) -> Vec<ClientId> {
        self.registry.list_active().await
    }

    pub async fn on_dashboard_get_snapshot(&self, id: &ClientId) -> Result<SessionView, RelayError> {
        Ok(self.registry.lookup(id).await?.snapshot())
    }

    pub async fn on_dashboard_send_command(
        &self,
        id: &ClientId,
        request: DashboardCommand,
    ) -> Result<CommandKind, RelayError> {
        if let Some(body_id) = request.client_id.as_deref().filter(|s| !s.is_empty()) {
            if body_id != id.as_str() {
                return Err(RelayError::MalformedMessage(format!(
                    "body client_id {} does not match path client {}",
                    body_id, id
                )));
            }
        }
        let command = request.into_command()?;
        let kind = command.kind();
        self.registry.lookup(id).await?.enqueue_command(command).await?;
        info!(client = %id, command = %kind, "Dashboard command accepted");
        Ok(kind)
    }

    /// Evict sessions silent beyond the liveness window
    pub async fn sweep(&self) -> Vec<ClientId> {
        self.registry.sweep_stale().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kennel_core::Command;

    fn id(s: &str) -> ClientId {
        ClientId::new(s).unwrap()
    }

    fn dashboard(command_type: &str, data: serde_json::Value) -> DashboardCommand {
        DashboardCommand {
            client_id: None,
            command_type: command_type.into(),
            data,
        }
    }

    #[tokio::test]
    async fn connect_queues_status_request() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let mut link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        assert_eq!(link.outbound.recv().await, Some(RelayMessage::StatusRequest));
        assert_eq!(gateway.stats().commands_forwarded, 0);
    }

    #[tokio::test]
    async fn second_live_connection_is_duplicate() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let _link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        let err = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err, RelayError::DuplicateId(id("rpi-1")));
    }

    #[tokio::test]
    async fn operations_on_unknown_client_fail() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let unknown = id("ghost");

        assert_eq!(
            gateway.on_dashboard_get_snapshot(&unknown).await.unwrap_err(),
            RelayError::UnknownClient(unknown.clone())
        );
        assert_eq!(
            gateway
                .on_dashboard_send_command(&unknown, dashboard("posture", serde_json::json!({"action": "sit"})))
                .await
                .unwrap_err(),
            RelayError::UnknownClient(unknown.clone())
        );
        assert!(gateway
            .on_robot_telemetry(&unknown, TelemetryUpdate::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn hello_updates_capabilities() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let _link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        gateway
            .on_robot_hello(&id("rpi-1"), Capabilities::full(), Some("10.0.0.7".into()))
            .await
            .unwrap();

        let view = gateway.on_dashboard_get_snapshot(&id("rpi-1")).await.unwrap();
        assert_eq!(view.telemetry.capabilities, Capabilities::full());
        assert_eq!(view.telemetry.ip_address.as_deref(), Some("10.0.0.7"));
        assert!(!view.camera_unavailable);
    }

    #[tokio::test]
    async fn dashboard_command_reaches_robot() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let mut link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        link.outbound.recv().await;

        let kind = gateway
            .on_dashboard_send_command(
                &id("rpi-1"),
                dashboard("sound", serde_json::json!({"sound": "bark", "volume": 70})),
            )
            .await
            .unwrap();
        assert_eq!(kind, CommandKind::Sound);
        assert!(matches!(
            link.outbound.recv().await,
            Some(RelayMessage::Command(Command::Sound(p))) if p.volume == 70
        ));
    }

    #[tokio::test]
    async fn mismatched_body_id_is_malformed() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let _link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        let mut request = dashboard("posture", serde_json::json!({"action": "stand"}));
        request.client_id = Some("rpi-2".into());

        let err = gateway
            .on_dashboard_send_command(&id("rpi-1"), request)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn disconnect_invalidates_session() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        assert!(gateway.on_robot_disconnect(&id("rpi-1"), link.generation).await);
        assert!(link.session.is_closed());
        assert!(gateway.on_dashboard_list_clients().await.is_empty());
    }

    #[tokio::test]
    async fn zero_command_buffer_still_connects() {
        let gateway = RelayGateway::new(RelayConfig {
            command_buffer: 0,
            ..RelayConfig::default()
        });
        let mut link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        assert_eq!(link.outbound.recv().await, Some(RelayMessage::StatusRequest));
    }

    #[tokio::test]
    async fn released_generation_frees_the_id() {
        let gateway = RelayGateway::new(RelayConfig::default());
        let abandoned = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        // a handshake that never completed hands its generation back
        abandoned.session.close();
        assert!(gateway.on_robot_disconnect(&id("rpi-1"), abandoned.generation).await);

        let link = gateway
            .on_robot_connect(id("rpi-1"), Capabilities::default())
            .await
            .unwrap();
        assert_ne!(link.generation, abandoned.generation);
        assert_eq!(gateway.on_dashboard_list_clients().await, vec![id("rpi-1")]);
    }
}
