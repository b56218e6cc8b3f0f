//! Protocol constants for kennel

/// WebSocket path prefix robots connect on (`/ws/{client_id}`)
pub const ROBOT_WS_PATH: &str = "/ws";

/// Default port for the relay's HTTP/WebSocket listener
pub const DEFAULT_RELAY_PORT: u16 = 8000;

/// Maximum length of a client identifier
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// Maximum decoded frame size accepted from a robot (2 MB)
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Default liveness window: sessions silent for longer are stale
pub const DEFAULT_LIVENESS_SECS: u64 = 10;

/// Default freshness window for distance/detection readings
pub const DEFAULT_SENSOR_FRESHNESS_MS: u64 = 2000;

/// Default number of distance readings kept for dashboard charting
pub const DEFAULT_HISTORY_LEN: usize = 60;

/// Image width assumed when a detection result carries no image size
pub const DEFAULT_IMAGE_WIDTH: u32 = 640;
