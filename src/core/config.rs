use crate::models::pose::{PoseError, PoseResult, ScoringMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Response directory scan period (file-drop transport)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// Metrics sampling / smoothing tick
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PONG_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 2_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;
pub const DEFAULT_SERVER_BOOT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 5_000;
/// Status probe every sixth heartbeat, roughly every 30s
pub const DEFAULT_STATUS_EVERY_N_HEARTBEATS: u32 = 6;
pub const DEFAULT_MAX_MISSED_PONGS: u32 = 3;

pub const DEFAULT_WS_PORT: u16 = 8765;
pub const WS_PORT_ENV: &str = "POSE_WS_PORT";
pub const DEFAULT_MODEL_PATH: &str = "pose_landmarker_full.task";

/// Which channel carries commands to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    FileDrop,
    Websocket,
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub transport: TransportKind,
    pub scoring_mode: ScoringMode,
    /// Bridge writes commands here; the worker only reads
    pub command_dir: PathBuf,
    /// Worker writes responses here; the bridge only reads
    pub response_dir: PathBuf,
    pub pid_file: PathBuf,
    pub ws_host: String,
    pub ws_port: u16,
    /// Extra directories searched for the worker before the working directory
    pub resource_dirs: Vec<PathBuf>,
    /// Sent with the init command
    pub model_path: Option<String>,
    /// JPEG quality for WebSocket detect frames (1-100)
    pub jpeg_quality: u8,
    pub poll_interval_ms: u64,
    pub sample_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub startup_grace_ms: u64,
    pub shutdown_grace_ms: u64,
    pub server_boot_delay_ms: u64,
    pub init_timeout_ms: u64,
    pub status_every_n_heartbeats: u32,
    pub max_missed_pongs: u32,
}

impl Default for Config {
    fn default() -> Self {
        let tmp = std::env::temp_dir();

        Self {
            transport: TransportKind::FileDrop,
            scoring_mode: ScoringMode::MetricsThreshold,
            command_dir: tmp.join("posture_commands"),
            response_dir: tmp.join("posture_responses"),
            pid_file: tmp.join("posture_python.pid"),
            ws_host: "127.0.0.1".to_string(),
            ws_port: DEFAULT_WS_PORT,
            resource_dirs: Vec::new(),
            model_path: Some(DEFAULT_MODEL_PATH.to_string()),
            jpeg_quality: 80,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            pong_timeout_ms: DEFAULT_PONG_TIMEOUT_MS,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            server_boot_delay_ms: DEFAULT_SERVER_BOOT_DELAY_MS,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            status_every_n_heartbeats: DEFAULT_STATUS_EVERY_N_HEARTBEATS,
            max_missed_pongs: DEFAULT_MAX_MISSED_PONGS,
        }
    }
}

impl Config {
    /// Load configuration from file, creating with defaults if it doesn't exist
    pub fn load() -> PoseResult<Self> {
        let config_path = Self::get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> PoseResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> PoseResult<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> PoseResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// `POSE_WS_PORT` overrides the configured WebSocket port
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(WS_PORT_ENV) {
            match value.parse::<u16>() {
                Ok(port) if port > 0 => self.ws_port = port,
                _ => warn!("Ignoring invalid {}={}", WS_PORT_ENV, value),
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> PoseResult<()> {
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms, 10, 10_000),
            ("sample_interval_ms", self.sample_interval_ms, 10, 10_000),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms, 100, 600_000),
            ("pong_timeout_ms", self.pong_timeout_ms, 10, 60_000),
            ("startup_grace_ms", self.startup_grace_ms, 0, 60_000),
            ("shutdown_grace_ms", self.shutdown_grace_ms, 0, 60_000),
            ("server_boot_delay_ms", self.server_boot_delay_ms, 0, 60_000),
            ("init_timeout_ms", self.init_timeout_ms, 100, 120_000),
        ];
        for (name, value, min, max) in intervals {
            if value < min || value > max {
                return Err(PoseError::InvalidConfig(format!(
                    "Invalid {}: {}. Must be between {} and {}",
                    name, value, min, max
                )));
            }
        }

        if self.pong_timeout_ms >= self.heartbeat_interval_ms {
            return Err(PoseError::InvalidConfig(format!(
                "pong_timeout_ms ({}) must be shorter than heartbeat_interval_ms ({})",
                self.pong_timeout_ms, self.heartbeat_interval_ms
            )));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PoseError::InvalidConfig(format!(
                "Invalid JPEG quality: {}. Must be between 1 and 100",
                self.jpeg_quality
            )));
        }

        if self.ws_port == 0 {
            return Err(PoseError::InvalidConfig("WebSocket port cannot be 0".to_string()));
        }

        if self.ws_host.trim().is_empty() {
            return Err(PoseError::InvalidConfig("WebSocket host cannot be empty".to_string()));
        }

        if self.command_dir == self.response_dir {
            return Err(PoseError::InvalidConfig(
                "command_dir and response_dir must differ".to_string(),
            ));
        }

        if self.status_every_n_heartbeats == 0 || self.max_missed_pongs == 0 {
            return Err(PoseError::InvalidConfig(
                "status_every_n_heartbeats and max_missed_pongs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Reset to default configuration
    pub fn reset() -> PoseResult<Self> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/", self.ws_host, self.ws_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn server_boot_delay(&self) -> Duration {
        Duration::from_millis(self.server_boot_delay_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Get the configuration file path
    fn get_config_path() -> PoseResult<PathBuf> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| PoseError::InvalidConfig("Could not determine home directory".to_string()))?;

        let mut path = PathBuf::from(home);
        path.push(".posture_bridge");
        path.push("config");
        path.push("settings.json");

        Ok(path)
    }
}
