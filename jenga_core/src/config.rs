use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use bevy::prelude::Resource;
use jenga_protocol::{DEFAULT_COMMAND_PORT, DEFAULT_EVENT_PORT};
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_TOWER_CONFIG: &str = include_str!("data/tower_config.json");
pub const CONFIG_PATH_ENV: &str = "JENGA_CONFIG_PATH";

/// Global configuration for the headless tower simulation and its sockets.
#[derive(Resource, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TowerConfig {
    pub levels: u32,
    pub command_bind: SocketAddr,
    pub event_target: SocketAddr,
    pub tick_interval_ms: u64,
    /// Orientation samples are taken once every this many ticks.
    pub tilt_sample_interval: u32,
    pub fall_detect_distance: f32,
    /// Upper bound a connection thread waits for a query answered on the
    /// simulation thread.
    pub query_timeout_ms: u64,
    pub block: BlockGeometry,
    pub physics: PhysicsDefaults,
    pub screenshot: ScreenshotDefaults,
    pub listener: ListenerTimings,
    pub dispatch: DispatchPolicy,
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            levels: 18,
            command_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_COMMAND_PORT),
            event_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_EVENT_PORT),
            tick_interval_ms: 20,
            tilt_sample_interval: 10,
            fall_detect_distance: 1.5,
            query_timeout_ms: 2000,
            block: BlockGeometry::default(),
            physics: PhysicsDefaults::default(),
            screenshot: ScreenshotDefaults::default(),
            listener: ListenerTimings::default(),
            dispatch: DispatchPolicy::default(),
        }
    }
}

impl TowerConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_TOWER_CONFIG).expect("builtin tower config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, TowerConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| TowerConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = TowerConfig::from_json_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TowerConfigError> {
        if self.levels == 0 {
            return Err(TowerConfigError::Invalid("levels must be at least 1"));
        }
        if self.tilt_sample_interval == 0 {
            return Err(TowerConfigError::Invalid(
                "tilt_sample_interval must be at least 1",
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(TowerConfigError::Invalid(
                "dispatch.max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum TowerConfigError {
    #[error("failed to parse tower config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read tower config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid tower config: {0}")]
    Invalid(&'static str),
}

/// Block dimensions used when laying out a fresh tower.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BlockGeometry {
    pub length: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for BlockGeometry {
    fn default() -> Self {
        Self {
            length: 3.0,
            width: 1.0,
            height: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PhysicsDefaults {
    pub time_scale: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
}

impl Default for PhysicsDefaults {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            static_friction: 0.6,
            dynamic_friction: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScreenshotDefaults {
    pub width: u32,
    pub height: u32,
    /// Fraction of the render target covered by the capture camera's viewport.
    pub viewport_width: f32,
}

impl Default for ScreenshotDefaults {
    fn default() -> Self {
        Self {
            width: 128,
            height: 72,
            viewport_width: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ListenerTimings {
    pub accept_idle_ms: u64,
    pub read_poll_ms: u64,
    pub shutdown_wait_ms: u64,
}

impl Default for ListenerTimings {
    fn default() -> Self {
        Self {
            accept_idle_ms: 50,
            read_poll_ms: 100,
            shutdown_wait_ms: 2000,
        }
    }
}

impl ListenerTimings {
    pub fn accept_idle(&self) -> Duration {
        Duration::from_millis(self.accept_idle_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms.max(1))
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }
}

/// Retry policy for pushed events.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 500,
            connect_timeout_ms: 1000,
            reply_timeout_ms: 250,
        }
    }
}

impl DispatchPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms.max(1))
    }
}

/// Resolve the active config: the file named by `JENGA_CONFIG_PATH` when set
/// and readable, otherwise the builtin document.
pub fn load_tower_config_from_env() -> (TowerConfig, Option<PathBuf>) {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from) {
        match TowerConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "jenga::config",
                    path = %path.display(),
                    "tower_config.loaded=file"
                );
                return (config, Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "jenga::config",
                    path = %path.display(),
                    error = %err,
                    "tower_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "jenga::config", "tower_config.loaded=builtin");
    (TowerConfig::builtin(), None)
}
