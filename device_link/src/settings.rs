use std::{env, fs, path::Path, time::Duration};

use common::physical::Rgb;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    dispatcher::{Backoff, DispatcherConfig},
    models::endpoint::DeviceEndpoint,
};

/// Environment variable naming a settings file to load instead of the
/// embedded defaults.
pub const CONFIG_ENV: &str = "DEVICE_LINK_CONFIG";

const DEFAULT_SETTINGS: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../",
    "configs/default.toml"
));

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file. Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings. Error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_cap_ms: u64,
    #[serde(default)]
    pub retry_decode_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poller {
    pub water_interval_ms: u64,
    pub motion_interval_ms: u64,
    pub gas_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Light {
    pub default_color: [u8; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub device: Device,
    pub link: Link,
    pub poller: Poller,
    pub light: Light,
}

impl Settings {
    /// Load from the file named by `DEVICE_LINK_CONFIG`, or the embedded
    /// `configs/default.toml` when unset.
    pub fn new() -> Result<Self, SettingsError> {
        match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(path),
            Err(_) => Self::from_toml(DEFAULT_SETTINGS),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.device.host.is_empty() {
            return Err(SettingsError::Invalid("device host is empty".into()));
        }
        if self.device.port == 0 {
            return Err(SettingsError::Invalid("device port must be non-zero".into()));
        }
        if self.link.max_retries == 0 {
            return Err(SettingsError::Invalid("max_retries must be at least 1".into()));
        }
        if self.link.backoff_cap_ms < self.link.backoff_initial_ms {
            return Err(SettingsError::Invalid(
                "backoff_cap_ms is below backoff_initial_ms".into(),
            ));
        }

        let intervals = [
            ("connect_timeout_ms", Some(self.link.connect_timeout_ms)),
            ("read_timeout_ms", Some(self.link.read_timeout_ms)),
            ("water_interval_ms", Some(self.poller.water_interval_ms)),
            ("motion_interval_ms", Some(self.poller.motion_interval_ms)),
            ("gas_interval_ms", self.poller.gas_interval_ms),
        ];
        for (name, value) in intervals {
            if value == Some(0) {
                return Err(SettingsError::Invalid(format!("{} must be above 0", name)));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.device.host.clone(), self.device.port)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.link.read_timeout_ms),
            max_retries: self.link.max_retries,
            backoff: Backoff {
                initial: Duration::from_millis(self.link.backoff_initial_ms),
                cap: Duration::from_millis(self.link.backoff_cap_ms),
            },
            retry_decode_errors: self.link.retry_decode_errors,
        }
    }

    pub fn default_color(&self) -> Rgb {
        let [r, g, b] = self.light.default_color;
        Rgb::new(r, g, b)
    }
}
