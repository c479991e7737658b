use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(String),
    #[error("failed to parse config file: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mate: MateConfig,
    #[serde(default)]
    pub navigator: NavigatorConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MateConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigatorConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    /// 0 means retry forever without entering listener mode early.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            max_reconnect_attempts: 0,
        }
    }
}

impl NavigatorConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default)]
    pub enabled: MonitoringEnabled,
}

impl MonitoringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitoringEnabled {
    #[serde(default)]
    pub cpu: bool,
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub disk: bool,
    #[serde(default)]
    pub temperature: bool,
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub gpu: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HardwareConfig {
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub temperature: TemperatureConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CpuConfig {
    #[serde(default)]
    pub collect_per_core: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub include_swap: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiskConfig {
    /// Empty means every mounted filesystem.
    #[serde(default)]
    pub mount_points: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TemperatureConfig {
    /// Empty means every sensor.
    #[serde(default)]
    pub sensors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NetworkConfig {
    /// Empty means every interface.
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Empty means stdout only.
    #[serde(default)]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Read(err.to_string()))?;
        let config: Config =
            serde_yaml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mate.id.trim().is_empty() {
            return Err(ConfigError::Invalid("mate.id is required".to_string()));
        }
        if self.navigator.url.trim().is_empty() {
            return Err(ConfigError::Invalid("navigator.url is required".to_string()));
        }
        if self.monitoring.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
