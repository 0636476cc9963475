use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use snafu::Snafu;
use snafu::prelude::*;

use crate::sensor::{SensorCapability, SensorKind, SimulationBounds};

/// Longest accepted update interval or retry delay, in seconds
pub const MAX_DELAY_SECS: u64 = u32::MAX as u64;
/// MQTT encodes the keep alive interval in 16 bits
pub const MAX_KEEP_ALIVE_SECS: u64 = u16::MAX as u64;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Config file not found: {}", path.display()))]
    NotFound { path: PathBuf },

    #[snafu(display("Cannot open config file {}: {source}", path.display()))]
    Read { path: PathBuf, source: io::Error },

    #[snafu(display("Error when parsing config file: {source}"))]
    Parse { source: serde_yaml::Error },

    #[snafu(display("Invalid config: {reason}"))]
    Invalid { reason: String },
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub device: DeviceConfig,
    pub sensors: Vec<SensorConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    /// Keep alive interval in seconds
    pub keep_alive: u64,
    /// Delay between connection attempts in seconds
    pub retry_delay: u64,
    pub payload_format: PayloadFormat,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            keep_alive: 60,
            retry_delay: 5,
            payload_format: PayloadFormat::default(),
        }
    }
}

impl MqttConfig {
    pub fn server_uri(&self) -> String {
        format!("tcp://{}:{}", self.broker, self.port)
    }

    /// Username and password, if a non-empty username is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => {
                Some((user, self.password.as_deref().unwrap_or("")))
            }
            _ => None,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive)
    }
}

/// Shape of the state topic payload
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub enum PayloadFormat {
    /// Bare numeric value, e.g. `21.5`
    #[serde(rename = "bare")]
    #[default]
    Bare,
    /// JSON object carrying the sensor id, the value, its unit and a timestamp
    #[serde(rename = "envelope")]
    Envelope,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SensorConfig {
    #[serde(rename = "type")]
    pub kind: SensorKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between two readings
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub temperature_noise: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
    pub humidity_noise: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

fn default_update_interval() -> u64 {
    300
}

impl SensorConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    pub fn capabilities(&self) -> &'static [SensorCapability] {
        self.kind.capabilities()
    }

    pub fn bounds(&self, capability: SensorCapability) -> SimulationBounds {
        let (min, max, noise) = match capability {
            SensorCapability::Temperature => (
                self.temperature_min,
                self.temperature_max,
                self.temperature_noise,
            ),
            SensorCapability::Humidity => (
                self.humidity_min,
                self.humidity_max,
                self.humidity_noise,
            ),
        };
        let default = SimulationBounds::default_for(capability);
        SimulationBounds {
            min: min.unwrap_or(default.min),
            max: max.unwrap_or(default.max),
            noise: noise.unwrap_or(default.noise),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound { path: path.to_path_buf() },
            _ => ConfigError::Read { path: path.to_path_buf(), source: e },
        })?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_reader(reader)
            .context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn enabled_sensors(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|s| s.enabled)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.device.name.trim().is_empty(),
            InvalidSnafu { reason: "device name is empty" }
        );
        ensure!(
            self.mqtt.retry_delay > 0 && self.mqtt.retry_delay <= MAX_DELAY_SECS,
            InvalidSnafu {
                reason: format!("mqtt retry_delay must be between 1 and {MAX_DELAY_SECS} seconds")
            }
        );
        ensure!(
            self.mqtt.keep_alive <= MAX_KEEP_ALIVE_SECS,
            InvalidSnafu {
                reason: format!("mqtt keep_alive must not exceed {MAX_KEEP_ALIVE_SECS} seconds")
            }
        );

        let mut seen = HashSet::new();
        for sensor in self.enabled_sensors() {
            let kind = sensor.kind.as_str();
            ensure!(
                sensor.update_interval > 0 && sensor.update_interval <= MAX_DELAY_SECS,
                InvalidSnafu {
                    reason: format!("'{kind}' update_interval must be 1..={MAX_DELAY_SECS} seconds")
                }
            );
            for &capability in sensor.capabilities() {
                let cap = capability.as_str();
                ensure!(
                    seen.insert(capability),
                    InvalidSnafu { reason: format!("{cap} is provided by more than one sensor") }
                );
                let bounds = sensor.bounds(capability);
                ensure!(
                    bounds.min.is_finite() && bounds.max.is_finite() && bounds.noise.is_finite(),
                    InvalidSnafu { reason: format!("{cap} bounds must be finite numbers") }
                );
                ensure!(
                    bounds.min <= bounds.max,
                    InvalidSnafu {
                        reason: format!(
                            "{cap}_min {} is greater than {cap}_max {}", bounds.min, bounds.max
                        )
                    }
                );
                ensure!(
                    bounds.noise >= 0.0,
                    InvalidSnafu { reason: format!("{cap}_noise must not be negative") }
                );
                // Sampling needs the widths and the jittered extremes to stay finite
                ensure!(
                    (bounds.max - bounds.min).is_finite()
                        && (2.0 * bounds.noise).is_finite()
                        && (bounds.min - bounds.noise).is_finite()
                        && (bounds.max + bounds.noise).is_finite(),
                    InvalidSnafu { reason: format!("{cap} bounds are too large") }
                );
            }
        }
        ensure!(!seen.is_empty(), InvalidSnafu { reason: "no enabled sensors" });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::sensor::{SensorCapability, SensorKind};
    use super::{Config, ConfigError, PayloadFormat};

    const FULL_CONFIG: &str = "
mqtt:
  broker: test.mosquitto.org
  port: 1884
  username: test_user
  password: test_pass
  payload_format: envelope
device:
  name: Test Sensor
sensors:
  - type: dht22
    update_interval: 60
    GPIO_pin_RPI: 4
    temperature_min: 18.5
    temperature_max: 24.0
    temperature_noise: 0.25
";

    #[test]
    fn test_load_full_config() {
        let config = Config::from_reader(FULL_CONFIG.as_bytes()).unwrap();
        assert_eq!(config.mqtt.server_uri(), "tcp://test.mosquitto.org:1884");
        assert_eq!(config.mqtt.credentials(), Some(("test_user", "test_pass")));
        assert_eq!(config.mqtt.payload_format, PayloadFormat::Envelope);
        assert_eq!(config.device.name, "Test Sensor");

        let sensor = &config.sensors[0];
        assert_eq!(sensor.kind, SensorKind::Dht22);
        assert_eq!(sensor.update_interval, 60);
        let temperature = sensor.bounds(SensorCapability::Temperature);
        assert_eq!((temperature.min, temperature.max, temperature.noise), (18.5, 24.0, 0.25));
        let humidity = sensor.bounds(SensorCapability::Humidity);
        assert_eq!((humidity.min, humidity.max, humidity.noise), (40.0, 60.0, 0.0));
    }

    #[test]
    fn test_load_config_defaults() {
        let config = Config::from_reader(
            "device:\n  name: Porch\nsensors:\n  - type: humidity\n".as_bytes()
        ).unwrap();
        assert_eq!(config.mqtt.server_uri(), "tcp://localhost:1883");
        assert_eq!(config.mqtt.credentials(), None);
        assert_eq!(config.mqtt.retry_delay, 5);
        assert_eq!(config.mqtt.payload_format, PayloadFormat::Bare);
        assert!(config.sensors[0].enabled);
        assert_eq!(config.sensors[0].update_interval, 300);
        assert_eq!(config.sensors[0].bounds(SensorCapability::Humidity).noise, 0.0);
    }

    #[test]
    fn test_empty_username_disables_auth() {
        let config = Config::from_reader(
            "mqtt:\n  username: ''\n  password: x\ndevice:\n  name: a\nsensors:\n  - type: temperature\n"
                .as_bytes()
        ).unwrap();
        assert_eq!(config.mqtt.credentials(), None);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = Config::load(Path::new("/nonexistent/sensor2mqtt/config.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let err = Config::from_reader("invalid: yaml: content: [".as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_config_unknown_sensor_type() {
        let err = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: barometer\n".as_bytes()
        ).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: temperature\n    temperature_min: 30\n    temperature_max: 10\n"
                .as_bytes()
        ).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let err = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: dht11\n  - type: humidity\n".as_bytes()
        ).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_disabled_sensors_are_ignored() {
        let config = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: dht11\n    enabled: false\n  - type: humidity\n"
                .as_bytes()
        ).unwrap();
        let kinds = config.enabled_sensors().map(|s| s.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![SensorKind::Humidity]);
    }

    #[test]
    fn test_no_enabled_sensors_rejected() {
        let err = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: dht11\n    enabled: false\n".as_bytes()
        ).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_huge_update_interval_rejected() {
        let err = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: humidity\n    update_interval: 18446744073709551615\n"
                .as_bytes()
        ).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_huge_retry_delay_and_keep_alive_rejected() {
        for mqtt in ["retry_delay: 18446744073709551615", "keep_alive: 65536"] {
            let yaml = format!("mqtt:\n  {mqtt}\ndevice:\n  name: a\nsensors:\n  - type: humidity\n");
            let err = Config::from_reader(yaml.as_bytes()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{mqtt} accepted");
        }
    }

    #[test]
    fn test_overflowing_bounds_rejected() {
        for bounds in [
            "temperature_min: -1.0e308\n    temperature_max: 1.0e308",
            "temperature_noise: 1.0e308",
            "temperature_max: 1.0e308\n    temperature_noise: 1.0e308",
        ] {
            let yaml = format!("device:\n  name: a\nsensors:\n  - type: temperature\n    {bounds}\n");
            let err = Config::from_reader(yaml.as_bytes()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{bounds} accepted");
        }
    }

    #[test]
    fn test_negative_temperature_bounds_accepted() {
        let config = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: temperature\n    temperature_min: -20\n    temperature_max: -5\n"
                .as_bytes()
        ).unwrap();
        let bounds = config.sensors[0].bounds(SensorCapability::Temperature);
        assert_eq!((bounds.min, bounds.max), (-20.0, -5.0));
    }

    #[test]
    fn test_zero_update_interval_rejected() {
        let err = Config::from_reader(
            "device:\n  name: a\nsensors:\n  - type: humidity\n    update_interval: 0\n".as_bytes()
        ).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
