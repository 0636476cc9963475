//! Home Assistant MQTT Discovery topics and payloads.
//!
//! Topic layout:
//! - discovery: `homeassistant/sensor/{device_id}_{sensor_type}/config`
//! - state: `homeassistant/sensor/{device_id}/{sensor_type}/state`

use serde::Serialize;

use crate::config::{DeviceConfig, PayloadFormat};
use crate::sensor::{Reading, SensorCapability};

pub const DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_MANUFACTURER: &str = "Custom";

/// Device name together with the slug used to namespace topics and ids
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    name: String,
    id: String,
    manufacturer: String,
    model: Option<String>,
}

impl DeviceIdentity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: device_id(name),
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            model: None,
        }
    }

    pub fn from_config(cfg: &DeviceConfig) -> Self {
        let mut identity = Self::new(&cfg.name);
        if let Some(manufacturer) = &cfg.manufacturer {
            identity.manufacturer = manufacturer.clone();
        }
        identity.model = cfg.model.clone();
        identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn model_for(&self, capability: SensorCapability) -> String {
        self.model.clone()
            .unwrap_or_else(|| format!("{} Sensor", capability.as_str()))
    }
}

/// Lowercase the name and replace spaces with underscores
pub fn device_id(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

pub fn config_topic(device_id: &str, capability: SensorCapability) -> String {
    format!("{DISCOVERY_PREFIX}/sensor/{device_id}_{}/config", capability.as_str())
}

pub fn state_topic(device_id: &str, capability: SensorCapability) -> String {
    format!("{DISCOVERY_PREFIX}/sensor/{device_id}/{}/state", capability.as_str())
}

pub fn unique_id(device_id: &str, capability: SensorCapability) -> String {
    format!("{device_id}_{}", capability.as_str())
}

// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
    pub name: String,
    pub state_topic: String,
    pub unique_id: String,
    pub unit_of_measurement: String,
    pub device_class: String,
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

/// Everything needed to register one capability of a device
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryDescriptor {
    pub config_topic: String,
    pub payload: Discovery,
}

impl DiscoveryDescriptor {
    pub fn new(identity: &DeviceIdentity, capability: SensorCapability) -> Self {
        let id = identity.id();
        Self {
            config_topic: config_topic(id, capability),
            payload: Discovery {
                name: format!("{} {}", identity.name(), capability.human_name()),
                state_topic: state_topic(id, capability),
                unique_id: unique_id(id, capability),
                unit_of_measurement: capability.unit().to_string(),
                device_class: capability.device_class().to_string(),
                device: Device {
                    identifiers: vec![id.to_string()],
                    name: identity.name().to_string(),
                    manufacturer: identity.manufacturer.clone(),
                    model: identity.model_for(capability),
                },
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}

#[derive(Serialize)]
struct StateEnvelope<'a> {
    sensor_id: &'a str,
    #[serde(flatten)]
    value: EnvelopeValue,
    unit: &'static str,
    timestamp: String,
}

// Keyed by the capability name, e.g. `"temperature": 21.5`.
#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum EnvelopeValue {
    Temperature(f64),
    Humidity(f64),
}

/// Render a reading as the state topic payload
pub fn state_payload(
    format: PayloadFormat,
    device_id: &str,
    reading: &Reading,
) -> Result<String, serde_json::Error> {
    match format {
        PayloadFormat::Bare => Ok(format!("{}", reading.value)),
        PayloadFormat::Envelope => {
            let value = match reading.capability {
                SensorCapability::Temperature => EnvelopeValue::Temperature(reading.value),
                SensorCapability::Humidity => EnvelopeValue::Humidity(reading.value),
            };
            serde_json::to_string(&StateEnvelope {
                sensor_id: device_id,
                value,
                unit: reading.unit(),
                timestamp: reading.timestamp_rfc3339(),
            })
        }
    }
}
