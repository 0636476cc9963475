use chrono::{DateTime, SecondsFormat, Utc};

use rand::Rng;

use serde::Deserialize;

/// Quantity a simulated sensor can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorCapability {
    Temperature,
    Humidity,
}

impl SensorCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
        }
    }

    pub fn device_class(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }

    pub fn human_name(&self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
        }
    }
}

/// Configured sensor hardware being simulated
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum SensorKind {
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "dht11")]
    Dht11,
    #[serde(rename = "dht22")]
    Dht22,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Dht11 => "dht11",
            Self::Dht22 => "dht22",
        }
    }

    pub fn capabilities(&self) -> &'static [SensorCapability] {
        match self {
            Self::Temperature => &[SensorCapability::Temperature],
            Self::Humidity => &[SensorCapability::Humidity],
            Self::Dht11 | Self::Dht22 => {
                &[SensorCapability::Temperature, SensorCapability::Humidity]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationBounds {
    pub min: f64,
    pub max: f64,
    pub noise: f64,
}

impl SimulationBounds {
    pub fn default_for(capability: SensorCapability) -> Self {
        match capability {
            SensorCapability::Temperature => Self { min: 20.0, max: 28.0, noise: 0.0 },
            SensorCapability::Humidity => Self { min: 40.0, max: 60.0, noise: 0.0 },
        }
    }
}

/// Draw a value uniformly from `[min, max]`, add jitter from `[-noise, noise]`
/// and round to 2 decimal places.
///
/// Bounds must satisfy `min <= max` and `noise >= 0`, which config validation
/// guarantees.
pub fn simulate<R: Rng>(rng: &mut R, bounds: &SimulationBounds) -> f64 {
    let base = rng.gen_range(bounds.min..=bounds.max);
    let jitter = if bounds.noise > 0.0 {
        rng.gen_range(-bounds.noise..=bounds.noise)
    } else {
        0.0
    };
    round2(base + jitter)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Single simulated measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub capability: SensorCapability,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn generate<R: Rng>(
        rng: &mut R,
        capability: SensorCapability,
        bounds: &SimulationBounds,
    ) -> Self {
        Self {
            capability,
            value: simulate(rng, bounds),
            timestamp: Utc::now(),
        }
    }

    pub fn unit(&self) -> &'static str {
        self.capability.unit()
    }

    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
