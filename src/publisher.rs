use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rand::Rng;

use snafu::Snafu;
use snafu::prelude::*;

use tokio::time::{sleep_until, Instant};

use crate::config::{Config, PayloadFormat};
use crate::hass::{self, DeviceIdentity, DiscoveryDescriptor};
use crate::sensor::{Reading, SensorCapability, SensorKind, SimulationBounds};
use crate::session::{Session, SessionError};

#[derive(Debug, Snafu)]
pub enum PublishError {
    #[snafu(display("Error when serializing message: {source}"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("{source}"))]
    Transport { source: SessionError },
}

/// Connection lifecycle of the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Publishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Start,
    ConnectFailed,
    ConnectSucceeded,
    Registered,
    ConnectionLost,
    Shutdown,
}

impl LinkState {
    /// Next state after `event`. Events that do not apply leave the state unchanged.
    pub fn on(self, event: LinkEvent) -> LinkState {
        use LinkEvent::*;
        use LinkState::*;

        match (self, event) {
            (_, Shutdown) => Disconnected,
            (Disconnected, Start) => Connecting,
            (Connecting, ConnectFailed) => Connecting,
            (Connecting, ConnectSucceeded) => Connected,
            (Connected, Registered) => Publishing,
            (Connected | Publishing, ConnectionLost) => Connecting,
            (state, _) => state,
        }
    }
}

/// Publish the retained Home Assistant discovery config for one capability
pub async fn publish_discovery<S: Session>(
    session: &mut S,
    identity: &DeviceIdentity,
    capability: SensorCapability,
) -> Result<(), PublishError> {
    let descriptor = DiscoveryDescriptor::new(identity, capability);
    let payload = descriptor.to_json()
        .context(SerializeSnafu)?;
    log::trace!("Sending message to {}: {payload}", descriptor.config_topic);
    session.publish(&descriptor.config_topic, &payload, true).await
        .context(TransportSnafu)
}

struct Channel {
    capability: SensorCapability,
    bounds: SimulationBounds,
    state_topic: String,
}

struct ScheduledSensor {
    kind: SensorKind,
    interval: Duration,
    channels: Vec<Channel>,
    next_due: Option<Instant>,
}

impl ScheduledSensor {
    fn is_due(&self, now: Instant) -> bool {
        self.next_due.map_or(true, |due| due <= now)
    }

    fn reschedule(&mut self, now: Instant) {
        let next = self.next_due.unwrap_or(now) + self.interval;
        // Skip missed ticks instead of bursting to catch up
        self.next_due = Some(if next <= now { now + self.interval } else { next });
    }
}

pub struct Publisher<S: Session, R: Rng> {
    session: S,
    rng: R,
    identity: DeviceIdentity,
    sensors: Vec<ScheduledSensor>,
    payload_format: PayloadFormat,
    retry_delay: Duration,
    state: LinkState,
}

impl<S: Session, R: Rng> Publisher<S, R> {
    pub fn new(config: &Config, session: S, rng: R) -> Self {
        let identity = DeviceIdentity::from_config(&config.device);
        let sensors = config.enabled_sensors()
            .map(|sensor| ScheduledSensor {
                kind: sensor.kind,
                interval: sensor.update_interval(),
                channels: sensor.capabilities()
                    .iter()
                    .map(|&capability| Channel {
                        capability,
                        bounds: sensor.bounds(capability),
                        state_topic: hass::state_topic(identity.id(), capability),
                    })
                    .collect(),
                next_due: None,
            })
            .collect();

        Self {
            session,
            rng,
            identity,
            sensors,
            payload_format: config.mqtt.payload_format,
            retry_delay: config.mqtt.retry_delay(),
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    #[cfg(test)]
    pub fn session(&self) -> &S {
        &self.session
    }

    fn transition(&mut self, event: LinkEvent) {
        let next = self.state.on(event);
        if next != self.state {
            log::debug!("{:?} -> {:?} ({event:?})", self.state, next);
        }
        self.state = next;
    }

    /// Connect, register and publish readings until `shutdown` resolves.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);

        self.transition(LinkEvent::Start);
        loop {
            match self.state {
                LinkState::Connecting => {
                    let res = tokio::select! {
                        res = self.session.connect() => res,
                        _ = shutdown.as_mut() => break,
                    };
                    match res {
                        Ok(()) => {
                            log::info!("Connected to mqtt server");
                            self.transition(LinkEvent::ConnectSucceeded);
                        }
                        Err(e) => {
                            log::warn!(
                                "{e}. Retrying in {} seconds",
                                self.retry_delay.as_secs_f64()
                            );
                            self.transition(LinkEvent::ConnectFailed);
                            let deadline = Instant::now() + self.retry_delay;
                            if !sleep_or_shutdown(deadline, shutdown.as_mut()).await {
                                break;
                            }
                        }
                    }
                }
                LinkState::Connected => {
                    self.register().await;
                    self.transition(LinkEvent::Registered);
                }
                LinkState::Publishing => {
                    if !self.session.is_connected() {
                        log::warn!("Disconnected from mqtt server, reconnecting");
                        self.transition(LinkEvent::ConnectionLost);
                        continue;
                    }
                    self.publish_due().await;
                    if !sleep_or_shutdown(self.next_due(), shutdown.as_mut()).await {
                        break;
                    }
                }
                LinkState::Disconnected => break,
            }
        }

        log::info!("Stopping publisher");
        self.close().await;
    }

    async fn register(&mut self) {
        let Self { session, identity, sensors, .. } = self;
        for capability in sensors.iter().flat_map(|s| s.channels.iter().map(|c| c.capability)) {
            match publish_discovery(session, identity, capability).await {
                Ok(()) => log::info!("Published discovery config for {}", capability.as_str()),
                Err(e) => log::warn!(
                    "Failed to publish discovery config for {}: {e}", capability.as_str()
                ),
            }
        }
    }

    async fn publish_due(&mut self) {
        let now = Instant::now();
        let Self { session, rng, identity, sensors, payload_format, .. } = self;
        for sensor in sensors.iter_mut().filter(|s| s.is_due(now)) {
            sensor.reschedule(now);
            log::debug!("Reading '{}' sensor", sensor.kind.as_str());
            for channel in sensor.channels.iter() {
                let reading = Reading::generate(rng, channel.capability, &channel.bounds);
                let payload = match hass::state_payload(*payload_format, identity.id(), &reading) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("Error when serializing reading: {e}");
                        continue;
                    }
                };
                log::trace!("Sending message to {}: {payload}", channel.state_topic);
                match session.publish(&channel.state_topic, &payload, false).await {
                    Ok(()) => log::info!(
                        "Published {}: {}{}",
                        channel.capability.as_str(),
                        reading.value,
                        reading.unit()
                    ),
                    Err(e) => log::warn!("Cannot publish entity state: {e}"),
                }
            }
        }
    }

    fn next_due(&self) -> Instant {
        let now = Instant::now();
        self.sensors.iter()
            .map(|s| s.next_due.unwrap_or(now))
            .min()
            .unwrap_or(now)
    }

    async fn close(&mut self) {
        self.transition(LinkEvent::Shutdown);
        if !self.session.is_connected() {
            return;
        }
        match self.session.disconnect().await {
            Ok(()) => log::info!("Disconnected from mqtt server"),
            Err(e) => log::warn!("{e}"),
        }
    }
}

/// Sleep until `deadline`. Returns false if `shutdown` resolved first.
async fn sleep_or_shutdown<F: Future<Output = ()>>(
    deadline: Instant,
    shutdown: Pin<&mut F>,
) -> bool {
    tokio::select! {
        _ = sleep_until(deadline) => true,
        _ = shutdown => false,
    }
}
