use std::path::PathBuf;

use clap::Parser;

use rand::rngs::StdRng;
use rand::SeedableRng;

use snafu::{Whatever, ResultExt};

mod config;
use crate::config::Config;
mod hass;
use crate::hass::DeviceIdentity;
mod publisher;
use crate::publisher::Publisher;
mod sensor;
mod session;
use crate::session::PahoSession;

/// Simulated temperature/humidity sensor announcing itself to Home Assistant over MQTT
#[derive(Parser, Debug)]
struct Args {
    /// Path to the YAML config file
    #[arg(default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Whatever> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args = Args::parse();

    log::info!("Loading configuration from {}", args.config.display());
    let config = Config::load(&args.config)
        .with_whatever_context(|e| format!("Cannot load configuration: {e}"))?;

    let identity = DeviceIdentity::from_config(&config.device);
    let client_id = config.mqtt.client_id.clone()
        .unwrap_or_else(|| format!("{}_sensor", identity.id()));
    let session = PahoSession::new(&config.mqtt, &client_id)
        .with_whatever_context(|e| format!("Cannot set up mqtt session: {e}"))?;

    log::info!(
        "Starting sensor '{}' ({}), publishing to {}:{}",
        identity.name(),
        identity.id(),
        config.mqtt.broker,
        config.mqtt.port,
    );
    for sensor in config.enabled_sensors() {
        log::info!(
            "Sensor '{}': every {} seconds",
            sensor.kind.as_str(),
            sensor.update_interval,
        );
    }

    let mut publisher = Publisher::new(&config, session, StdRng::from_entropy());
    publisher.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Cannot listen for interrupt signal: {e}");
            std::future::pending::<()>().await;
        }
        log::info!("Received interrupt, shutting down");
    }).await;
    log::debug!("Publisher stopped in {:?} state", publisher.state());

    Ok(())
}
