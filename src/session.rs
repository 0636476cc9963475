use paho_mqtt as mqtt;

use snafu::Snafu;
use snafu::prelude::*;

use crate::config::MqttConfig;

pub const QOS: i32 = 0;

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("Error creating mqtt client: {source}"))]
    Create { source: mqtt::Error },

    #[snafu(display("Unable to connect to mqtt server: {source}"))]
    Connect { source: mqtt::Error },

    #[snafu(display("Cannot publish to {topic}: {source}"))]
    Publish { topic: String, source: mqtt::Error },

    #[snafu(display("Error when disconnecting: {source}"))]
    Disconnect { source: mqtt::Error },
}

/// Broker connection the publisher drives
#[allow(async_fn_in_trait)]
pub trait Session {
    async fn connect(&mut self) -> Result<(), SessionError>;
    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), SessionError>;
    async fn disconnect(&mut self) -> Result<(), SessionError>;
    fn is_connected(&self) -> bool;
}

pub struct PahoSession {
    client: mqtt::AsyncClient,
    conn_opts: mqtt::ConnectOptions,
}

impl PahoSession {
    pub fn new(cfg: &MqttConfig, client_id: &str) -> Result<Self, SessionError> {
        let create_opts = mqtt::CreateOptionsBuilder::new()
            .server_uri(cfg.server_uri())
            .client_id(client_id)
            .finalize();
        let client = mqtt::AsyncClient::new(create_opts)
            .context(CreateSnafu)?;
        client.set_connection_lost_callback(|_| {
            log::warn!("Connection to mqtt server lost");
        });

        let mut conn_opts_builder = mqtt::ConnectOptionsBuilder::new();
        conn_opts_builder
            .keep_alive_interval(cfg.keep_alive())
            .clean_session(true);
        if let Some((user, password)) = cfg.credentials() {
            conn_opts_builder
                .user_name(user)
                .password(password);
        }

        Ok(Self {
            client,
            conn_opts: conn_opts_builder.finalize(),
        })
    }
}

impl Session for PahoSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.client.connect(self.conn_opts.clone()).await
            .context(ConnectSnafu)?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), SessionError> {
        let msg = if retain {
            mqtt::Message::new_retained(topic, payload, QOS)
        } else {
            mqtt::Message::new(topic, payload, QOS)
        };
        self.client.publish(msg).await
            .context(PublishSnafu { topic })
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.client.disconnect(None).await
            .context(DisconnectSnafu)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}
