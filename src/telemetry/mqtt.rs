//! MQTT-backed [`StateSink`] built on `rumqttc`.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use tokio::task::JoinHandle;

use super::StateSink;
use super::publisher::{ONLINE_KEY, TOPIC_ROOT, short_site_id};
use crate::config::Settings;
use crate::error::SinkError;

/// Outgoing requests buffered before `try_publish` starts dropping.
const REQUEST_CAPACITY: usize = 256;

/// Delay before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Retained-message sink publishing to an MQTT broker.
///
/// Publishing never waits on the network: when the request queue is full the
/// message is dropped and reported as a [`SinkError`].
pub struct MqttSink {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttSink {
    /// Creates the client and starts polling its event loop.
    ///
    /// The client id is the short site id, and a retained `isOnline = false`
    /// last will is registered for ungraceful disconnects.
    pub fn connect(settings: &Settings) -> Self {
        let site = short_site_id(&settings.vp_address);
        let mut options = MqttOptions::new(site, settings.server.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        options.set_last_will(LastWill::new(
            format!("{TOPIC_ROOT}/{site}/{ONLINE_KEY}"),
            "false",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let server = format!("{}:{}", settings.server, settings.port);
        tracing::info!(%server, client_id = %site, "mqtt client started");
        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => tracing::debug!(?event, "mqtt event"),
                    Err(error) => {
                        tracing::warn!(%server, %error, "mqtt connection error; retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Self { client, event_loop }
    }

    /// Sends a clean DISCONNECT (so the last will is not fired) and stops polling.
    pub async fn disconnect(self) {
        if let Err(error) = self.client.disconnect().await {
            tracing::warn!(%error, "mqtt disconnect failed");
        }
        // Give the event loop a moment to flush the DISCONNECT packet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.event_loop.abort();
    }
}

#[async_trait]
impl StateSink for MqttSink {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
            .map_err(|e| SinkError(e.to_string()))
    }
}
