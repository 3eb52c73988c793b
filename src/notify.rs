//! Downstream notification of accepted readings over MQTT.
//!
//! Topic mapping is static: one topic for rain, one for wind. Energy has no
//! topic. Each message is the JSON built by [`AcceptedEvent::to_message`].

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::error::{IngestError, IngestResult};
use crate::models::{AcceptedEvent, StreamKey};

// ---

/// The two fixed downstream channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub rain: String,
    pub wind: String,
}

impl Topics {
    // ---
    pub fn for_key(&self, key: &StreamKey) -> Option<&str> {
        match key {
            StreamKey::Rain => Some(&self.rain),
            StreamKey::Wind => Some(&self.wind),
            StreamKey::EnergyInterval { .. } => None,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, event: &AcceptedEvent) -> IngestResult<()>;
}

/// Outgoing requests buffered between the client and its event loop.
const REQUEST_QUEUE_CAPACITY: usize = 100;

/// [`Notifier`] publishing to an MQTT broker.
///
/// The client's event loop runs on a background task that keeps
/// reconnecting. `publish` hands the message to that loop without waiting:
/// while the broker is down the request queue fills up and further
/// messages fail with `PublishError` instead of blocking the cycle.
/// Success means queued for delivery at the configured QoS.
pub struct MqttNotifier {
    client: AsyncClient,
    qos: QoS,
    retain: bool,
}

impl MqttNotifier {
    // ---
    pub fn connect(config: &NotifierConfig) -> anyhow::Result<Self> {
        // ---
        let (host, port, use_tls) =
            parse_broker_url(&config.broker_url).map_err(|e| anyhow::anyhow!(e))?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        if use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("MQTT connected: {:?}", ack);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}. Reconnecting...", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            qos: qos_from_level(config.qos),
            retain: config.retain,
        })
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    // ---
    async fn publish(&self, topic: &str, event: &AcceptedEvent) -> IngestResult<()> {
        // ---
        let payload = event.to_message().to_string();

        self.client
            .try_publish(topic, self.qos, self.retain, payload.into_bytes())
            .map_err(|e| IngestError::PublishError {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Queued {} event for '{}'", event.key, topic);
        Ok(())
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    // ---
    let (rest, use_tls) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        (stripped, false)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        (stripped, true)
    } else {
        return Err(format!("broker URL '{url}' must start with mqtt:// or mqtts://"));
    };

    let rest = rest.trim_end_matches('/');
    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{port}' in broker URL"))?;
            (host, port)
        }
        None => (rest, default_port),
    };

    if host.is_empty() {
        return Err(format!("broker URL '{url}' has no host"));
    }

    Ok((host.to_string(), port, use_tls))
}
