//! MQTT alert transport.
//!
//! Each alert is published as JSON on `<prefix>/alerts/<recipient>`; the JPEG
//! snapshot, when present, follows on `<prefix>/alerts/<recipient>/snapshot`.
//! Publishing never blocks: a full client queue is reported as a transport error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, ConnectionError, Event, MqttOptions};
use rumqttc::Transport;
use serde::Serialize;

use super::endpoint::parse_mqtt_endpoint;
use crate::alert::{AlertMessage, AlertTransport};
use crate::error::TransportError;

pub const DEFAULT_TOPIC_PREFIX: &str = "wildwatch";
pub const DEFAULT_CLIENT_ID: &str = "wildwatch";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

impl MqttSettings {
    pub fn new(broker_addr: impl Into<String>) -> Self {
        Self {
            broker_addr: broker_addr.into(),
            username: None,
            password: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    recipient: &'a str,
    category: &'a str,
    confidence: f32,
    subject: &'a str,
    body: &'a str,
    has_snapshot: bool,
}

pub struct MqttTransport {
    client: Client,
    topic_prefix: String,
    connection_error: Arc<Mutex<Option<TransportError>>>,
    stopping: Arc<AtomicBool>,
}

impl MqttTransport {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker_addr)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 32);
        let connection_error = Arc::new(Mutex::new(None));
        let stopping = Arc::new(AtomicBool::new(false));
        spawn_connection(connection, Arc::clone(&connection_error), Arc::clone(&stopping))?;

        log::info!(
            "MQTT alert transport configured for {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            topic_prefix: settings.topic_prefix.trim_end_matches('/').to_string(),
            connection_error,
            stopping,
        })
    }

    fn alert_topic(&self, recipient: &str) -> String {
        format!("{}/alerts/{}", self.topic_prefix, topic_segment(recipient))
    }

    fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::Transport(e.to_string()))
    }
}

impl AlertTransport for MqttTransport {
    fn send(&self, message: &AlertMessage) -> Result<(), TransportError> {
        if let Some(err @ TransportError::Auth(_)) = self
            .connection_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
        {
            return Err(err);
        }

        let payload = AlertPayload {
            recipient: message.recipient.as_str(),
            category: &message.category,
            confidence: message.confidence,
            subject: &message.subject,
            body: &message.body,
            has_snapshot: message.image.is_some(),
        };
        let json = serde_json::to_vec(&payload).map_err(|e| TransportError::Unknown(e.to_string()))?;
        let topic = self.alert_topic(message.recipient.as_str());
        self.publish(topic.clone(), json)?;
        if let Some(image) = &message.image {
            self.publish(format!("{}/snapshot", topic), image.clone())?;
        }
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect failed: {}", e);
        }
    }
}

fn spawn_connection(
    mut connection: Connection,
    connection_error: Arc<Mutex<Option<TransportError>>>,
    stopping: Arc<AtomicBool>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("mqtt-connection".to_string())
        .spawn(move || {
            for event in connection.iter() {
                let update = match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("MQTT broker connected");
                        Some(None)
                    }
                    Ok(_) => None,
                    Err(ConnectionError::RequestsDone) => break,
                    Err(e) => {
                        if stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        let err = classify(&e);
                        match &err {
                            TransportError::Auth(_) => log::error!("MQTT connection rejected: {}", e),
                            _ => log::warn!("MQTT connection error: {}", e),
                        }
                        Some(Some(err))
                    }
                };
                if let Some(state) = update {
                    let failed = state.is_some();
                    *connection_error.lock().unwrap_or_else(|p| p.into_inner()) = state;
                    if failed {
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
            log::debug!("MQTT connection thread exiting");
        })?;
    Ok(())
}

fn classify(err: &ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized,
        ) => TransportError::Auth(err.to_string()),
        ConnectionError::ConnectionRefused(_)
        | ConnectionError::Io(_)
        | ConnectionError::Timeout(_)
        | ConnectionError::Tls(_) => TransportError::Transport(err.to_string()),
        _ => TransportError::Unknown(err.to_string()),
    }
}

/// Recipient addresses become a single topic level.
fn topic_segment(recipient: &str) -> String {
    recipient
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            '@' => '_',
            _ => '-',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_map_to_one_topic_level() {
        assert_eq!(topic_segment("ranger@park.org"), "ranger_park.org");
        assert_eq!(topic_segment("a+b/c#@x.io"), "a-b-c-_x.io");
    }

    #[test]
    fn refused_credentials_are_auth_errors() {
        let err = classify(&ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized));
        assert!(matches!(err, TransportError::Auth(_)));
        let err = classify(&ConnectionError::ConnectionRefused(ConnectReturnCode::ServerUnavailable));
        assert!(matches!(err, TransportError::Transport(_)));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = classify(&ConnectionError::Io(io));
        assert!(matches!(err, TransportError::Transport(_)));
        let err = classify(&ConnectionError::RequestsDone);
        assert!(matches!(err, TransportError::Unknown(_)));
    }

    #[test]
    fn settings_defaults() {
        let settings = MqttSettings::new("localhost:1883");
        assert_eq!(settings.topic_prefix, DEFAULT_TOPIC_PREFIX);
        assert!(settings.username.is_none());
    }

    #[test]
    fn connect_rejects_bad_address() {
        assert!(MqttTransport::connect(&MqttSettings::new("http://broker")).is_err());
    }
}
