//! Outbound alert transports.
//!
//! The MQTT transport publishes alerts to a broker so any subscriber (a mail
//! relay, SMS gateway, or home-automation hub) can deliver them.

mod endpoint;
mod mqtt;

pub use endpoint::{parse_mqtt_endpoint, MqttEndpoint, DEFAULT_MQTTS_PORT, DEFAULT_MQTT_PORT};
pub use mqtt::{MqttSettings, MqttTransport, DEFAULT_CLIENT_ID, DEFAULT_TOPIC_PREFIX};
