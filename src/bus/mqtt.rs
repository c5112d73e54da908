//! MQTT publisher built on `rumqttc`'s blocking client.
//!
//! Two connection modes:
//! - one-shot (default): connect, publish, wait for the broker's
//!   acknowledgement when QoS > 0, disconnect;
//! - keep: one client shared by every session, with a background thread
//!   driving its event loop and reconnecting as needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Outgoing, Packet, QoS, Transport};
use tracing::{debug, info, warn};

use crate::bus::Publisher;
use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};

const REQUEST_CAPACITY: usize = 16;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Host, port, and transport security parsed from the broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `tcp://host:port`, `mqtt://`, `mqtts://`, `ssl://`, or a bare `host:port`.
pub fn parse_broker_url(server: &str) -> Result<BrokerAddress> {
    let server = server.trim();
    let with_scheme = if server.contains("://") {
        server.to_string()
    } else {
        format!("tcp://{server}")
    };

    let url = url::Url::parse(&with_scheme)
        .map_err(|e| BridgeError::Config(format!("invalid MQTT server '{server}': {e}")))?;

    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        other => {
            return Err(BridgeError::Config(format!(
                "unsupported MQTT scheme '{other}' in '{server}'"
            )))
        }
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BridgeError::Config(format!("MQTT server '{server}' has no host")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress { host, port, tls })
}

/// Map a numeric QoS level.
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Config(format!(
            "MQTT QoS must be 0, 1 or 2, got {other}"
        ))),
    }
}

/// Publishes to an MQTT broker.
pub struct MqttPublisher {
    broker: BrokerAddress,
    credentials: Option<(String, String)>,
    client_id: String,
    qos: QoS,
    /// Present in keep mode.
    shared: Option<Client>,
    sequence: AtomicU64,
}

impl MqttPublisher {
    /// Validate the configuration and, in keep mode, start the shared connection.
    pub fn new(config: &MqttConfig) -> Result<Self> {
        let broker = parse_broker_url(&config.server)?;
        let qos = qos_from_level(config.qos)?;
        if config.client_id.trim().is_empty() || config.client_id.starts_with(' ') {
            return Err(BridgeError::Config(
                "MQTT client id must be non-empty and not start with a space".to_string(),
            ));
        }
        let credentials = config
            .user
            .as_ref()
            .map(|user| (user.clone(), config.password.clone().unwrap_or_default()));

        let mut publisher = Self {
            broker,
            credentials,
            client_id: config.client_id.clone(),
            qos,
            shared: None,
            sequence: AtomicU64::new(0),
        };

        if config.keep {
            let options = publisher.options(publisher.client_id.clone());
            let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
            let host = publisher.broker.host.clone();
            thread::Builder::new()
                .name("mqtt-eventloop".to_string())
                .spawn(move || {
                    for notification in connection.iter() {
                        match notification {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                info!(host = %host, "Connected to MQTT broker");
                            }
                            Ok(event) => debug!(?event, "MQTT event"),
                            Err(e) => {
                                warn!(host = %host, error = %e, "MQTT connection error, retrying");
                                thread::sleep(RECONNECT_DELAY);
                            }
                        }
                    }
                    debug!("MQTT event loop finished");
                })
                .map_err(|e| BridgeError::io("spawning the MQTT event loop", e))?;
            publisher.shared = Some(client);
        }

        info!(
            host = %publisher.broker.host,
            port = publisher.broker.port,
            tls = publisher.broker.tls,
            keep = config.keep,
            "MQTT publisher ready"
        );
        Ok(publisher)
    }

    fn options(&self, client_id: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.broker.host.clone(), self.broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user.clone(), password.clone());
        }
        if self.broker.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }

    fn publish_once(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let fail = |reason: String| BridgeError::Publish {
            topic: topic.to_string(),
            reason,
        };

        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        let options = self.options(format!("{}-{}", self.client_id, n));
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);

        client
            .publish(topic, self.qos, false, payload.to_vec())
            .map_err(|e| fail(e.to_string()))?;

        for notification in connection.iter() {
            let done = match notification {
                Ok(Event::Outgoing(Outgoing::Publish(_))) => self.qos == QoS::AtMostOnce,
                Ok(Event::Incoming(Packet::PubAck(_))) => self.qos == QoS::AtLeastOnce,
                Ok(Event::Incoming(Packet::PubComp(_))) => self.qos == QoS::ExactlyOnce,
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => false,
                Err(e) => return Err(fail(e.to_string())),
            };
            if done {
                client.disconnect().map_err(|e| fail(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        match &self.shared {
            Some(client) => client
                .publish(topic, self.qos, false, payload.to_vec())
                .map_err(|e| BridgeError::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }),
            None => self.publish_once(topic, payload),
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(client) = &self.shared {
            if let Err(e) = client.disconnect() {
                debug!(error = %e, "MQTT disconnect failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_url() {
        let broker = parse_broker_url("tcp://127.0.0.1:1883").unwrap();
        assert_eq!(
            broker,
            BrokerAddress {
                host: "127.0.0.1".to_string(),
                port: 1883,
                tls: false
            }
        );
    }

    #[test]
    fn test_parse_bare_host_port() {
        let broker = parse_broker_url("broker.local:1884").unwrap();
        assert_eq!(broker.host, "broker.local");
        assert_eq!(broker.port, 1884);
        assert!(!broker.tls);
    }

    #[test]
    fn test_parse_default_ports() {
        assert_eq!(parse_broker_url("mqtt://broker.local").unwrap().port, 1883);
        let tls = parse_broker_url("mqtts://broker.local").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.tls);
    }

    #[test]
    fn test_parse_ipv6_host() {
        assert_eq!(parse_broker_url("tcp://[::1]:1883").unwrap().host, "::1");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(matches!(
            parse_broker_url("http://broker.local"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }

    #[test]
    fn test_new_rejects_empty_client_id() {
        let config = MqttConfig {
            client_id: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            MqttPublisher::new(&config),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_new_rejects_bad_qos() {
        let config = MqttConfig {
            qos: 7,
            ..Default::default()
        };
        assert!(MqttPublisher::new(&config).is_err());
    }
}
