//! MQTT forwarding of live-update events.
//!
//! Each bus event is published as JSON to `{prefix}/{event_name}` at QoS 1.
//! Broker outages are logged and retried by the connection thread; they never
//! reach the pipeline, and a full client queue drops the event.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broadcast::{LiveEvent, Subscription};

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct MqttBridgeConfig {
    /// `host`, `host:port` or `mqtt[s]://host[:port]`.
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

pub fn parse_broker_addr(addr: &str) -> Result<BrokerEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    let default_port = if use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };

    let (host, port) = if let Some(rest) = remainder.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().context("invalid MQTT port")?,
            None => default_port,
        };
        (host.to_string(), port)
    } else {
        match remainder.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().context("invalid MQTT port")?),
            None => (remainder.to_string(), default_port),
        }
    };
    if host.is_empty() {
        return Err(anyhow!("MQTT address has no host: {}", addr));
    }
    Ok(BrokerEndpoint {
        host,
        port,
        use_tls,
    })
}

pub fn topic_for(prefix: &str, event: &LiveEvent) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        event.name().to_string()
    } else {
        format!("{}/{}", prefix, event.name())
    }
}

pub struct MqttBridge;

impl MqttBridge {
    /// Connect in the background and forward everything `events` receives.
    pub fn spawn(cfg: MqttBridgeConfig, events: Subscription) -> Result<BridgeHandle> {
        let endpoint = parse_broker_addr(&cfg.broker)?;
        let mut options = MqttOptions::new(cfg.client_id.clone(), &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = &cfg.username {
            options.set_credentials(user, cfg.password.clone().unwrap_or_default());
        }
        options.set_transport(if endpoint.use_tls {
            Transport::tls_with_default_config()
        } else {
            Transport::tcp()
        });

        let (client, connection) = Client::new(options, 10);
        let shutdown = Arc::new(AtomicBool::new(false));
        let connection_thread = spawn_connection(connection, shutdown.clone());

        let forward_client = client.clone();
        let forward_shutdown = shutdown.clone();
        let prefix = cfg.topic_prefix.clone();
        let forwarder = std::thread::spawn(move || {
            forward_events(&forward_client, &prefix, &events, &forward_shutdown)
        });

        log::info!(
            "mqtt bridge: publishing to {}:{} under '{}' (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            cfg.topic_prefix,
            endpoint.use_tls,
            cfg.username.is_some()
        );
        Ok(BridgeHandle {
            client,
            shutdown,
            forwarder: Some(forwarder),
            connection: Some(connection_thread),
        })
    }
}

fn spawn_connection(mut connection: Connection, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    log::warn!("MQTT connection error: {}", e);
                    std::thread::sleep(RECONNECT_BACKOFF);
                }
            }
        }
    })
}

fn forward_events(client: &Client, prefix: &str, events: &Subscription, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        let event = match events.next_timeout(POLL_INTERVAL) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                log::info!("mqtt bridge: {}", e);
                break;
            }
        };
        let payload = match event.payload_json() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("mqtt bridge: failed to encode '{}': {}", event.name(), e);
                continue;
            }
        };
        let topic = topic_for(prefix, &event);
        if let Err(e) = client.try_publish(topic.as_str(), QoS::AtLeastOnce, false, payload) {
            log::warn!("mqtt bridge: dropped '{}': {}", topic, e);
        }
    }
}

pub struct BridgeHandle {
    client: Client,
    shutdown: Arc<AtomicBool>,
    forwarder: Option<JoinHandle<()>>,
    connection: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.forwarder.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("mqtt bridge: disconnect: {}", e);
        }
        if let Some(handle) = self.connection.take() {
            let _ = handle.join();
        }
    }
}
