//! MQTT violation notifier.
//!
//! Publishes each event as JSON to `<prefix>/violations/<camera_id>` at QoS 1.
//! The connection thread keeps retrying with backoff after broker errors so
//! a restarted broker picks up later events.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ViolationSink;
use crate::ViolationEvent;

pub const DEFAULT_TOPIC_PREFIX: &str = "ppe";

const RECONNECT_BACKOFF_START: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);
const CLOSE_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// `host:port`, optionally prefixed with `mqtt://`, `tcp://`, `mqtts://` or `ssl://`.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
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

    let (host, port) = if let Some(rest) = remainder.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        (host, port)
    } else {
        remainder
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?
    };
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok(MqttEndpoint {
        host: host.to_string(),
        port,
        use_tls,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct MqttSettings {
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct MqttNotifier {
    client: Client,
    topic_prefix: String,
    closing: Arc<AtomicBool>,
    connection_errors: Arc<AtomicU64>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttNotifier {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "MQTT notifier connecting to {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        let closing = Arc::new(AtomicBool::new(false));
        let connection_errors = Arc::new(AtomicU64::new(0));
        let handle = drive_connection(
            connection,
            Arc::clone(&closing),
            Arc::clone(&connection_errors),
        );
        Ok(Self {
            client,
            topic_prefix: settings.topic_prefix.trim_end_matches('/').to_string(),
            closing,
            connection_errors,
            connection_handle: Some(handle),
        })
    }

    /// Broker errors seen by the connection thread so far.
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    pub fn topic_for(&self, camera_id: &str) -> String {
        violation_topic(&self.topic_prefix, camera_id)
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

pub fn violation_topic(prefix: &str, camera_id: &str) -> String {
    format!("{}/violations/{}", prefix.trim_end_matches('/'), camera_id)
}

/// Doubling delay between reconnect attempts, reset once the broker answers.
#[derive(Debug)]
struct ReconnectBackoff {
    next: Duration,
}

impl ReconnectBackoff {
    fn new() -> Self {
        Self {
            next: RECONNECT_BACKOFF_START,
        }
    }

    fn reset(&mut self) {
        self.next = RECONNECT_BACKOFF_START;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(RECONNECT_BACKOFF_MAX);
        delay
    }
}

/// Runs the rumqttc event loop until the notifier is closed or every client
/// handle is gone (the iterator ends). Iterating after an error makes rumqttc
/// reconnect.
fn drive_connection(
    mut connection: Connection,
    closing: Arc<AtomicBool>,
    errors: Arc<AtomicU64>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut backoff = ReconnectBackoff::new();
        for event in connection.iter() {
            match event {
                Ok(_) => backoff.reset(),
                Err(e) => {
                    if closing.load(Ordering::SeqCst) {
                        break;
                    }
                    errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    log::warn!("MQTT connection error: {}; retrying in {:?}", e, delay);
                    if !sleep_unless_closing(delay, &closing) {
                        break;
                    }
                }
            }
        }
        log::debug!("MQTT connection thread stopped");
    })
}

/// Returns false when `closing` was raised during the wait.
fn sleep_unless_closing(delay: Duration, closing: &AtomicBool) -> bool {
    let mut waited = Duration::ZERO;
    while waited < delay {
        if closing.load(Ordering::SeqCst) {
            return false;
        }
        let step = CLOSE_POLL.min(delay - waited);
        std::thread::sleep(step);
        waited += step;
    }
    !closing.load(Ordering::SeqCst)
}

impl ViolationSink for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&mut self, ev: &ViolationEvent) -> Result<()> {
        let payload = serde_json::to_vec(ev)?;
        let topic = self.topic_for(&ev.camera_id);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| anyhow!("MQTT publish failed: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Zone;
    use std::time::Instant;

    fn event() -> ViolationEvent {
        ViolationEvent {
            timestamp: "2024-03-01 08:15:00".to_string(),
            epoch_s: 1_709_280_900,
            identity_name: "Unknown".to_string(),
            identity_id: "N/A".to_string(),
            violation: "no_helmet".to_string(),
            image_path: "snapshots/dock_20240301_081500_4.jpg".to_string(),
            camera_id: "dock".to_string(),
            zone: Zone::Left,
            confidence: 0.8,
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn backoff_doubles_up_to_the_cap_and_resets() {
        let mut backoff = ReconnectBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), RECONNECT_BACKOFF_MAX);
        backoff.reset();
        assert_eq!(backoff.next_delay(), RECONNECT_BACKOFF_START);
    }

    #[test]
    fn unreachable_broker_keeps_the_connection_thread_alive() {
        // Reserve a port, then free it so connects are refused.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut notifier = MqttNotifier::connect(&MqttSettings {
            broker: format!("127.0.0.1:{}", port),
            client_id: "ppe-watchd-test".to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            username: None,
            password: None,
        })
        .unwrap();

        assert!(wait_until(Duration::from_secs(10), || notifier.connection_errors() >= 2));
        let handle = notifier.connection_handle.as_ref().unwrap();
        assert!(!handle.is_finished());
        // Requests are still accepted for delivery after the broker returns.
        notifier.publish(&event()).unwrap();

        let start = Instant::now();
        notifier.disconnect().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn parses_plain_and_tls_endpoints() {
        assert_eq!(
            parse_mqtt_endpoint("127.0.0.1:1883").unwrap(),
            MqttEndpoint {
                host: "127.0.0.1".into(),
                port: 1883,
                use_tls: false
            }
        );
        let ep = parse_mqtt_endpoint("mqtts://broker.local:8883").unwrap();
        assert!(ep.use_tls);
        assert_eq!(ep.host, "broker.local");
        let ep = parse_mqtt_endpoint("[::1]:1883").unwrap();
        assert_eq!(ep.host, "::1");
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(parse_mqtt_endpoint("broker.local").is_err());
        assert!(parse_mqtt_endpoint("ws://broker:80").is_err());
        assert!(parse_mqtt_endpoint("broker:notaport").is_err());
        assert!(parse_mqtt_endpoint(":1883").is_err());
    }

    #[test]
    fn topic_is_per_camera() {
        assert_eq!(violation_topic("ppe", "dock"), "ppe/violations/dock");
        assert_eq!(violation_topic("site/a/", "gate-2"), "site/a/violations/gate-2");
    }
}
