// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT client transport.
//!
//! [`MqttTransport`] connects the hub to an external MQTT broker. Devices
//! announce themselves with a presence message:
//!
//! ```text
//! devices/psu1/status  "online"   → session established
//! devices/psu1/status  "offline"  → disconnect (usually the device's last will)
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use relayhub::{DeviceProvisioner, DeviceRegistry, HubConfig};
//! use relayhub::protocol::MqttTransport;
//!
//! # async fn example() -> relayhub::Result<()> {
//! let transport = MqttTransport::builder()
//!     .url("mqtt://192.168.1.50:1883")
//!     .credentials("hub", "secret")
//!     .build()
//!     .await?;
//!
//! let registry = Arc::new(DeviceRegistry::new());
//! let provisioner = DeviceProvisioner::new(
//!     Arc::new(transport.clone()),
//!     Arc::clone(&registry),
//!     HubConfig::default(),
//! );
//! transport.add_hook(Arc::new(provisioner));
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use tokio::sync::oneshot;

use super::listeners::ListenerSet;
use super::topic::{TopicScheme, validate_filter, validate_topic};
use super::{ListenerId, MessageHandler, QoS, SessionHook, Transport};
use crate::error::TransportError;

/// Default MQTT port.
const DEFAULT_PORT: u16 = 1883;

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;

/// Presence payload of a connected device.
const ONLINE: &[u8] = b"online";

/// Presence payload of a departed device.
const OFFLINE: &[u8] = b"offline";

/// Configuration for an MQTT transport.
#[derive(Debug, Clone)]
struct MqttTransportConfig {
    host: String,
    port: u16,
    url: Option<String>,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    connection_timeout: Duration,
    topics: TopicScheme,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            url: None,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            topics: TopicScheme::default(),
        }
    }
}

struct MqttInner {
    client: AsyncClient,
    client_id: String,
    config: MqttTransportConfig,
    listeners: ListenerSet,
    sessions: RwLock<HashSet<String>>,
    hooks: RwLock<Vec<Arc<dyn SessionHook>>>,
    connected: AtomicBool,
}

/// A [`Transport`] backed by a connection to an MQTT broker.
///
/// `MqttTransport` is cheaply cloneable (via `Arc`); clones share the
/// connection.
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<MqttInner>,
}

impl MqttTransport {
    /// Creates a new builder for configuring the connection.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the broker connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the client id used with the broker.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Returns the number of device sessions announced as online.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Registers a session lifecycle hook.
    pub fn add_hook(&self, hook: Arc<dyn SessionHook>) {
        self.inner.hooks.write().push(hook);
    }

    fn from_options(
        options: MqttOptions,
        client_id: String,
        config: MqttTransportConfig,
    ) -> (Self, EventLoop) {
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let transport = Self {
            inner: Arc::new(MqttInner {
                client,
                client_id,
                config,
                listeners: ListenerSet::new(),
                sessions: RwLock::new(HashSet::new()),
                hooks: RwLock::new(Vec::new()),
                connected: AtomicBool::new(false),
            }),
        };
        (transport, event_loop)
    }

    /// Disconnects from the broker.
    ///
    /// Every known session is reported as disconnected first, then hooks and
    /// listeners are dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be sent.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.close_sessions();
        self.inner.client.disconnect().await?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }

    /// Reports every known session as disconnected, then drops hooks and
    /// listeners.
    fn close_sessions(&self) {
        let sessions: Vec<String> = self.inner.sessions.write().drain().collect();
        let hooks = std::mem::take(&mut *self.inner.hooks.write());
        for session in &sessions {
            tracing::info!(session = %session, "Device session closed");
            for hook in &hooks {
                hook.on_disconnect(session);
            }
        }
        self.inner.listeners.clear();
    }

    fn hooks(&self) -> Vec<Arc<dyn SessionHook>> {
        self.inner.hooks.read().clone()
    }

    /// Turns presence messages into session hook calls.
    fn handle_presence(&self, topic: &str, payload: &[u8]) {
        let Some(session) = self.inner.config.topics.session_from_presence_topic(topic) else {
            return;
        };

        match payload {
            ONLINE => {
                if !self.inner.sessions.write().insert(session.to_string()) {
                    tracing::debug!(session = %session, "Duplicate online announcement");
                    return;
                }
                tracing::info!(session = %session, "Device session established");
                let hooks = self.hooks();
                for (accepted, hook) in hooks.iter().enumerate() {
                    if let Err(e) = hook.on_session_established(session) {
                        // A remote session cannot be closed from here.
                        self.inner.sessions.write().remove(session);
                        for earlier in &hooks[..accepted] {
                            earlier.on_disconnect(session);
                        }
                        tracing::error!(
                            session = %session,
                            error = %e,
                            "Session rejected, device ignored"
                        );
                        break;
                    }
                }
            }
            OFFLINE => {
                if self.inner.sessions.write().remove(session) {
                    tracing::info!(session = %session, "Device session closed");
                    for hook in self.hooks() {
                        hook.on_disconnect(session);
                    }
                }
            }
            other => {
                tracing::debug!(
                    session = %session,
                    payload = %String::from_utf8_lossy(other),
                    "Ignoring unknown presence payload"
                );
            }
        }
    }

    fn route_message(&self, topic: &str, payload: &[u8]) {
        self.handle_presence(topic, payload);
        let reached = self.inner.listeners.dispatch("", topic, payload);
        tracing::trace!(topic = %topic, listeners = reached, "MQTT message routed");
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("client_id", &self.inner.client_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Transport for MqttTransport {
    fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<ListenerId, TransportError> {
        validate_filter(filter).map_err(|reason| TransportError::Subscribe {
            filter: filter.to_string(),
            reason: reason.to_string(),
        })?;

        let id = self.inner.listeners.add_with(filter, handler, || {
            self.inner
                .client
                .try_subscribe(filter, rumqttc::QoS::AtLeastOnce)
                .map_err(|e| TransportError::Subscribe {
                    filter: filter.to_string(),
                    reason: e.to_string(),
                })
        })?;

        tracing::debug!(filter = %filter, listener = %id, "Subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, listener: ListenerId) -> bool {
        let removed = self.inner.listeners.remove_with(listener, |filter| {
            if let Err(e) = self.inner.client.try_unsubscribe(filter) {
                tracing::warn!(filter = %filter, error = %e, "Failed to unsubscribe");
            }
        });
        let Some(filter) = removed else {
            return false;
        };
        tracing::debug!(filter = %filter, listener = %listener, "Unsubscribed");
        true
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError> {
        validate_topic(topic).map_err(|reason| TransportError::Publish {
            topic: topic.to_string(),
            reason: reason.to_string(),
        })?;
        self.inner
            .client
            .try_publish(topic, qos.into(), retain, payload.to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Builder for creating an MQTT transport.
///
/// # Examples
///
/// ```no_run
/// use relayhub::protocol::{MqttTransport, TopicScheme};
/// use std::time::Duration;
///
/// # async fn example() -> relayhub::Result<()> {
/// let transport = MqttTransport::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .client_id("relayhub-lab")
///     .keep_alive(Duration::from_secs(60))
///     .topics(TopicScheme::new("lab"))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttTransportBuilder {
    config: MqttTransportConfig,
}

impl MqttTransportBuilder {
    /// Sets host and port from a URL such as `mqtt://host:1883`.
    ///
    /// The URL is parsed by [`build`](Self::build) and overrides
    /// [`host`](Self::host) and [`port`](Self::port).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the client id (default: a random `relayhub-` id).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the device topic layout (default prefix: `devices`).
    #[must_use]
    pub fn topics(mut self, topics: TopicScheme) -> Self {
        self.config.topics = topics;
        self
    }

    /// Connects to the broker and subscribes to device presence.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set or the URL is malformed
    /// - Connection fails
    /// - Connection times out
    pub async fn build(mut self) -> Result<MqttTransport, TransportError> {
        if let Some(url) = self.config.url.take() {
            let (host, port) = parse_mqtt_url(&url)?;
            self.config.host = host;
            self.config.port = port;
        }
        if self.config.host.is_empty() {
            return Err(TransportError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("relayhub-{}", uuid::Uuid::new_v4().simple()));

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (transport, event_loop) =
            MqttTransport::from_options(mqtt_options, client_id, self.config.clone());

        let (connack_tx, connack_rx) = oneshot::channel();
        let events = transport.clone();
        tokio::spawn(async move {
            handle_events(event_loop, events, Some(connack_tx)).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    "Connected to MQTT broker"
                );
            }
            Ok(Err(_)) => {
                return Err(TransportError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )));
            }
        }

        let presence = self.config.topics.presence_filter();
        transport
            .inner
            .client
            .subscribe(presence.as_str(), rumqttc::QoS::AtLeastOnce)
            .await?;
        tracing::debug!(filter = %presence, "Watching device presence");

        Ok(transport)
    }
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), TransportError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| TransportError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), DEFAULT_PORT)
    };

    Ok((host, port))
}

/// Drives the MQTT connection.
async fn handle_events(
    mut event_loop: EventLoop,
    transport: MqttTransport,
    mut connack_tx: Option<oneshot::Sender<()>>,
) {
    use rumqttc::{Event, Packet};

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                transport.inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "MQTT message received"
                );
                transport.route_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                break;
            }
        }
    }

    // Sessions cannot outlive the connection that announced them.
    transport.inner.connected.store(false, Ordering::Release);
    transport.close_sessions();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::device::FaultKind;
    use crate::error::Error;
    use crate::manager::{DeviceProvisioner, DeviceRegistry};
    use crate::types::Command;

    #[test]
    fn builder_default_values() {
        let builder = MqttTransportBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert!(builder.config.client_id.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.topics, TopicScheme::default());
    }

    #[test]
    fn builder_chain() {
        let builder = MqttTransportBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .client_id("hub")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .topics(TopicScheme::new("lab"));

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert_eq!(
            builder.config.credentials,
            Some(("admin".to_string(), "secret".to_string()))
        );
        assert_eq!(builder.config.client_id.as_deref(), Some("hub"));
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(15));
        assert_eq!(builder.config.topics.prefix, "lab");
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let result = MqttTransportBuilder::default().build().await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn builder_bad_url_fails() {
        let result = MqttTransport::builder().url("mqtt://host:notaport").build().await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[test]
    fn parse_mqtt_url_with_port() {
        let (host, port) = parse_mqtt_url("mqtt://192.168.1.50:1884").unwrap();
        assert_eq!(host, "192.168.1.50");
        assert_eq!(port, 1884);
    }

    #[test]
    fn parse_mqtt_url_default_port() {
        let (host, port) = parse_mqtt_url("broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_tcp_scheme() {
        let (host, port) = parse_mqtt_url("tcp://broker.local:8883").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 8883);
    }

    // ========================================================================
    // Presence lifecycle
    // ========================================================================

    /// A transport whose event loop is never polled. Requests queue up in
    /// the client, so subscribe and publish succeed without a broker.
    fn offline_transport(port: u16) -> (MqttTransport, EventLoop) {
        MqttTransport::from_options(
            MqttOptions::new("hub-test", "127.0.0.1", port),
            "hub-test".to_string(),
            MqttTransportConfig::default(),
        )
    }

    fn provision(transport: &MqttTransport) -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new());
        transport.add_hook(Arc::new(DeviceProvisioner::new(
            Arc::new(transport.clone()),
            Arc::clone(&registry),
            HubConfig::default(),
        )));
        registry
    }

    async fn wait_for_relays(registry: &DeviceRegistry) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.relay_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay tasks still running");
    }

    #[tokio::test]
    async fn online_registers_device() {
        let (transport, _event_loop) = offline_transport(1883);
        let registry = provision(&transport);

        transport.route_message("devices/psu1/status", b"online");

        assert!(registry.contains("psu1"));
        assert_eq!(transport.session_count(), 1);

        transport.route_message("devices/psu1/state", &[120, 2]);
        assert_eq!(registry.state("psu1").unwrap().get("voltage"), Some("120"));
        transport.close_sessions();
    }

    #[tokio::test]
    async fn duplicate_online_is_ignored() {
        let (transport, _event_loop) = offline_transport(1883);
        let registry = provision(&transport);

        transport.route_message("devices/psu1/status", b"online");
        let first = registry.get("psu1").unwrap();
        transport.route_message("devices/psu1/status", b"online");

        assert!(Arc::ptr_eq(&first, &registry.get("psu1").unwrap()));
        assert_eq!(registry.relay_count(), 1);
        assert_eq!(transport.session_count(), 1);
        transport.close_sessions();
    }

    #[tokio::test]
    async fn offline_removes_device() {
        let (transport, _event_loop) = offline_transport(1883);
        let registry = provision(&transport);
        transport.route_message("devices/psu1/status", b"online");

        transport.route_message("devices/psu1/status", b"offline");

        assert!(!registry.contains("psu1"));
        assert_eq!(transport.session_count(), 0);
        assert!(matches!(
            registry.send_command("psu1", &Command::new("power", ["on"])),
            Err(Error::DeviceNotFound(_))
        ));
        wait_for_relays(&registry).await;
        transport.close_sessions();
    }

    #[tokio::test]
    async fn unknown_presence_payload_is_ignored() {
        let (transport, _event_loop) = offline_transport(1883);
        let registry = provision(&transport);

        transport.route_message("devices/psu1/status", b"rebooting");
        transport.route_message("devices/psu2/status", b"offline");

        assert!(registry.is_empty());
        assert_eq!(transport.session_count(), 0);
        transport.close_sessions();
    }

    #[tokio::test]
    async fn rejected_provisioning_forgets_session() {
        let (transport, _event_loop) = offline_transport(1883);
        let registry = provision(&transport);
        let mut errors = registry.subscribe_errors();

        transport.route_message("devices/bad+id/status", b"online");

        assert!(registry.is_empty());
        assert_eq!(transport.session_count(), 0);
        assert_eq!(errors.try_recv().unwrap().kind, FaultKind::Provisioning);
        transport.close_sessions();
    }

    #[tokio::test]
    async fn connection_loss_closes_sessions() {
        // Bind then release a port so the connection attempt is refused.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (transport, event_loop) = offline_transport(port);
        let registry = provision(&transport);
        transport.route_message("devices/psu1/status", b"online");
        transport.route_message("devices/psu2/status", b"online");
        assert_eq!(registry.len(), 2);

        tokio::time::timeout(
            Duration::from_secs(10),
            handle_events(event_loop, transport.clone(), None),
        )
        .await
        .expect("event loop did not stop");

        assert!(!transport.is_connected());
        assert_eq!(transport.session_count(), 0);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.send_command("psu1", &Command::new("power", ["on"])),
            Err(Error::DeviceNotFound(_))
        ));
        wait_for_relays(&registry).await;
    }
}
