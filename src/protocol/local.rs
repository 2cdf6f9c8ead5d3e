// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process publish/subscribe broker.
//!
//! ```text
//! publish_from("psu1", devices/psu1/state, [120, 2])
//!                     ↓
//!         retain? → store / clear retained slot
//!                     ↓
//!   snapshot listeners whose filter matches (read lock)
//!                     ↓
//!         handlers invoked with no lock held
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::listeners::ListenerSet;
use super::topic::{matches, validate_filter, validate_topic};
use super::{InboundMessage, ListenerId, MessageHandler, QoS, SessionHook, Transport};
use crate::error::{Result, TransportError};

/// Client id reported for messages published through the [`Transport`]
/// interface of a [`LocalBroker`].
pub const INLINE_CLIENT_ID: &str = "inline";

struct Retained {
    client_id: String,
    payload: Vec<u8>,
}

struct Inner {
    listeners: ListenerSet,
    retained: RwLock<BTreeMap<String, Retained>>,
    sessions: RwLock<HashSet<String>>,
    hooks: RwLock<Vec<Arc<dyn SessionHook>>>,
}

/// An in-process broker.
///
/// `LocalBroker` implements [`Transport`] for the hub and exposes the device
/// side ([`connect`](Self::connect), [`publish_from`](Self::publish_from),
/// [`disconnect`](Self::disconnect)) so devices or simulators can live in the
/// same process.
///
/// It supports MQTT topic filters, retained messages (replayed to new
/// matching listeners, cleared by an empty retained payload) and session
/// hooks. QoS is accepted and ignored: in-process delivery is immediate.
///
/// Cloning is cheap; clones share the same broker.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use relayhub::protocol::{InboundMessage, LocalBroker, QoS, Transport};
///
/// let broker = LocalBroker::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let sink = Arc::clone(&seen);
/// broker
///     .subscribe(
///         "devices/+/state",
///         Arc::new(move |msg: &InboundMessage| sink.lock().push(msg.topic.clone())),
///     )
///     .unwrap();
///
/// broker.publish("devices/psu1/state", &[120, 2], false, QoS::AtMostOnce).unwrap();
/// assert_eq!(*seen.lock(), ["devices/psu1/state"]);
/// ```
#[derive(Clone)]
pub struct LocalBroker {
    inner: Arc<Inner>,
}

impl LocalBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: ListenerSet::new(),
                retained: RwLock::new(BTreeMap::new()),
                sessions: RwLock::new(HashSet::new()),
                hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers a session lifecycle hook.
    ///
    /// Hooks run in registration order.
    pub fn add_hook(&self, hook: Arc<dyn SessionHook>) {
        self.inner.hooks.write().push(hook);
    }

    /// Opens a session for `client_id` and runs the session hooks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionRejected`] if the id is already
    /// connected or a hook refuses the session. A refused session is closed
    /// again and hooks that already accepted it see a disconnect.
    pub fn connect(&self, client_id: &str) -> Result<()> {
        if !self.inner.sessions.write().insert(client_id.to_string()) {
            return Err(TransportError::SessionRejected {
                session: client_id.to_string(),
                reason: "session already connected".to_string(),
            }
            .into());
        }
        tracing::info!(session = %client_id, "Session established");

        let hooks = self.hooks();
        for (accepted, hook) in hooks.iter().enumerate() {
            if let Err(e) = hook.on_session_established(client_id) {
                self.inner.sessions.write().remove(client_id);
                for earlier in &hooks[..accepted] {
                    earlier.on_disconnect(client_id);
                }
                tracing::warn!(session = %client_id, error = %e, "Session rejected");
                return Err(TransportError::SessionRejected {
                    session: client_id.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Closes the session of `client_id` and runs the session hooks.
    ///
    /// Returns `false` if no such session was open.
    pub fn disconnect(&self, client_id: &str) -> bool {
        if !self.inner.sessions.write().remove(client_id) {
            return false;
        }
        tracing::info!(session = %client_id, "Session closed");
        for hook in self.hooks() {
            hook.on_disconnect(client_id);
        }
        true
    }

    /// Returns `true` if `client_id` has an open session.
    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.inner.sessions.read().contains(client_id)
    }

    /// Returns the number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Returns the retained payload stored for `topic`.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.inner
            .retained
            .read()
            .get(topic)
            .map(|r| r.payload.clone())
    }

    /// Publishes on behalf of a connected session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Publish`] if `client_id` has no open session
    /// or the topic is invalid.
    pub fn publish_from(
        &self,
        client_id: &str,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> std::result::Result<(), TransportError> {
        if !self.is_connected(client_id) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: format!("session {client_id} is not connected"),
            });
        }
        self.deliver(client_id, topic, payload, retain)
    }

    /// Closes every session and drops all hooks, listeners and retained
    /// messages.
    ///
    /// Hooks usually hold a handle to the broker, so this also breaks the
    /// resulting reference cycle.
    pub fn shutdown(&self) {
        let sessions: Vec<String> = self.inner.sessions.write().drain().collect();
        let hooks = std::mem::take(&mut *self.inner.hooks.write());
        for session in &sessions {
            for hook in &hooks {
                hook.on_disconnect(session);
            }
        }
        self.inner.listeners.clear();
        self.inner.retained.write().clear();
        tracing::info!(sessions = sessions.len(), "Broker shut down");
    }

    fn hooks(&self) -> Vec<Arc<dyn SessionHook>> {
        self.inner.hooks.read().clone()
    }

    fn deliver(
        &self,
        client_id: &str,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> std::result::Result<(), TransportError> {
        validate_topic(topic).map_err(|reason| TransportError::Publish {
            topic: topic.to_string(),
            reason: reason.to_string(),
        })?;

        if retain {
            let mut retained = self.inner.retained.write();
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(
                    topic.to_string(),
                    Retained {
                        client_id: client_id.to_string(),
                        payload: payload.to_vec(),
                    },
                );
            }
        }

        let reached = self.inner.listeners.dispatch(client_id, topic, payload);
        tracing::trace!(
            topic = %topic,
            client = %client_id,
            listeners = reached,
            "Routing message"
        );
        Ok(())
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBroker")
            .field("sessions", &self.session_count())
            .field("listeners", &self.listener_count())
            .field("retained", &self.inner.retained.read().len())
            .finish_non_exhaustive()
    }
}

impl Transport for LocalBroker {
    fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> std::result::Result<ListenerId, TransportError> {
        validate_filter(filter).map_err(|reason| TransportError::Subscribe {
            filter: filter.to_string(),
            reason: reason.to_string(),
        })?;

        let id = self.inner.listeners.add(filter, Arc::clone(&handler));
        tracing::debug!(filter = %filter, listener = %id, "Listener registered");

        let replay: Vec<InboundMessage> = self
            .inner
            .retained
            .read()
            .iter()
            .filter(|(topic, _)| matches(filter, topic))
            .map(|(topic, retained)| InboundMessage {
                client_id: retained.client_id.clone(),
                listener_id: id,
                topic: topic.clone(),
                payload: retained.payload.clone(),
            })
            .collect();
        for message in &replay {
            handler(message);
        }

        Ok(id)
    }

    fn unsubscribe(&self, listener: ListenerId) -> bool {
        let removed = self.inner.listeners.remove(listener).is_some();
        if removed {
            tracing::debug!(listener = %listener, "Listener removed");
        }
        removed
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        _qos: QoS,
    ) -> std::result::Result<(), TransportError> {
        self.deliver(INLINE_CLIENT_ID, topic, payload, retain)
    }
}
