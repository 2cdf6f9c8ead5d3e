// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP-facing request handling, independent of any web framework.
//!
//! A web server maps its routes onto [`AppContext`] and turns the returned
//! [`ApiResponse`] into a reply:
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /devices/{id}/state` | [`AppContext::get_device_state`] |
//! | `POST /devices/{id}/command` | [`AppContext::post_device_command`] |
//!
//! Both take the raw `Authorization` header value. When a token verifier is
//! configured, a missing or rejected `Bearer` token yields `401`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::manager::DeviceRegistry;
use crate::types::{Command, DeviceId, State};

/// Predicate deciding whether a bearer token is valid.
pub type TokenVerifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Last known state of every device that reported one.
///
/// Entries survive disconnection: a reader sees the last state a device had.
#[derive(Debug, Default)]
pub struct StateCache {
    states: RwLock<HashMap<DeviceId, Arc<State>>>,
}

impl StateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the state of a device, replacing any previous entry.
    pub fn insert(&self, id: DeviceId, state: Arc<State>) {
        self.states.write().insert(id, state);
    }

    /// Returns the cached state of a device.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<State>> {
        self.states.read().get(id).cloned()
    }

    /// Drops the entry of a device.
    pub fn remove(&self, id: &str) -> Option<Arc<State>> {
        self.states.write().remove(id)
    }

    /// Returns the number of cached devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

/// Status and optional JSON body of a handled request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    fn empty() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    fn error(status: u16, message: impl fmt::Display) -> Self {
        Self {
            status,
            body: Some(json!({ "error": message.to_string() })),
        }
    }

    fn unauthorized() -> Self {
        Self::error(401, "Unauthorized")
    }

    /// Returns `true` for a 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// Shared state of the request handlers.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use relayhub::DeviceRegistry;
/// use relayhub::service::AppContext;
///
/// let context = AppContext::new(Arc::new(DeviceRegistry::new()))
///     .with_token_verifier(|token| token == "secret");
///
/// assert_eq!(context.get_device_state(None, "psu1").status, 401);
///
/// let response = context.get_device_state(Some("Bearer secret"), "psu1");
/// assert_eq!(response.status, 200);
/// assert_eq!(response.body, Some(serde_json::json!({})));
/// ```
pub struct AppContext {
    registry: Arc<DeviceRegistry>,
    cache: Arc<StateCache>,
    verifier: Option<TokenVerifier>,
}

impl AppContext {
    /// Creates a context over `registry` with an empty cache and no
    /// authentication.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            cache: Arc::new(StateCache::new()),
            verifier: None,
        }
    }

    /// Requires a bearer token accepted by `verifier` on every request.
    #[must_use]
    pub fn with_token_verifier(
        mut self,
        verifier: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    /// Returns the device registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Returns the state cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    /// Starts the task that keeps the cache in sync with registry state
    /// changes.
    ///
    /// Changes that happen after this call are cached. Abort the returned
    /// handle to stop the task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeUnavailable`] outside a Tokio runtime.
    pub fn spawn_cache_updater(&self) -> Result<JoinHandle<()>> {
        let runtime = Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;
        let mut changes = self.registry.subscribe_state_changes();
        let cache = Arc::clone(&self.cache);

        Ok(runtime.spawn(async move {
            while let Some(device) = changes.recv().await {
                cache.insert(device.id().clone(), device.state());
            }
            tracing::debug!(skipped = changes.skipped(), "State cache updater stopped");
        }))
    }

    /// Handles `GET /devices/{id}/state`.
    ///
    /// Returns `200` with the cached state, `{}` if none is known.
    #[must_use]
    pub fn get_device_state(&self, authorization: Option<&str>, id: &str) -> ApiResponse {
        if !self.authorize(authorization) {
            return ApiResponse::unauthorized();
        }
        let Some(state) = self.cache.get(id) else {
            return ApiResponse::ok(json!({}));
        };
        match serde_json::to_value(&*state) {
            Ok(body) => ApiResponse::ok(body),
            Err(e) => ApiResponse::error(500, e),
        }
    }

    /// Handles `POST /devices/{id}/command` with a `{"name", "args"}` body.
    #[must_use]
    pub fn post_device_command(
        &self,
        authorization: Option<&str>,
        id: &str,
        body: &[u8],
    ) -> ApiResponse {
        if !self.authorize(authorization) {
            return ApiResponse::unauthorized();
        }
        let command: Command = match serde_json::from_slice(body) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(device = %id, error = %e, "Malformed command body");
                return ApiResponse::error(400, format!("malformed command: {e}"));
            }
        };

        match self.registry.send_command(id, &command) {
            Ok(()) => {
                tracing::debug!(device = %id, %command, "Command accepted");
                ApiResponse::empty()
            }
            Err(e) => {
                tracing::debug!(device = %id, %command, error = %e, "Command failed");
                ApiResponse::error(status_for(&e), e)
            }
        }
    }

    fn authorize(&self, authorization: Option<&str>) -> bool {
        let Some(verifier) = &self.verifier else {
            return true;
        };
        let accepted = authorization
            .and_then(bearer_token)
            .is_some_and(|token| verifier(token));
        if !accepted {
            tracing::warn!("Rejected request with missing or invalid token");
        }
        accepted
    }
}

fn status_for(error: &Error) -> u16 {
    match error {
        Error::DeviceNotFound(_) => 404,
        Error::Command(_) | Error::Decode(_) => 400,
        Error::Transport(_) => 502,
        Error::Config(_) | Error::RuntimeUnavailable => 500,
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("registry", &self.registry)
            .field("cached", &self.cache.len())
            .field("authenticated", &self.verifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::HubConfig;
    use crate::device::{Device, DeviceFault};
    use crate::error::TransportError;
    use crate::manager::DeviceProvisioner;
    use crate::protocol::LocalBroker;
    use crate::subscription::{Fanout, Subscription};
    use crate::types::CommandDescriptor;

    fn stack() -> (LocalBroker, AppContext) {
        let broker = LocalBroker::new();
        let registry = Arc::new(DeviceRegistry::new());
        broker.add_hook(Arc::new(DeviceProvisioner::new(
            Arc::new(broker.clone()),
            Arc::clone(&registry),
            HubConfig::default(),
        )));
        (broker, AppContext::new(registry))
    }

    #[derive(Debug)]
    struct UnreachableDevice {
        id: DeviceId,
        commands: Vec<CommandDescriptor>,
        states: Fanout<Arc<State>>,
        faults: Fanout<DeviceFault>,
    }

    impl Device for UnreachableDevice {
        fn id(&self) -> &DeviceId {
            &self.id
        }

        fn list_commands(&self) -> &[CommandDescriptor] {
            &self.commands
        }

        fn send_command(&self, _command: &Command) -> Result<()> {
            Err(TransportError::Closed.into())
        }

        fn state(&self) -> Arc<State> {
            Arc::new(State::new())
        }

        fn subscribe_state_changes(&self) -> Subscription<Arc<State>> {
            self.states.subscribe()
        }

        fn subscribe_errors(&self) -> Subscription<DeviceFault> {
            self.faults.subscribe()
        }
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer a b"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn verifier_guards_both_routes() {
        let context = AppContext::new(Arc::new(DeviceRegistry::new()))
            .with_token_verifier(|token| token == "secret");

        assert_eq!(context.get_device_state(Some("Bearer wrong"), "x").status, 401);
        assert_eq!(context.get_device_state(Some("secret"), "x").status, 401);
        assert_eq!(
            context
                .post_device_command(None, "x", br#"{"name":"power","args":["on"]}"#)
                .status,
            401
        );
        assert_eq!(context.get_device_state(Some("Bearer secret"), "x").status, 200);
    }

    #[test]
    fn unknown_device_state_is_empty_object() {
        let context = AppContext::new(Arc::new(DeviceRegistry::new()));
        let response = context.get_device_state(None, "ghost");
        assert_eq!(response, ApiResponse::ok(json!({})));
    }

    #[tokio::test]
    async fn command_routes_to_device() {
        let (broker, context) = stack();
        broker.connect("psu1").unwrap();

        let response =
            context.post_device_command(None, "psu1", br#"{"name":"power","args":["on"]}"#);

        assert_eq!(response, ApiResponse::empty());
        assert_eq!(broker.retained("devices/psu1/command"), Some(vec![0x01]));
        broker.shutdown();
    }

    #[tokio::test]
    async fn command_failures_map_to_status() {
        let (broker, context) = stack();
        broker.connect("psu1").unwrap();

        let malformed = context.post_device_command(None, "psu1", b"{not json");
        assert_eq!(malformed.status, 400);

        let invalid = context.post_device_command(None, "psu1", br#"{"name":"power","args":["dim"]}"#);
        assert_eq!(invalid.status, 400);
        assert!(invalid.body.unwrap()["error"].as_str().unwrap().contains("dim"));

        let missing = context.post_device_command(None, "ghost", br#"{"name":"power","args":["on"]}"#);
        assert_eq!(missing.status, 404);

        assert_eq!(broker.retained("devices/psu1/command"), None);
        broker.shutdown();
    }

    #[tokio::test]
    async fn transport_failure_is_bad_gateway() {
        let context = AppContext::new(Arc::new(DeviceRegistry::new()));
        context
            .registry()
            .add_device(Arc::new(UnreachableDevice {
                id: DeviceId::from("far"),
                commands: vec![CommandDescriptor::new("ping")],
                states: Fanout::new(),
                faults: Fanout::new(),
            }))
            .unwrap();

        let response = context.post_device_command(None, "far", br#"{"name":"ping"}"#);
        assert_eq!(response.status, 502);
    }

    #[tokio::test]
    async fn cache_follows_state_reports() {
        let (broker, context) = stack();
        let updater = context.spawn_cache_updater().unwrap();
        broker.connect("psu1").unwrap();

        broker
            .publish_from("psu1", "devices/psu1/state", &[120, 2], false)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while context.cache().get("psu1").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let response = context.get_device_state(None, "psu1");
        assert_eq!(
            response.body,
            Some(json!({"voltage": "120", "current": "2"}))
        );

        broker.shutdown();
        updater.abort();
    }

    #[test]
    fn updater_needs_runtime() {
        let context = AppContext::new(Arc::new(DeviceRegistry::new()));
        assert!(matches!(
            context.spawn_cache_updater(),
            Err(Error::RuntimeUnavailable)
        ));
    }
}
