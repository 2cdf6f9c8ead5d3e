// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of a device's reported properties.
///
/// A `State` is never edited after a device publishes it: every inbound
/// report produces a fresh value that replaces the previous one as a whole.
/// Devices hand snapshots out as `Arc<State>` so readers share them cheaply.
///
/// Properties are kept ordered, which makes the JSON form (a flat object of
/// string pairs) deterministic.
///
/// # Examples
///
/// ```
/// use relayhub::types::State;
///
/// let state: State = [("voltage", "120"), ("current", "2")].into_iter().collect();
/// assert_eq!(state.get("voltage"), Some("120"));
/// assert_eq!(
///     serde_json::to_string(&state).unwrap(),
///     r#"{"current":"2","voltage":"120"}"#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    properties: BTreeMap<String, String>,
}

impl State {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this state with one property set.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for State
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for State {
    fn from(properties: BTreeMap<String, String>) -> Self {
        Self { properties }
    }
}
