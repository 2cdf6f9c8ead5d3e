// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Listener bookkeeping shared by the transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::topic::matches;
use super::{InboundMessage, ListenerId, MessageHandler};

struct Listener {
    id: ListenerId,
    filter: String,
    handler: MessageHandler,
}

/// Topic listeners keyed by [`ListenerId`].
///
/// Routing snapshots the matching handlers under the read lock and invokes
/// them after releasing it, so handlers may subscribe, unsubscribe or
/// publish without deadlocking.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adds a listener and returns its id.
    pub(crate) fn add(&self, filter: &str, handler: MessageHandler) -> ListenerId {
        let id = self.next_id();
        self.listeners.write().push(Listener {
            id,
            filter: filter.to_string(),
            handler,
        });
        id
    }

    /// Adds a listener, calling `on_first` beforehand if no other listener
    /// uses `filter`.
    ///
    /// The check, `on_first` and the insertion happen under one write lock.
    /// Nothing is added if `on_first` fails.
    pub(crate) fn add_with<E>(
        &self,
        filter: &str,
        handler: MessageHandler,
        on_first: impl FnOnce() -> Result<(), E>,
    ) -> Result<ListenerId, E> {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| l.filter == filter) {
            on_first()?;
        }
        let id = self.next_id();
        listeners.push(Listener {
            id,
            filter: filter.to_string(),
            handler,
        });
        Ok(id)
    }

    /// Removes a listener and returns its filter.
    pub(crate) fn remove(&self, id: ListenerId) -> Option<String> {
        self.remove_with(id, |_| {})
    }

    /// Removes a listener, calling `on_last` with its filter if no other
    /// listener uses it any more.
    ///
    /// The removal and `on_last` happen under one write lock.
    pub(crate) fn remove_with(&self, id: ListenerId, on_last: impl FnOnce(&str)) -> Option<String> {
        let mut listeners = self.listeners.write();
        let index = listeners.iter().position(|l| l.id == id)?;
        let filter = listeners.swap_remove(index).filter;
        if !listeners.iter().any(|l| l.filter == filter) {
            on_last(&filter);
        }
        Some(filter)
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Delivers a message to every listener whose filter matches `topic`.
    ///
    /// Returns the number of listeners reached.
    pub(crate) fn dispatch(&self, client_id: &str, topic: &str, payload: &[u8]) -> usize {
        let targets: Vec<(ListenerId, MessageHandler)> = self
            .listeners
            .read()
            .iter()
            .filter(|l| matches(&l.filter, topic))
            .map(|l| (l.id, Arc::clone(&l.handler)))
            .collect();

        for (listener_id, handler) in &targets {
            handler(&InboundMessage {
                client_id: client_id.to_string(),
                listener_id: *listener_id,
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
        targets.len()
    }
}
