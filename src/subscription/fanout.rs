// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded broadcast of values to a dynamic set of subscribers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default per-subscriber buffer capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Unique identifier for a subscription.
///
/// IDs are unique within the [`Fanout`] that issued them and are mostly
/// useful to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Broadcasts values to every current subscriber.
///
/// Built on tokio's broadcast channel. Each subscriber owns a ring buffer of
/// `capacity` entries:
///
/// - [`publish`](Self::publish) never blocks, even if a subscriber never
///   drains its buffer;
/// - a subscriber that falls behind loses the *oldest* entries, and the loss
///   is counted by [`Subscription::skipped`];
/// - values reach each subscriber in publish order.
///
/// Subscribers only see values published after they subscribed. Once
/// [`close`](Self::close)d, existing subscribers drain what is buffered and
/// then observe the end of the stream.
///
/// # Examples
///
/// ```
/// use relayhub::subscription::Fanout;
///
/// # #[tokio::main]
/// # async fn main() {
/// let fanout = Fanout::new();
/// let mut sub = fanout.subscribe();
///
/// assert_eq!(fanout.publish(42), 1);
/// assert_eq!(sub.recv().await, Some(42));
///
/// fanout.close();
/// assert_eq!(sub.recv().await, None);
/// # }
/// ```
pub struct Fanout<T> {
    sender: RwLock<Option<broadcast::Sender<T>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Fanout<T> {
    /// Creates a fanout with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a fanout whose subscribers buffer up to `capacity` values.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new subscriber. Never blocks.
    ///
    /// Subscribing to a closed fanout yields a subscription that is already
    /// at its end.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let receiver = match self.sender.read().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        };
        Subscription {
            id,
            receiver,
            skipped: 0,
        }
    }

    /// Publishes a value and returns how many subscribers it was queued for.
    ///
    /// Returns 0 when there are no subscribers or the fanout is closed.
    pub fn publish(&self, value: T) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |sender| sender.send(value).unwrap_or(0))
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Returns the per-subscriber buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ends the stream for every subscriber.
    ///
    /// Returns `false` if the fanout was already closed.
    pub fn close(&self) -> bool {
        self.sender.write().take().is_some()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

impl<T: Clone + Send + 'static> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Fanout<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.sender.read();
        f.debug_struct("Fanout")
            .field("capacity", &self.capacity)
            .field("closed", &guard.is_none())
            .field(
                "subscribers",
                &guard.as_ref().map_or(0, broadcast::Sender::receiver_count),
            )
            .finish()
    }
}

/// Receiving end of a [`Fanout`].
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// releases its buffer; the fanout stops queueing values for it.
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: broadcast::Receiver<T>,
    skipped: u64,
}

impl<T: Clone> Subscription<T> {
    /// Returns this subscription's identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next value.
    ///
    /// Returns `None` once the fanout is closed and the buffer is drained.
    /// Values dropped because this subscriber lagged are skipped over and
    /// added to [`skipped`](Self::skipped).
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(missed)) => self.record_lag(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered value without waiting.
    ///
    /// Returns `None` when nothing is buffered or the fanout is closed.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(missed)) => self.record_lag(missed),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Returns how many values this subscriber lost by falling behind.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Releases the subscription.
    pub fn unsubscribe(self) {
        tracing::trace!(subscription = %self.id, "Unsubscribed");
    }

    fn record_lag(&mut self, missed: u64) {
        self.skipped += missed;
        tracing::debug!(
            subscription = %self.id,
            missed,
            "Subscriber lagged, oldest values dropped"
        );
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}
