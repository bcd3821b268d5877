//! Observer registry for channel callbacks.
//!
//! Each callback list is an [`ObserverList`]; all lists of one channel draw
//! their [`SubscriptionId`]s from one shared counter, so a single id is enough
//! to unsubscribe from whichever list it belongs to.
//!
//! Callbacks run synchronously on the task that produced the event, outside
//! every channel lock. A panicking callback is caught and logged; the other
//! callbacks still run and the channel is unaffected.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::demux::Message;
use crate::error::ChannelError;
use crate::lock;
use crate::state::ConnectionState;

/// Handle returned by every subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks for one kind of event.
pub(crate) struct ObserverList<T: ?Sized> {
    name: &'static str,
    entries: Mutex<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T: ?Sized> ObserverList<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn insert(&self, id: SubscriptionId, callback: Callback<T>) {
        lock(&self.entries).push((id, callback));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Invoke every callback with `event`, in subscription order.
    pub(crate) fn emit(&self, event: &T) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let snapshot: Vec<(SubscriptionId, Callback<T>)> = lock(&self.entries).clone();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(
                    observer = self.name,
                    subscription = id.get(),
                    "Observer callback panicked"
                );
            }
        }
    }
}

/// All callback lists of one channel.
pub(crate) struct Observers {
    next_id: AtomicU64,
    pub(crate) message: ObserverList<Bytes>,
    pub(crate) connection: ObserverList<ConnectionState>,
    pub(crate) error: ObserverList<ChannelError>,
    pub(crate) notification: ObserverList<Message>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            message: ObserverList::new("on_message"),
            connection: ObserverList::new("on_connection_change"),
            error: ObserverList::new("on_error"),
            notification: ObserverList::new("notification"),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add<T: ?Sized>(
        &self,
        list: &ObserverList<T>,
        callback: Callback<T>,
    ) -> SubscriptionId {
        let id = self.next_id();
        list.insert(id, callback);
        id
    }

    /// Remove `id` from whichever list holds it.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.message.remove(id)
            || self.connection.remove(id)
            || self.error.remove(id)
            || self.notification.remove(id)
    }
}
