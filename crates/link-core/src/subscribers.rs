use std::{collections::HashMap, fmt, hash::Hash, sync::Arc};

use serde::{Deserialize, Serialize};

/// Shared subscriber callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

/// Token returned on subscribe, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Ordered list of callbacks for one event stream.
pub struct CallbackList<E> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback<E>)>,
}

impl<E> Default for CallbackList<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<E> CallbackList<E> {
    pub fn add(&mut self, callback: Callback<E>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, callback));
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Call every callback registered at the time of the call, in order.
    ///
    /// Iterates a snapshot, so callbacks added or removed meanwhile only take
    /// effect on the next dispatch.
    pub fn dispatch(&self, event: &E) {
        for callback in self.snapshot() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self) -> Vec<Callback<E>> {
        self.entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }
}

impl<E> fmt::Debug for CallbackList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Callback lists keyed by event kind.
pub struct SubscriberTable<K, E> {
    next_id: u64,
    lists: HashMap<K, Vec<(SubscriptionId, Callback<E>)>>,
}

impl<K, E> Default for SubscriberTable<K, E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            lists: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy, E> SubscriberTable<K, E> {
    pub fn on(&mut self, kind: K, callback: Callback<E>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.lists.entry(kind).or_default().push((id, callback));
        id
    }

    pub fn off(&mut self, kind: K, id: SubscriptionId) -> bool {
        let Some(list) = self.lists.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(entry_id, _)| *entry_id != id);
        list.len() != before
    }

    /// Call the callbacks registered for `kind`, in registration order.
    pub fn dispatch(&self, kind: K, event: &E) {
        let snapshot: Vec<Callback<E>> = match self.lists.get(&kind) {
            Some(list) => list.iter().map(|(_, callback)| callback.clone()).collect(),
            None => return,
        };
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn count(&self, kind: K) -> usize {
        self.lists.get(&kind).map_or(0, Vec::len)
    }
}

impl<K, E> fmt::Debug for SubscriberTable<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: usize = self.lists.values().map(Vec::len).sum();
        f.debug_struct("SubscriberTable")
            .field("subscriptions", &total)
            .finish()
    }
}
