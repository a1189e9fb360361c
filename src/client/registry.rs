//! Subscription Registry
//!
//! Maps each channel to its subscriptions in registration order. Entries
//! live in a generational arena so cancellation handles are plain
//! `(index, generation)` tokens: a stale token never matches a reused slot.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{Channel, Envelope};

/// Subscriber callback. Errors are logged and never reach other subscribers.
pub type Callback = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Registry shared between the client facade and the dispatch task
pub type SharedRegistry = Arc<Mutex<SubscriptionRegistry>>;

pub(crate) fn lock(registry: &Mutex<SubscriptionRegistry>) -> MutexGuard<'_, SubscriptionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opaque token identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    index: u32,
    generation: u32,
}

/// Attribute-equality predicate over the fields of an envelope's `data`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Map<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `data[key] == value`
    pub fn require(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Every filter field must be present in `data` with an equal value
    pub fn matches(&self, data: Option<&Value>) -> bool {
        if self.fields.is_empty() {
            return true;
        }
        match data {
            Some(Value::Object(object)) => self
                .fields
                .iter()
                .all(|(key, expected)| object.get(key) == Some(expected)),
            _ => false,
        }
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

struct Entry {
    channel: Channel,
    callback: Callback,
    filter: Option<Filter>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// What a removal changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub channel: Channel,
    /// The channel has no subscriptions left
    pub channel_emptied: bool,
}

/// Channel → ordered set of (callback, filter)
#[derive(Default)]
pub struct SubscriptionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    channels: BTreeMap<Channel, Vec<SubscriptionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. The flag is true when the channel had none before.
    pub fn insert(
        &mut self,
        channel: Channel,
        callback: Callback,
        filter: Option<Filter>,
    ) -> (SubscriptionId, bool) {
        let entry = Entry {
            channel,
            callback,
            filter,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                SubscriptionId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                SubscriptionId {
                    index,
                    generation: 0,
                }
            }
        };

        let ids = self.channels.entry(channel).or_default();
        let first = ids.is_empty();
        ids.push(id);
        (id, first)
    }

    /// Remove one subscription; `None` if the token is stale
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Removal> {
        let channel = self.release(id)?;

        let ids = self.channels.get_mut(&channel)?;
        ids.retain(|existing| *existing != id);
        let channel_emptied = ids.is_empty();
        if channel_emptied {
            self.channels.remove(&channel);
        }

        Some(Removal {
            channel,
            channel_emptied,
        })
    }

    /// Remove every subscription on a channel, returning how many were dropped
    pub fn remove_channel(&mut self, channel: Channel) -> usize {
        let ids = self.channels.remove(&channel).unwrap_or_default();
        for id in &ids {
            self.release(*id);
        }
        ids.len()
    }

    fn release(&mut self, id: SubscriptionId) -> Option<Channel> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry.channel)
    }

    /// Callbacks that should receive this envelope, in registration order
    pub fn matching(&self, envelope: &Envelope) -> Vec<Callback> {
        let Some(channel) = envelope.channel else {
            return Vec::new();
        };
        let Some(ids) = self.channels.get(&channel) else {
            return Vec::new();
        };

        ids.iter()
            .filter_map(|id| self.slots.get(id.index as usize)?.entry.as_ref())
            .filter(|entry| {
                entry
                    .filter
                    .as_ref()
                    .map_or(true, |f| f.matches(envelope.data.as_ref()))
            })
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.entry.is_some())
    }

    /// Channels with at least one live subscription
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.keys().copied().collect()
    }

    pub fn count(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels)
            .finish()
    }
}
