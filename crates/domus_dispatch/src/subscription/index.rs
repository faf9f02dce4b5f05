//! Subscription Index
//!
//! Inverted index from attribute value to the set of subscription ids that
//! accept it. Matching a message is one union plus one intersection per
//! column, independent of how many subscriptions exist.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Column, Filter, Handler, HandlerResult, SubscriptionError, SubscriptionId};
use crate::intset::IntSet;
use crate::message::{Message, MessageType};
use crate::registry::EventRegistry;

/// Default id capacity reserved in each wildcard bucket
pub const DEFAULT_CAPACITY: usize = 1024;

const WILDCARD: &str = "";

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

struct Index {
    next_id: usize,
    handlers: HashMap<SubscriptionId, Handler>,
    /// One map per column: value -> ids; the "" key is the wildcard bucket
    columns: [HashMap<String, IntSet>; 6],
}

impl Index {
    fn new(capacity: usize) -> Self {
        let columns = std::array::from_fn(|_| {
            let mut column = HashMap::new();
            column.insert(WILDCARD.to_string(), IntSet::with_capacity(capacity));
            column
        });

        Self {
            next_id: 1,
            handlers: HashMap::new(),
            columns,
        }
    }

    /// Ids accepting the message's value in one column
    fn candidates(&self, column: Column, msg: &Message) -> IntSet {
        let buckets = &self.columns[column.index()];
        let mut ids = buckets.get(WILDCARD).cloned().unwrap_or_default();

        let key = column.key(msg);
        if !key.is_empty() {
            if let Some(bucket) = buckets.get(key.as_ref()) {
                ids.union_with(bucket);
            }
        }
        ids
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscribers
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of message handlers, indexed for fast matching
///
/// Reads happen on every message and writes only when objects start or
/// stop, so the index sits behind a read-write lock. Handlers are returned
/// as cloned `Arc`s and invoked with no lock held.
pub struct Subscribers {
    registry: Arc<dyn EventRegistry>,
    index: RwLock<Index>,
}

impl Subscribers {
    /// Create an empty index validating event names against `registry`
    pub fn new(registry: Arc<dyn EventRegistry>) -> Self {
        Self::with_capacity(registry, DEFAULT_CAPACITY)
    }

    /// Create an empty index sized for roughly `capacity` subscriptions
    pub fn with_capacity(registry: Arc<dyn EventRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            index: RwLock::new(Index::new(capacity)),
        }
    }

    /// Register a handler for messages matching `filter`
    pub fn add_handler<F>(&self, filter: Filter, handler: F) -> Result<SubscriptionId, SubscriptionError>
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_shared(filter, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn add_shared(&self, filter: Filter, handler: Handler) -> Result<SubscriptionId, SubscriptionError> {
        self.validate(&filter)?;

        let mut index = self.index.write();
        let id = SubscriptionId(index.next_id);
        index.next_id += 1;

        for column in Column::ALL {
            index.columns[column.index()]
                .entry(filter.key(column).into_owned())
                .or_default()
                .add(id.0);
        }
        index.handlers.insert(id, handler);

        debug!(subscription = %id, ?filter, "Handler subscribed");
        Ok(id)
    }

    /// Remove a handler, returning `false` if the id was not registered
    pub fn delete_handler(&self, id: SubscriptionId) -> bool {
        let mut index = self.index.write();
        if index.handlers.remove(&id).is_none() {
            return false;
        }

        for buckets in index.columns.iter_mut() {
            buckets.retain(|key, ids| {
                ids.remove(id.0);
                key == WILDCARD || !ids.is_empty()
            });
        }

        debug!(subscription = %id, "Handler unsubscribed");
        true
    }

    /// Handlers whose filter matches `msg`, in ascending id order
    pub fn get_handlers(&self, msg: &Message) -> Vec<(SubscriptionId, Handler)> {
        let index = self.index.read();

        let mut matched = index.candidates(Column::Publisher, msg);
        if matched.is_empty() {
            return Vec::new();
        }

        for &column in &Column::ALL[1..] {
            matched.intersect_with(&index.candidates(column, msg));
            if matched.is_empty() {
                return Vec::new();
            }
        }

        matched
            .iter()
            .filter_map(|raw| {
                let id = SubscriptionId(raw);
                index.handlers.get(&id).map(|handler| (id, Arc::clone(handler)))
            })
            .collect()
    }

    /// Check if a subscription is still registered
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.index.read().handlers.contains_key(&id)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.index.read().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().handlers.is_empty()
    }

    fn validate(&self, filter: &Filter) -> Result<(), SubscriptionError> {
        if let Some(target_id) = filter.target_id {
            if target_id < 1 {
                return Err(SubscriptionError::InvalidTargetId(target_id));
            }
        }

        if filter.msg_type == Some(MessageType::Event) {
            if let Some(name) = filter.name.as_deref() {
                if !self.registry.lookup(name) {
                    return Err(SubscriptionError::UnknownEvent(name.to_string()));
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("handlers", &self.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
