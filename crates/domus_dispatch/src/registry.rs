//! Event Registry
//!
//! Knows which event names can ever be published, so subscriptions to
//! events that do not exist are rejected up front.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Lookup of known event names
pub trait EventRegistry: Send + Sync {
    /// Check if an event with this name can be published
    fn lookup(&self, name: &str) -> bool;
}

/// Set-backed event registry
///
/// Device objects register the events they emit when they start.
#[derive(Debug, Default)]
pub struct EventNames {
    names: RwLock<HashSet<String>>,
}

impl EventNames {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event name, returning `false` if it was already known
    pub fn register(&self, name: impl Into<String>) -> bool {
        self.names.write().insert(name.into())
    }

    /// Number of registered names
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for EventNames {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: RwLock::new(iter.into_iter().map(Into::into).collect()),
        }
    }
}

impl EventRegistry for EventNames {
    fn lookup(&self, name: &str) -> bool {
        self.names.read().contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry: EventNames = ["object.port.on_press"].into_iter().collect();
        assert!(registry.lookup("object.port.on_press"));
        assert!(!registry.lookup("object.port.on_release"));

        assert!(registry.register("object.port.on_release"));
        assert!(!registry.register("object.port.on_release"));
        assert!(registry.lookup("object.port.on_release"));
        assert_eq!(registry.len(), 2);
    }
}
