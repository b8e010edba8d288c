// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Dynamic watches on objects the operator does not own.
//!
//! A managed resource often depends on objects it does not own: a Kibana
//! depends on the Elasticsearch cluster it references, a Logstash on the
//! credentials secret the association controller created for it. Changes to
//! those objects must re-trigger reconciliation of the dependent.
//!
//! A [`WatchRegistry`] records, under a caller-chosen registration name, which
//! watched objects should enqueue which watcher. Controllers register and
//! deregister interest while reconciling; the host's notification path calls
//! [`WatchRegistry::watchers_for`] to fan a change out to every interested
//! watcher. Registrations are independent: removing one never affects other
//! registrations on the same watched object.
//!
//! The registry is constructed once per controller at startup and injected
//! through the controller context. Every access is serialized by one mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use kube::ResourceExt;

/// Namespace + name identity of an object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name.
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Extract the key of a Kubernetes object.
    #[must_use]
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One registration: changes to any `watched` object enqueue `watcher`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedWatch {
    /// Registration name, unique within a registry
    pub name: String,
    /// Objects whose changes are of interest
    pub watched: Vec<ObjectKey>,
    /// Object to reconcile when a watched object changes
    pub watcher: ObjectKey,
}

#[derive(Debug, Default)]
struct Registrations {
    by_name: BTreeMap<String, NamedWatch>,
    reverse: BTreeMap<ObjectKey, BTreeSet<String>>,
}

impl Registrations {
    fn remove(&mut self, name: &str) -> Option<NamedWatch> {
        let existing = self.by_name.remove(name)?;
        for key in &existing.watched {
            if let Some(names) = self.reverse.get_mut(key) {
                names.remove(name);
                if names.is_empty() {
                    self.reverse.remove(key);
                }
            }
        }
        Some(existing)
    }
}

/// Thread-safe table of named watch registrations for one kind of watched object.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    inner: Mutex<Registrations>,
}

impl WatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registrations> {
        // A panic while holding the lock cannot leave the indexes half-updated
        // in a way later callers could not cope with, so poisoning is ignored.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register `watch`, replacing any registration with the same name.
    pub fn add_handler(&self, watch: NamedWatch) {
        let mut inner = self.lock();
        inner.remove(&watch.name);
        for key in &watch.watched {
            inner
                .reverse
                .entry(key.clone())
                .or_default()
                .insert(watch.name.clone());
        }
        inner.by_name.insert(watch.name.clone(), watch);
    }

    /// Remove the registration named `name`, if any.
    pub fn remove_handler_for_key(&self, name: &str) {
        self.lock().remove(name);
    }

    /// All watchers interested in changes to `key`, deduplicated and sorted.
    #[must_use]
    pub fn watchers_for(&self, key: &ObjectKey) -> Vec<ObjectKey> {
        let inner = self.lock();
        let Some(names) = inner.reverse.get(key) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| inner.by_name.get(name))
            .map(|w| w.watcher.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether a registration named `name` exists.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().by_name.contains_key(name)
    }

    /// Names of all current registrations, sorted.
    #[must_use]
    pub fn registrations(&self) -> Vec<String> {
        self.lock().by_name.keys().cloned().collect()
    }

    /// Registrations whose watcher is `watcher`.
    #[must_use]
    pub fn registrations_for_watcher(&self, watcher: &ObjectKey) -> Vec<String> {
        self.lock()
            .by_name
            .values()
            .filter(|w| &w.watcher == watcher)
            .map(|w| w.name.clone())
            .collect()
    }
}

/// The registries a controller consults when dispatching watch events.
#[derive(Debug, Default)]
pub struct DynamicWatches {
    /// Watches on Elasticsearch clusters
    pub elasticsearch_clusters: WatchRegistry,
    /// Watches on secrets
    pub secrets: WatchRegistry,
}

impl DynamicWatches {
    /// Create empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[path = "watches_tests.rs"]
mod watches_tests;
