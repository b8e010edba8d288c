// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ObjectStore`].
//!
//! Mirrors the API server semantics reconcilers depend on:
//!
//! - every write bumps a global `resourceVersion`, and updates carrying a
//!   stale one fail with a conflict
//! - `update` never touches status, `update_status` touches nothing else
//! - deleting an object that still has finalizers only sets its
//!   `deletionTimestamp`; it disappears once its last finalizer is removed
//!
//! Writes are counted per verb so tests can assert that a pass with nothing
//! to do performs no writes.

use super::{labels_match, ObjectStore, StoreObject};
use crate::errors::{OperatorError, Result};
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Number of writes performed against a [`MemoryStore`], per verb.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteCounts {
    /// `create` calls that succeeded
    pub creates: usize,
    /// `update` calls that succeeded
    pub updates: usize,
    /// `update_status` calls that succeeded
    pub status_updates: usize,
    /// `delete` calls that succeeded
    pub deletes: usize,
}

impl WriteCounts {
    /// Total number of writes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

type Key = (String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    uids: u64,
    writes: WriteCounts,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uids += 1;
        format!("00000000-0000-0000-0000-{:012}", self.uids)
    }
}

/// Object store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key_of<K: StoreObject>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn decode<K: StoreObject>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

fn stale_version(stored: &Value, incoming: &Value) -> bool {
    let incoming_rv = &incoming["metadata"]["resourceVersion"];
    !incoming_rv.is_null() && incoming_rv != &stored["metadata"]["resourceVersion"]
}

/// Wire form of `metav1.Time`: RFC 3339 with whole seconds in UTC.
fn deletion_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn finalizers_empty(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_none_or(Vec::is_empty)
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed an object as-is (status included) without counting a write.
    ///
    /// A UID is assigned when missing, and a fresh `resourceVersion` always.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be serialized.
    pub fn insert<K: StoreObject>(&self, obj: K) -> Result<K> {
        let mut state = self.lock();
        let mut value = serde_json::to_value(&obj)?;
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = Value::String(state.next_uid());
        }
        value["metadata"]["resourceVersion"] = Value::String(state.next_version());
        let key = key_of::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any());
        let stored = decode(&value)?;
        state.objects.insert(key, value);
        Ok(stored)
    }

    /// Writes performed since creation or the last [`MemoryStore::reset_writes`].
    #[must_use]
    pub fn writes(&self) -> WriteCounts {
        self.lock().writes
    }

    /// Reset the write counters.
    pub fn reset_writes(&self) {
        self.lock().writes = WriteCounts::default();
    }

    /// Whether an object exists.
    #[must_use]
    pub fn contains<K: StoreObject>(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .objects
            .contains_key(&key_of::<K>(namespace, name))
    }

    /// Every stored object of kind `K`.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored object does not decode as `K`.
    pub fn all<K: StoreObject>(&self) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, v)| decode(v))
            .collect()
    }

    /// Bump the `resourceVersion` of a stored object, simulating a concurrent writer.
    pub fn touch<K: StoreObject>(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let version = state.next_version();
        if let Some(value) = state.objects.get_mut(&key_of::<K>(namespace, name)) {
            value["metadata"]["resourceVersion"] = Value::String(version);
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let state = self.lock();
        match state.objects.get(&key_of::<K>(namespace, name)) {
            Some(value) => decode(value),
            None => Err(OperatorError::not_found(&K::kind(&()), namespace, name)),
        }
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let state = self.lock();
        let mut out = Vec::new();
        for ((k, ns, _), value) in &state.objects {
            if *k != kind || namespace.is_some_and(|n| n != ns) {
                continue;
            }
            let obj: K = decode(value)?;
            if labels_match(Some(obj.labels()), labels) {
                out.push(obj);
            }
        }
        Ok(out)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key_of::<K>(&namespace, &name);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(OperatorError::conflict(
                &K::kind(&()),
                &namespace,
                &name,
                "already exists",
            ));
        }
        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["uid"] = Value::String(state.next_uid());
        value["metadata"]["resourceVersion"] = Value::String(state.next_version());
        value["metadata"]["generation"] = Value::from(1);
        let created = decode(&value)?;
        state.objects.insert(key, value);
        state.writes.creates += 1;
        Ok(created)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key_of::<K>(&namespace, &name);
        let mut state = self.lock();
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Err(OperatorError::not_found(&K::kind(&()), &namespace, &name));
        };
        let mut value = serde_json::to_value(obj)?;
        if stale_version(&stored, &value) {
            return Err(OperatorError::conflict(
                &K::kind(&()),
                &namespace,
                &name,
                "the object has been modified",
            ));
        }

        if let Some(map) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["deletionTimestamp"] = stored["metadata"]["deletionTimestamp"].clone();
        let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        value["metadata"]["generation"] = if value.get("spec") == stored.get("spec") {
            Value::from(generation)
        } else {
            Value::from(generation + 1)
        };
        value["metadata"]["resourceVersion"] = Value::String(state.next_version());

        let updated = decode(&value)?;
        state.writes.updates += 1;
        if !stored["metadata"]["deletionTimestamp"].is_null() && finalizers_empty(&value) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value);
        }
        Ok(updated)
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key_of::<K>(&namespace, &name);
        let mut state = self.lock();
        let Some(mut stored) = state.objects.get(&key).cloned() else {
            return Err(OperatorError::not_found(&K::kind(&()), &namespace, &name));
        };
        let value = serde_json::to_value(obj)?;
        if stale_version(&stored, &value) {
            return Err(OperatorError::conflict(
                &K::kind(&()),
                &namespace,
                &name,
                "the object has been modified",
            ));
        }
        stored["status"] = value.get("status").cloned().unwrap_or_default();
        stored["metadata"]["resourceVersion"] = Value::String(state.next_version());
        let updated = decode(&stored)?;
        state.objects.insert(key, stored);
        state.writes.status_updates += 1;
        Ok(updated)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let key = key_of::<K>(namespace, name);
        let mut state = self.lock();
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Err(OperatorError::not_found(&K::kind(&()), namespace, name));
        };
        state.writes.deletes += 1;
        if finalizers_empty(&stored) {
            state.objects.remove(&key);
            return Ok(());
        }
        let mut marked = stored;
        if marked["metadata"]["deletionTimestamp"].is_null() {
            marked["metadata"]["deletionTimestamp"] =
                Value::String(deletion_timestamp());
        }
        marked["metadata"]["resourceVersion"] = Value::String(state.next_version());
        state.objects.insert(key, marked);
        Ok(())
    }
}
