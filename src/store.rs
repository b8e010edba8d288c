// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Object store client interface.
//!
//! Reconcilers never talk to `kube::Api` directly. They go through the
//! [`ObjectStore`] trait, keyed by kind (the Rust type), namespace and name:
//!
//! - [`KubeStore`] forwards to the Kubernetes API server
//! - [`MemoryStore`] keeps objects in memory with resourceVersion conflicts
//!   and write counters, and backs the unit tests
//!
//! All operations return [`OperatorError`], so callers can tell a missing
//! object or a conflict apart from any other failure.
//!
//! # Example
//!
//! ```rust,no_run
//! use elastic_operator::store::{get_if_exists, ObjectStore};
//! use k8s_openapi::api::core::v1::Secret;
//!
//! async fn example<S: ObjectStore>(store: &S) -> elastic_operator::errors::Result<()> {
//!     if let Some(secret) = get_if_exists::<Secret, _>(store, "default", "es1-es-elastic-user").await? {
//!         println!("found {:?}", secret.metadata.name);
//!     }
//!     Ok(())
//! }
//! ```

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, WriteCounts};

use crate::errors::{OperatorError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Namespaced Kubernetes objects the store can persist.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// CRUD access to namespaced objects, keyed by kind/namespace/name.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one object.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NotFound`] if the object does not exist.
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K>;

    /// List objects carrying every label in `labels`.
    ///
    /// `namespace = None` lists across all namespaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane call fails.
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    /// Create an object in the namespace set in its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Conflict`] if the object already exists.
    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Replace an object. The `resourceVersion` in its metadata is checked.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Conflict`] on a stale `resourceVersion` and
    /// [`OperatorError::NotFound`] if the object is gone.
    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource of an object.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectStore::update`].
    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Delete an object.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NotFound`] if the object does not exist.
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Fetch an object, mapping not-found to `None`.
///
/// # Errors
///
/// Returns any error other than not-found.
pub async fn get_if_exists<K: StoreObject, S: ObjectStore + ?Sized>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<Option<K>> {
    match store.get::<K>(namespace, name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Delete an object, treating not-found as success.
///
/// # Errors
///
/// Returns any error other than not-found.
pub async fn delete_if_exists<K: StoreObject, S: ObjectStore + ?Sized>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<()> {
    match store.delete::<K>(namespace, name).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Build a controller owner reference pointing at `owner`.
///
/// # Errors
///
/// Returns a validation error if the owner has no UID yet.
pub fn controller_reference<O>(owner: &O) -> Result<OwnerReference>
where
    O: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::Validation(format!(
            "{} {} has no uid, cannot own other objects",
            O::kind(&()),
            owner.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

/// Whether `obj` has a controller owner reference with the given UID.
#[must_use]
pub fn is_controlled_by<K: ResourceExt>(obj: &K, owner_uid: &str) -> bool {
    obj.owner_references()
        .iter()
        .any(|r| r.uid == owner_uid && r.controller == Some(true))
}

/// Whether `labels` contains every pair of `selector`.
#[must_use]
pub fn labels_match(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Render a label selector as a `key=value,...` query string.
#[must_use]
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
