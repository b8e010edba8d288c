// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for managed resources.
//!
//! A reconciler registers the finalizers it needs for every pass through
//! [`handle_finalizers`]:
//!
//! - while the resource lives, every missing finalizer name is added (one
//!   update, and only when something is missing)
//! - once the resource is marked for deletion, the cleanup of every
//!   registered finalizer still present on it runs, and the names whose
//!   cleanup succeeded are removed in one update
//!
//! Cleanups must be idempotent: after a conflict they run again.
//!
//! # Example
//!
//! ```rust,no_run
//! use elastic_operator::reconcilers::finalizers::{handle_finalizers, Finalizer, WatchFinalizer};
//! use elastic_operator::store::ObjectStore;
//! use elastic_operator::watches::WatchRegistry;
//! use elastic_operator::crd::Logstash;
//!
//! async fn example<S: ObjectStore>(
//!     store: &S,
//!     registry: &WatchRegistry,
//!     mut ls: Logstash,
//! ) -> elastic_operator::errors::Result<()> {
//!     let watch = WatchFinalizer::new(
//!         "finalizer.logstash.k8s.elastic.co/secure-settings-secret",
//!         vec![(registry, "default-ls1-secure-settings".to_string())],
//!     );
//!     handle_finalizers(store, &mut ls, &[&watch]).await
//! }
//! ```

use crate::errors::{OperatorError, Result};
use crate::store::{ObjectStore, StoreObject};
use crate::watches::WatchRegistry;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A named cleanup action guarding the deletion of a resource.
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Finalizer name stored in `metadata.finalizers`.
    fn name(&self) -> String;

    /// Release what the finalizer guards.
    ///
    /// # Errors
    ///
    /// If this returns an error the finalizer is kept and deletion stays
    /// blocked until a later pass succeeds.
    async fn finalize(&self) -> Result<()>;
}

/// Finalizer removing dynamic watch registrations.
pub struct WatchFinalizer<'a> {
    name: String,
    registrations: Vec<(&'a WatchRegistry, String)>,
}

impl<'a> WatchFinalizer<'a> {
    /// Finalizer `name` removing each `(registry, registration name)` pair.
    #[must_use]
    pub fn new(name: impl Into<String>, registrations: Vec<(&'a WatchRegistry, String)>) -> Self {
        Self {
            name: name.into(),
            registrations,
        }
    }
}

#[async_trait]
impl Finalizer for WatchFinalizer<'_> {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn finalize(&self) -> Result<()> {
        for (registry, key) in &self.registrations {
            registry.remove_handler_for_key(key);
        }
        Ok(())
    }
}

/// Add missing finalizers, or run and remove them once `resource` is being deleted.
///
/// `resource` is replaced by the stored object after each write, so callers
/// continue with a fresh `resourceVersion`.
///
/// # Arguments
///
/// * `store` - Object store
/// * `resource` - The managed resource
/// * `finalizers` - Finalizers this reconciler is responsible for
///
/// # Errors
///
/// Returns the store error of the finalizer update (conflicts included), or
/// the first cleanup error once the successful removals are persisted.
pub async fn handle_finalizers<K, S>(
    store: &S,
    resource: &mut K,
    finalizers: &[&dyn Finalizer],
) -> Result<()>
where
    K: StoreObject,
    S: ObjectStore + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let present: BTreeSet<String> = resource.finalizers().iter().cloned().collect();

    if resource.meta().deletion_timestamp.is_none() {
        let missing: Vec<String> = finalizers
            .iter()
            .map(|f| f.name())
            .filter(|n| !present.contains(n))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        info!(
            kind = %K::kind(&()),
            namespace = %namespace,
            name = %name,
            finalizers = ?missing,
            "Adding finalizers"
        );
        resource.finalizers_mut().extend(missing);
        *resource = store.update(resource).await?;
        return Ok(());
    }

    let mut removed = BTreeSet::new();
    let mut failure: Option<OperatorError> = None;
    for finalizer in finalizers {
        let finalizer_name = finalizer.name();
        if !present.contains(&finalizer_name) {
            continue;
        }
        match finalizer.finalize().await {
            Ok(()) => {
                debug!(namespace = %namespace, name = %name, finalizer = %finalizer_name, "Finalizer executed");
                removed.insert(finalizer_name);
            }
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    name = %name,
                    finalizer = %finalizer_name,
                    error = %e,
                    "Finalizer failed, keeping it"
                );
                failure.get_or_insert(e);
            }
        }
    }

    if !removed.is_empty() {
        info!(
            kind = %K::kind(&()),
            namespace = %namespace,
            name = %name,
            finalizers = ?removed,
            "Removing finalizers"
        );
        resource.finalizers_mut().retain(|f| !removed.contains(f));
        *resource = store.update(resource).await?;
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Whether the resource is marked for deletion.
#[must_use]
pub fn is_being_deleted<K: ResourceExt>(resource: &K) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
