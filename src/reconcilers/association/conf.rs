// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Association configuration side-table and its annotation persistence.
//!
//! The resolved connection details of an association live in the
//! `association.k8s.elastic.co/es-conf` annotation of the dependent resource.
//! In memory they are kept in an [`AssociationTable`], keyed by kind and
//! namespace/name, and only ever accessed through its methods.

use crate::constants::ASSOCIATION_CONF_ANNOTATION;
use crate::crd::AssociationConf;
use crate::errors::Result;
use crate::store::{ObjectStore, StoreObject};
use crate::watches::ObjectKey;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Parse the association configuration annotation of `obj`.
///
/// A missing or blank annotation is `None`.
///
/// # Errors
///
/// Returns a serialization error if the annotation is not valid JSON.
pub fn conf_from_annotation<K: ResourceExt>(obj: &K) -> Result<Option<AssociationConf>> {
    match obj.annotations().get(ASSOCIATION_CONF_ANNOTATION) {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(serde_json::from_str(raw)?)),
        _ => Ok(None),
    }
}

/// Persist `conf` in the annotation of `resource`, or remove the annotation for `None`.
///
/// Nothing is written when the annotation already holds `conf`. `resource` is
/// replaced by the stored object after a write.
///
/// # Errors
///
/// Returns any store error, conflicts included.
pub async fn persist_association_conf<K, S>(
    store: &S,
    resource: &mut K,
    conf: Option<&AssociationConf>,
) -> Result<()>
where
    K: StoreObject,
    S: ObjectStore + ?Sized,
{
    if conf_from_annotation(resource).ok().flatten().as_ref() == conf {
        return Ok(());
    }
    match conf {
        Some(conf) => {
            let serialized = serde_json::to_string(conf)?;
            resource
                .annotations_mut()
                .insert(ASSOCIATION_CONF_ANNOTATION.to_string(), serialized);
        }
        None => {
            resource.annotations_mut().remove(ASSOCIATION_CONF_ANNOTATION);
        }
    }
    debug!(
        namespace = %resource.namespace().unwrap_or_default(),
        name = %resource.name_any(),
        removed = conf.is_none(),
        "Persisting association configuration"
    );
    *resource = store.update(resource).await?;
    Ok(())
}

type TableKey = (String, ObjectKey);

/// Association configurations of dependent resources, keyed by kind and identity.
#[derive(Debug, Default)]
pub struct AssociationTable {
    inner: Mutex<BTreeMap<TableKey, AssociationConf>>,
}

fn key_of<K: Resource<DynamicType = ()> + ResourceExt>(obj: &K) -> TableKey {
    (K::kind(&()).to_string(), ObjectKey::of(obj))
}

impl AssociationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TableKey, AssociationConf>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Populate the entry of `obj` from its annotation.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the annotation is not valid JSON.
    pub fn load<K: Resource<DynamicType = ()> + ResourceExt>(
        &self,
        obj: &K,
    ) -> Result<Option<AssociationConf>> {
        let conf = conf_from_annotation(obj)?;
        let key = key_of(obj);
        let mut inner = self.lock();
        match &conf {
            Some(conf) => inner.insert(key, conf.clone()),
            None => inner.remove(&key),
        };
        Ok(conf)
    }

    /// The configuration of `obj`, if any.
    #[must_use]
    pub fn get<K: Resource<DynamicType = ()> + ResourceExt>(
        &self,
        obj: &K,
    ) -> Option<AssociationConf> {
        self.lock().get(&key_of(obj)).cloned()
    }

    /// Record the configuration of `obj`.
    pub fn set<K: Resource<DynamicType = ()> + ResourceExt>(&self, obj: &K, conf: AssociationConf) {
        self.lock().insert(key_of(obj), conf);
    }

    /// Forget the configuration of `obj`.
    pub fn remove<K: Resource<DynamicType = ()> + ResourceExt>(&self, obj: &K) {
        self.lock().remove(&key_of(obj));
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "conf_tests.rs"]
mod conf_tests;
