// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic create-or-update of derived Kubernetes resources.
//!
//! [`reconcile_resource`] compares an expected object with the one stored in
//! the cluster and only writes when they differ:
//!
//! 1. The object is fetched by namespace/name.
//! 2. Absent: the owner reference is set on the expected object, which is created.
//! 3. Present: `needs_update(expected, reconciled)` decides whether
//!    `update_reconciled(expected, &mut reconciled)` runs and the object is
//!    replaced (optimistic concurrency through its `resourceVersion`).
//!
//! A missing object is the create path, not an error. Every other error is
//! returned as-is, so callers can still tell conflicts apart. There is no
//! internal retry: the controller requeues.
//!
//! Typed wrappers exist for the kinds the operator manages. Workloads carry a
//! hash of their expected pod template in an annotation, so comparisons are
//! not fooled by fields the API server defaults.
//!
//! # Example
//!
//! ```rust,no_run
//! use elastic_operator::reconcilers::resources::reconcile_secret;
//! use elastic_operator::store::ObjectStore;
//! use k8s_openapi::api::core::v1::Secret;
//!
//! async fn example<S: ObjectStore>(store: &S, secret: Secret) -> elastic_operator::errors::Result<()> {
//!     let reconciled = reconcile_secret(store, secret, None).await?;
//!     println!("{:?}", reconciled.metadata.resource_version);
//!     Ok(())
//! }
//! ```

use crate::errors::Result;
use crate::metrics;
use crate::store::{get_if_exists, ObjectStore, StoreObject};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Annotation holding the hash of the expected workload spec.
pub const TEMPLATE_HASH_ANNOTATION: &str = "common.k8s.elastic.co/template-hash";

/// Create `expected` if missing, or update the stored object when it differs.
///
/// # Arguments
///
/// * `store` - Object store
/// * `expected` - The desired object, with namespace and name set
/// * `owner` - Controller owner reference set on creation
/// * `needs_update` - Whether the stored object differs from the expected one
/// * `update_reconciled` - Copies the expected fields onto the stored object
///
/// # Returns
///
/// The object as stored after this call.
///
/// # Errors
///
/// Returns any store error other than not-found on the initial fetch.
pub async fn reconcile_resource<K, S, N, U>(
    store: &S,
    mut expected: K,
    owner: Option<&OwnerReference>,
    needs_update: N,
    update_reconciled: U,
) -> Result<K>
where
    K: StoreObject,
    S: ObjectStore + ?Sized,
    N: Fn(&K, &K) -> bool + Send + Sync,
    U: Fn(&K, &mut K) + Send + Sync,
{
    let namespace = expected.namespace().unwrap_or_default();
    let name = expected.name_any();
    let kind = K::kind(&()).to_string();

    match get_if_exists::<K, _>(store, &namespace, &name).await? {
        None => {
            if let Some(owner) = owner {
                expected.meta_mut().owner_references = Some(vec![owner.clone()]);
            }
            let created = store.create(&expected).await?;
            info!(kind = %kind, namespace = %namespace, name = %name, "Created resource");
            metrics::record_resource_created(&kind);
            Ok(created)
        }
        Some(mut reconciled) => {
            if !needs_update(&expected, &reconciled) {
                debug!(kind = %kind, namespace = %namespace, name = %name, "Resource up to date");
                return Ok(reconciled);
            }
            update_reconciled(&expected, &mut reconciled);
            let updated = store.update(&reconciled).await?;
            info!(kind = %kind, namespace = %namespace, name = %name, "Updated resource");
            metrics::record_resource_updated(&kind);
            Ok(updated)
        }
    }
}

/// Whether every expected label is present on the stored object.
fn labels_missing(expected: &BTreeMap<String, String>, reconciled: &BTreeMap<String, String>) -> bool {
    expected.iter().any(|(k, v)| reconciled.get(k) != Some(v))
}

/// Merge the expected labels into the stored object's labels.
fn merge_labels<K: ResourceExt>(expected: &K, reconciled: &mut K) {
    let wanted = expected.labels().clone();
    reconciled.labels_mut().extend(wanted);
}

/// Whether a stored secret differs from the expected one.
#[must_use]
pub fn secret_needs_update(expected: &Secret, reconciled: &Secret) -> bool {
    expected.data != reconciled.data || labels_missing(expected.labels(), reconciled.labels())
}

/// Create or update a secret, comparing data and labels.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_secret<S: ObjectStore + ?Sized>(
    store: &S,
    expected: Secret,
    owner: Option<&OwnerReference>,
) -> Result<Secret> {
    reconcile_resource(store, expected, owner, secret_needs_update, |e, r| {
        r.data.clone_from(&e.data);
        merge_labels(e, r);
    })
    .await
}

/// Whether a stored config map differs from the expected one.
#[must_use]
pub fn config_map_needs_update(expected: &ConfigMap, reconciled: &ConfigMap) -> bool {
    expected.data != reconciled.data || labels_missing(expected.labels(), reconciled.labels())
}

/// Create or update a config map, comparing data and labels.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_config_map<S: ObjectStore + ?Sized>(
    store: &S,
    expected: ConfigMap,
    owner: Option<&OwnerReference>,
) -> Result<ConfigMap> {
    reconcile_resource(store, expected, owner, config_map_needs_update, |e, r| {
        r.data.clone_from(&e.data);
        merge_labels(e, r);
    })
    .await
}

/// Whether a stored service differs from the expected one.
///
/// Only the fields the operator sets are compared: type, selector, ports,
/// cluster IP when headless, and labels.
#[must_use]
pub fn service_needs_update(expected: &Service, reconciled: &Service) -> bool {
    let (Some(e), Some(r)) = (expected.spec.as_ref(), reconciled.spec.as_ref()) else {
        return expected.spec.is_some();
    };
    let type_differs = e.type_.is_some() && e.type_ != r.type_;
    let headless_differs = e.cluster_ip.as_deref() == Some("None") && r.cluster_ip != e.cluster_ip;
    let ports_differ = {
        let ports = |s: &k8s_openapi::api::core::v1::ServiceSpec| {
            s.ports
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|p| (p.name, p.port, p.protocol.unwrap_or_else(|| "TCP".to_string())))
                .collect::<Vec<_>>()
        };
        ports(e) != ports(r)
    };
    type_differs
        || headless_differs
        || ports_differ
        || e.selector != r.selector
        || labels_missing(expected.labels(), reconciled.labels())
}

/// Create or update a service. Fields allocated by the API server are kept.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_service<S: ObjectStore + ?Sized>(
    store: &S,
    expected: Service,
    owner: Option<&OwnerReference>,
) -> Result<Service> {
    reconcile_resource(store, expected, owner, service_needs_update, |e, r| {
        if let (Some(es), Some(rs)) = (e.spec.as_ref(), r.spec.as_mut()) {
            rs.ports.clone_from(&es.ports);
            rs.selector.clone_from(&es.selector);
            if es.type_.is_some() {
                rs.type_.clone_from(&es.type_);
            }
        } else {
            r.spec.clone_from(&e.spec);
        }
        merge_labels(e, r);
        r.annotations_mut().extend(e.annotations().clone());
    })
    .await
}

/// Hash of a serializable value, as lowercase hex.
#[must_use]
pub fn hash_object<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("{:x}", Sha256::digest(bytes))
}

/// Stamp the template hash annotation of a workload from its spec.
pub fn set_template_hash<K, T>(obj: &mut K, spec: &T)
where
    K: ResourceExt,
    T: Serialize,
{
    let hash = hash_object(spec);
    obj.annotations_mut()
        .insert(TEMPLATE_HASH_ANNOTATION.to_string(), hash);
}

fn template_hash_differs<K: ResourceExt>(expected: &K, reconciled: &K) -> bool {
    expected.annotations().get(TEMPLATE_HASH_ANNOTATION)
        != reconciled.annotations().get(TEMPLATE_HASH_ANNOTATION)
}

/// Whether a stored deployment differs from the expected one.
#[must_use]
pub fn deployment_needs_update(expected: &Deployment, reconciled: &Deployment) -> bool {
    template_hash_differs(expected, reconciled)
        || labels_missing(expected.labels(), reconciled.labels())
}

/// Create or update a deployment. Call [`set_template_hash`] on `expected` first.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_deployment<S: ObjectStore + ?Sized>(
    store: &S,
    expected: Deployment,
    owner: Option<&OwnerReference>,
) -> Result<Deployment> {
    reconcile_resource(store, expected, owner, deployment_needs_update, |e, r| {
        r.spec.clone_from(&e.spec);
        merge_labels(e, r);
        r.annotations_mut().extend(e.annotations().clone());
    })
    .await
}

/// Whether a stored stateful set differs from the expected one.
#[must_use]
pub fn stateful_set_needs_update(expected: &StatefulSet, reconciled: &StatefulSet) -> bool {
    template_hash_differs(expected, reconciled)
        || labels_missing(expected.labels(), reconciled.labels())
}

/// Create or update a stateful set. Call [`set_template_hash`] on `expected` first.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_stateful_set<S: ObjectStore + ?Sized>(
    store: &S,
    expected: StatefulSet,
    owner: Option<&OwnerReference>,
) -> Result<StatefulSet> {
    reconcile_resource(store, expected, owner, stateful_set_needs_update, |e, r| {
        r.spec.clone_from(&e.spec);
        merge_labels(e, r);
        r.annotations_mut().extend(e.annotations().clone());
    })
    .await
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
