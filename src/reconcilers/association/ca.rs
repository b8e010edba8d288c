// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Copy of the Elasticsearch HTTP CA into the dependent's namespace.

use super::{ca_watch_name, Associated};
use crate::certificates::secret_value;
use crate::constants::CA_FILE_NAME;
use crate::errors::Result;
use crate::name::ES_NAMER;
use crate::reconcilers::resources::reconcile_secret;
use crate::store::{controller_reference, delete_if_exists, get_if_exists, ObjectStore};
use crate::watches::{NamedWatch, ObjectKey, WatchRegistry};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

/// The CA copy of one dependent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaCopy {
    /// Name of the copy in the dependent's namespace
    pub secret_name: String,
    /// Whether the copy holds a non-empty `ca.crt`
    pub ca_cert_provided: bool,
}

/// Watch the public HTTP certificates of `es` and copy them next to `resource`.
///
/// Returns `None` while the source secret does not exist, and removes a copy
/// left over from an earlier pass. The watch triggers a new pass once the
/// source is created.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_ca_copy<K, S>(
    store: &S,
    secrets: &WatchRegistry,
    resource: &K,
    es: &ObjectKey,
) -> Result<Option<CaCopy>>
where
    K: Associated,
    S: ObjectStore + ?Sized,
{
    let key = ObjectKey::of(resource);
    let source_name = ES_NAMER.http_certs_public_secret(&es.name);
    secrets.add_handler(NamedWatch {
        name: ca_watch_name(&key),
        watched: vec![ObjectKey::new(&es.namespace, &source_name)],
        watcher: key.clone(),
    });

    let secret_name = K::NAMER.es_ca_secret(&key.name);
    let Some(source) = get_if_exists::<Secret, _>(store, &es.namespace, &source_name).await? else {
        debug!(namespace = %es.namespace, name = %source_name, "Elasticsearch CA not available");
        delete_if_exists::<Secret, _>(store, &key.namespace, &secret_name).await?;
        return Ok(None);
    };

    let copy = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(K::LABELS.pair_selector(&key.name, &key.namespace)),
            ..Default::default()
        },
        data: source.data.clone(),
        ..Default::default()
    };
    let owner = controller_reference(resource)?;
    let copy = reconcile_secret(store, copy, Some(&owner)).await?;

    Ok(Some(CaCopy {
        secret_name,
        ca_cert_provided: secret_value(&copy, CA_FILE_NAME).is_some_and(|v| !v.is_empty()),
    }))
}

#[cfg(test)]
#[path = "ca_tests.rs"]
mod ca_tests;

