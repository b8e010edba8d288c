// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Secure settings and the keystore init container.
//!
//! The secrets listed in `spec.secureSettings` are aggregated into one
//! `{name}-{short}-secure-settings` secret, mounted into an init container that
//! loads every file into the product keystore before the main container starts.
//! The `resourceVersion` of the aggregated secret feeds the configuration
//! checksum, so a change of any secure setting rolls the pods.

use crate::constants::{
    KEYSTORE_INIT_CONTAINER_NAME, SECURE_SETTINGS_MOUNT_PATH, SECURE_SETTINGS_VOLUME_NAME,
};
use crate::crd::SecretSource;
use crate::errors::Result;
use crate::events::{publish_all, EventPublisher, PendingEvent};
use crate::name::Namer;
use crate::reconcilers::resources::reconcile_secret;
use crate::status_reasons::EVENT_SECURE_SETTINGS_ERROR;
use crate::store::{controller_reference, get_if_exists, ObjectStore, StoreObject};
use crate::watches::{NamedWatch, ObjectKey, WatchRegistry};
use crate::workloads::VolumeSpec;
use k8s_openapi::api::core::v1::{Container, Secret, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// How a product initializes its keystore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeystoreInit {
    /// Command creating an empty keystore
    pub create_command: &'static str,
    /// Command adding `$key` from `$filename`
    pub add_command: &'static str,
    /// Volume holding the keystore, shared with the main container
    pub data_volume: &'static str,
    /// Mount path of the data volume
    pub data_path: &'static str,
}

/// Inputs of [`reconcile_keystore_resources`] besides the store and owner.
pub struct KeystoreParams<'a> {
    /// Namer of the owner's product
    pub namer: Namer,
    /// Labels of the aggregated secret
    pub labels: &'a BTreeMap<String, String>,
    /// Secure settings sources of the owner
    pub sources: &'a [SecretSource],
    /// Keystore commands of the product
    pub init: KeystoreInit,
}

/// Pod additions loading the secure settings into the keystore.
#[derive(Clone, Debug)]
pub struct KeystoreResources {
    /// Volume of the aggregated secure settings secret
    pub volume: VolumeSpec,
    /// Init container populating the keystore
    pub init_container: Container,
    /// `resourceVersion` of the aggregated secret
    pub version: String,
}

/// Name of the watch registration on the secure settings sources of `owner`.
#[must_use]
pub fn secure_settings_watch_name(owner: &ObjectKey) -> String {
    format!("{}-{}-secure-settings", owner.namespace, owner.name)
}

/// Shell script creating the keystore and adding every mounted secure setting.
#[must_use]
pub fn init_script(init: &KeystoreInit) -> String {
    format!(
        r#"#!/usr/bin/env bash

set -eux

echo "Initializing keystore."

{create}

for filename in {mount}/*; do
	[[ -e "$filename" ]] || continue
	key=$(basename "$filename")
	echo "Adding "$key" to the keystore."
	{add}
done

echo "Keystore initialization successful."
"#,
        create = init.create_command,
        mount = SECURE_SETTINGS_MOUNT_PATH,
        add = init.add_command,
    )
}

fn init_container(init: &KeystoreInit, volume: &VolumeSpec) -> Container {
    Container {
        name: KEYSTORE_INIT_CONTAINER_NAME.to_string(),
        command: Some(vec![
            "/usr/bin/env".to_string(),
            "bash".to_string(),
            "-c".to_string(),
            init_script(init),
        ]),
        volume_mounts: Some(vec![
            volume.mount.clone(),
            VolumeMount {
                name: init.data_volume.to_string(),
                mount_path: init.data_path.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Aggregate the secure settings of `owner` and build the keystore init container.
///
/// Without secure settings the watch is removed and `None` is returned. A
/// missing source secret is reported as a warning event and skipped.
///
/// # Arguments
///
/// * `store` - Object store
/// * `events` - Sink of the warning events
/// * `watches` - Secrets watch registry
/// * `owner` - The managed resource
/// * `params` - Product specific inputs
///
/// # Errors
///
/// Returns an error if a source secret cannot be read or the aggregated
/// secret cannot be written.
pub async fn reconcile_keystore_resources<S, O>(
    store: &S,
    events: &dyn EventPublisher,
    watches: &WatchRegistry,
    owner: &O,
    params: &KeystoreParams<'_>,
) -> Result<Option<KeystoreResources>>
where
    S: ObjectStore + ?Sized,
    O: StoreObject,
{
    let key = ObjectKey::of(owner);
    let watch_name = secure_settings_watch_name(&key);

    if params.sources.is_empty() {
        watches.remove_handler_for_key(&watch_name);
        return Ok(None);
    }

    watches.add_handler(NamedWatch {
        name: watch_name,
        watched: params
            .sources
            .iter()
            .map(|s| ObjectKey::new(&key.namespace, &s.secret_name))
            .collect(),
        watcher: key.clone(),
    });

    let mut data = BTreeMap::new();
    let mut warnings = Vec::new();
    for source in params.sources {
        let Some(secret) =
            get_if_exists::<Secret, _>(store, &key.namespace, &source.secret_name).await?
        else {
            warn!(
                namespace = %key.namespace,
                name = %key.name,
                secret = %source.secret_name,
                "Secure settings secret not found"
            );
            warnings.push(PendingEvent::warning(
                EVENT_SECURE_SETTINGS_ERROR,
                format!(
                    "Secure settings secret not found: {}/{}",
                    key.namespace, source.secret_name
                ),
            ));
            continue;
        };
        let source_data = secret.data.unwrap_or_default();
        match &source.entries {
            None => data.extend(source_data),
            Some(entries) => {
                for entry in entries {
                    let Some(value) = source_data.get(&entry.key) else {
                        warn!(
                            namespace = %key.namespace,
                            secret = %source.secret_name,
                            key = %entry.key,
                            "Secure settings key not found"
                        );
                        continue;
                    };
                    let path = entry.path.clone().unwrap_or_else(|| entry.key.clone());
                    data.insert(path, value.clone());
                }
            }
        }
    }
    publish_all(events, owner, &warnings).await;

    let secret_name = params.namer.secure_settings_secret(&key.name);
    let expected = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(params.labels.clone()),
            ..Default::default()
        },
        data: Some(data.into_iter().collect::<BTreeMap<String, ByteString>>()),
        ..Default::default()
    };
    let owner_ref = controller_reference(owner)?;
    let aggregated = reconcile_secret(store, expected, Some(&owner_ref)).await?;
    let version = aggregated.resource_version().unwrap_or_default();
    debug!(
        namespace = %key.namespace,
        name = %key.name,
        version = %version,
        "Reconciled secure settings"
    );

    let volume = VolumeSpec::secret(
        SECURE_SETTINGS_VOLUME_NAME,
        &secret_name,
        SECURE_SETTINGS_MOUNT_PATH,
    );
    Ok(Some(KeystoreResources {
        init_container: init_container(&params.init, &volume),
        volume,
        version,
    }))
}

#[cfg(test)]
#[path = "keystore_tests.rs"]
mod keystore_tests;
