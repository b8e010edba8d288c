// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP layer certificates.

use super::{secret_value, Ca, CertificateInfo, CertificateParams};
use crate::constants::{CA_FILE_NAME, CERT_FILE_NAME, KEY_FILE_NAME};
use crate::crd::TlsOptions;
use crate::errors::{OperatorError, Result};
use crate::metrics;
use crate::name::Namer;
use crate::reconcilers::resources::reconcile_secret;
use crate::store::{controller_reference, get_if_exists, ObjectStore};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Subject alternative names of the HTTP certificate.
///
/// For every service: `svc`, `svc.ns`, `svc.ns.svc` and
/// `svc.ns.svc.cluster.local`, followed by the user-supplied names. The result
/// is sorted and deduplicated.
#[must_use]
pub fn certificate_sans(services: &[Service], tls: &TlsOptions) -> Vec<String> {
    let mut sans = BTreeSet::new();
    for svc in services {
        let name = svc.name_any();
        let namespace = svc.namespace().unwrap_or_default();
        sans.insert(name.clone());
        sans.insert(format!("{name}.{namespace}"));
        sans.insert(format!("{name}.{namespace}.svc"));
        sans.insert(format!("{name}.{namespace}.svc.cluster.local"));
    }
    for san in tls.subject_alt_names() {
        if let Some(dns) = san.dns.as_ref().filter(|d| !d.is_empty()) {
            sans.insert(dns.clone());
        }
        if let Some(ip) = san.ip.as_ref().filter(|i| !i.is_empty()) {
            sans.insert(ip.clone());
        }
    }
    sans.into_iter().collect()
}

/// Whether the leaf stored in `secret` can be kept.
///
/// It must parse, be signed by the current CA (stored `ca.crt` equals the CA
/// certificate), stay valid past the rotation margin, carry exactly the
/// desired SANs, and come with its key.
fn can_reuse_leaf(
    secret: &Secret,
    ca: &Ca,
    sans: &[String],
    params: &CertificateParams<'_>,
    now: DateTime<Utc>,
) -> bool {
    if secret_value(secret, KEY_FILE_NAME).is_none_or(<[u8]>::is_empty) {
        return false;
    }
    if secret_value(secret, CA_FILE_NAME) != Some(ca.cert_pem.as_bytes()) {
        return false;
    }
    let Some(info) =
        secret_value(secret, CERT_FILE_NAME).and_then(|pem| CertificateInfo::from_pem(pem).ok())
    else {
        return false;
    };
    info.is_usable_at(now, params.cert_rotation.rotate_before) && info.subject_alt_names == sans
}

fn certificate_data(cert: Vec<u8>, key: Vec<u8>, ca: Option<Vec<u8>>) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::from([
        (CERT_FILE_NAME.to_string(), ByteString(cert)),
        (KEY_FILE_NAME.to_string(), ByteString(key)),
    ]);
    if let Some(ca) = ca {
        data.insert(CA_FILE_NAME.to_string(), ByteString(ca));
    }
    data
}

/// Reconcile the internal HTTP certificates secret of `owner`.
///
/// - A user-provided certificate secret is copied as-is (`tls.crt`, `tls.key`
///   and, when present, `ca.crt`).
/// - Otherwise the stored leaf is reused when possible, or a new one is
///   issued by `ca` for the desired SANs.
///
/// # Errors
///
/// Returns a validation error if the user-provided secret is missing or
/// incomplete, a certificate error if issuance fails, and any store error.
pub async fn reconcile_http_certificates<S, O>(
    store: &S,
    owner: &O,
    ca: &Ca,
    params: &CertificateParams<'_>,
    now: DateTime<Utc>,
) -> Result<Secret>
where
    S: ObjectStore,
    O: Resource<DynamicType = ()> + Sync,
{
    let owner_name = owner.meta().name.clone().unwrap_or_default();
    let namespace = owner.meta().namespace.clone().unwrap_or_default();
    let secret_name = params.namer.http_certs_internal_secret(&owner_name);

    let data = if let Some(custom) = params.tls.custom_certificate_secret() {
        let user_secret = store
            .get::<Secret>(&namespace, custom)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    OperatorError::Validation(format!(
                        "certificate secret {namespace}/{custom} does not exist"
                    ))
                } else {
                    e
                }
            })?;
        let (Some(cert), Some(key)) = (
            secret_value(&user_secret, CERT_FILE_NAME),
            secret_value(&user_secret, KEY_FILE_NAME),
        ) else {
            return Err(OperatorError::Validation(format!(
                "certificate secret {namespace}/{custom} must contain {CERT_FILE_NAME} and {KEY_FILE_NAME}"
            )));
        };
        debug!(namespace = %namespace, secret = %custom, "Using user-provided HTTP certificate");
        certificate_data(
            cert.to_vec(),
            key.to_vec(),
            secret_value(&user_secret, CA_FILE_NAME).map(<[u8]>::to_vec),
        )
    } else {
        let sans = certificate_sans(params.services, params.tls);
        let existing = get_if_exists::<Secret, _>(store, &namespace, &secret_name).await?;
        match existing {
            Some(secret) if can_reuse_leaf(&secret, ca, &sans, params, now) => {
                secret.data.unwrap_or_default()
            }
            _ => {
                let common_name = sans
                    .first()
                    .cloned()
                    .unwrap_or_else(|| params.namer.http_service(&owner_name));
                let (cert, key) =
                    ca.issue(&common_name, &sans, now, params.cert_rotation.validity)?;
                info!(
                    namespace = %namespace,
                    secret = %secret_name,
                    sans = ?sans,
                    "Issued new HTTP certificate"
                );
                metrics::record_certificate_rotation(&O::kind(&()), "http");
                certificate_data(
                    cert.into_bytes(),
                    key.into_bytes(),
                    Some(ca.cert_pem.clone().into_bytes()),
                )
            }
        }
    };

    let expected = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name),
            namespace: Some(namespace),
            labels: Some(params.labels.clone()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    let owner_ref = controller_reference(owner)?;
    reconcile_secret(store, expected, Some(&owner_ref)).await
}

/// Reconcile `{name}-{short}-http-certs-public`: the HTTP certificate and CA, without key.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_http_certs_public_secret<S, O>(
    store: &S,
    owner: &O,
    namer: Namer,
    labels: &BTreeMap<String, String>,
    internal: &Secret,
) -> Result<Secret>
where
    S: ObjectStore,
    O: Resource<DynamicType = ()> + Sync,
{
    let owner_name = owner.meta().name.clone().unwrap_or_default();
    let namespace = owner.meta().namespace.clone().unwrap_or_default();

    let mut data = BTreeMap::new();
    for key in [CERT_FILE_NAME, CA_FILE_NAME] {
        if let Some(value) = secret_value(internal, key) {
            data.insert(key.to_string(), ByteString(value.to_vec()));
        }
    }

    let expected = Secret {
        metadata: ObjectMeta {
            name: Some(namer.http_certs_public_secret(&owner_name)),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    let owner_ref = controller_reference(owner)?;
    reconcile_secret(store, expected, Some(&owner_ref)).await
}
