// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Self-signed certificate authorities, one per owner and CA type.

use super::{secret_value, to_offset, CertificateInfo, RotationParams};
use crate::constants::{CERT_FILE_NAME, KEY_FILE_NAME};
use crate::errors::{OperatorError, Result};
use crate::metrics;
use crate::name::Namer;
use crate::reconcilers::resources::reconcile_secret;
use crate::store::{controller_reference, get_if_exists, ObjectStore};
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A certificate authority and its private key.
#[derive(Clone, Debug)]
pub struct Ca {
    /// PEM encoded CA certificate
    pub cert_pem: String,
    /// PEM encoded private key
    pub key_pem: String,
    /// Validity and subject of the CA certificate
    pub info: CertificateInfo,
}

impl Ca {
    /// Generate a new self-signed CA valid from `now` for `validity`.
    ///
    /// # Errors
    ///
    /// Returns a certificate error if key or certificate generation fails.
    pub fn new_self_signed(
        common_name: &str,
        organizational_unit: &str,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn.push(
            DnType::OrganizationalUnitName,
            DnValue::Utf8String(organizational_unit.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = to_offset(now)?;
        params.not_after = to_offset(now + validity)?;

        let key_pair = KeyPair::generate()
            .map_err(|e| OperatorError::Certificate(format!("failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| OperatorError::Certificate(format!("failed to create CA cert: {e}")))?;

        let cert_pem = cert.pem();
        let info = CertificateInfo::from_pem(cert_pem.as_bytes())?;
        Ok(Self {
            cert_pem,
            key_pem: key_pair.serialize_pem(),
            info,
        })
    }

    /// Load a CA from PEM encoded certificate and key.
    ///
    /// # Errors
    ///
    /// Returns a certificate error if either part cannot be parsed.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_pem = String::from_utf8(cert_pem.to_vec())
            .map_err(|e| OperatorError::Certificate(format!("CA certificate is not UTF-8: {e}")))?;
        let key_pem = String::from_utf8(key_pem.to_vec())
            .map_err(|e| OperatorError::Certificate(format!("CA key is not UTF-8: {e}")))?;
        KeyPair::from_pem(&key_pem)
            .map_err(|e| OperatorError::Certificate(format!("failed to parse CA key: {e}")))?;
        let info = CertificateInfo::from_pem(cert_pem.as_bytes())?;
        Ok(Self {
            cert_pem,
            key_pem,
            info,
        })
    }

    /// Issue a server certificate for `subject_alt_names`, signed by this CA.
    ///
    /// The leaf key is ECDSA P-256. Returns the certificate and key as PEM.
    ///
    /// # Errors
    ///
    /// Returns a certificate error if a SAN is invalid or signing fails.
    pub fn issue(
        &self,
        common_name: &str,
        subject_alt_names: &[String],
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<(String, String)> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_before = to_offset(now)?;
        params.not_after = to_offset(now + validity)?;
        params.subject_alt_names = subject_alt_names
            .iter()
            .map(|san| {
                if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                    Ok(SanType::IpAddress(ip))
                } else {
                    Ia5String::try_from(san.clone())
                        .map(SanType::DnsName)
                        .map_err(|e| {
                            OperatorError::Certificate(format!("invalid DNS name '{san}': {e}"))
                        })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| OperatorError::Certificate(format!("failed to generate key: {e}")))?;
        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| OperatorError::Certificate(format!("failed to load CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| OperatorError::Certificate(format!("failed to create issuer: {e}")))?;
        let cert = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| OperatorError::Certificate(format!("failed to sign certificate: {e}")))?;

        Ok((cert.pem(), leaf_key.serialize_pem()))
    }
}

/// Load the CA stored in `secret`, if it parses.
fn ca_from_secret(secret: &Secret) -> Option<Ca> {
    let cert = secret_value(secret, CERT_FILE_NAME)?;
    let key = secret_value(secret, KEY_FILE_NAME)?;
    Ca::from_pem(cert, key).ok()
}

/// Reconcile the self-signed CA of `owner` for `ca_type`.
///
/// The CA stored in `{name}-{short}-{ca_type}-ca-internal` is reused while it
/// is valid and not within `rotation.rotate_before` of expiring. Otherwise a
/// new CA is generated and replaces the secret data.
///
/// # Arguments
///
/// * `store` - Object store
/// * `owner` - Resource owning the CA
/// * `namer` - Namer of the owner's product
/// * `labels` - Labels applied to the CA secret
/// * `ca_type` - CA type, part of the secret name (e.g. `http`)
/// * `rotation` - Validity and rotation margin of the CA
/// * `now` - Current time
///
/// # Errors
///
/// Returns an error if generation fails or the secret cannot be written.
pub async fn reconcile_ca_for_owner<S, O>(
    store: &S,
    owner: &O,
    namer: Namer,
    labels: &BTreeMap<String, String>,
    ca_type: &str,
    rotation: RotationParams,
    now: DateTime<Utc>,
) -> Result<Ca>
where
    S: ObjectStore,
    O: Resource<DynamicType = ()> + Sync,
{
    let owner_name = owner.meta().name.clone().unwrap_or_default();
    let namespace = owner.meta().namespace.clone().unwrap_or_default();
    let secret_name = namer.ca_internal_secret(&owner_name, ca_type);

    let existing = get_if_exists::<Secret, _>(store, &namespace, &secret_name).await?;
    if let Some(ca) = existing.as_ref().and_then(ca_from_secret) {
        if ca.info.is_usable_at(now, rotation.rotate_before) {
            return Ok(ca);
        }
        info!(
            namespace = %namespace,
            secret = %secret_name,
            not_after = %ca.info.not_after,
            "CA is due for rotation"
        );
    }

    let ca = Ca::new_self_signed(
        &format!("{owner_name}-{ca_type}"),
        &owner_name,
        now,
        rotation.validity,
    )?;
    info!(
        namespace = %namespace,
        secret = %secret_name,
        not_after = %ca.info.not_after,
        "Issued new self-signed CA"
    );

    let expected = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (
                CERT_FILE_NAME.to_string(),
                ByteString(ca.cert_pem.clone().into_bytes()),
            ),
            (
                KEY_FILE_NAME.to_string(),
                ByteString(ca.key_pem.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    };
    let owner_ref = controller_reference(owner)?;
    let stored = reconcile_secret(store, expected, Some(&owner_ref)).await?;
    metrics::record_certificate_rotation(&O::kind(&()), ca_type);
    debug!(secret = %stored.name_any(), "CA secret reconciled");

    Ok(ca)
}
