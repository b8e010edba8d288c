// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TLS certificate management for the HTTP layer of every product.
//!
//! Each managed resource gets its own self-signed CA, stored in
//! `{name}-{short}-http-ca-internal`, and a leaf certificate for its HTTP
//! service signed by that CA, stored in `{name}-{short}-http-certs-internal`.
//! The CA certificate and the leaf certificate (without key) are published in
//! `{name}-{short}-http-certs-public` for clients, including the association
//! controllers that copy the Elasticsearch CA next to its dependents.
//!
//! Certificates are rotated strictly before `NotAfter - rotate_before`. The
//! reconciliation result carries the time left until the next rotation so the
//! caller can schedule a timed requeue.
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use elastic_operator::certificates::should_rotate_in;
//!
//! let now = Utc::now();
//! let not_after = now + Duration::hours(48);
//! let wait = should_rotate_in(now, not_after, Duration::hours(24));
//! assert_eq!(wait.as_secs(), 24 * 3600);
//! ```

pub mod ca;
pub mod http;

pub use ca::{reconcile_ca_for_owner, Ca};
pub use http::{certificate_sans, reconcile_http_certificates, reconcile_http_certs_public_secret};

use crate::constants::{
    CERT_FILE_NAME, DEFAULT_CA_VALIDITY_HOURS, DEFAULT_CERT_VALIDITY_HOURS,
    DEFAULT_ROTATE_BEFORE_HOURS,
};
use crate::crd::TlsOptions;
use crate::errors::{OperatorError, Result};
use crate::name::Namer;
use crate::store::ObjectStore;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::Resource;
use std::collections::BTreeMap;
use x509_parser::extensions::GeneralName;

/// CA type of the HTTP layer CA.
pub const HTTP_CA_TYPE: &str = "http";

/// How long certificates are valid, and how long before expiry they are replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationParams {
    /// Validity of newly issued certificates
    pub validity: Duration,
    /// Certificates are replaced this long before they expire
    pub rotate_before: Duration,
}

impl RotationParams {
    /// Build rotation parameters from hour counts.
    #[must_use]
    pub fn from_hours(validity_hours: i64, rotate_before_hours: i64) -> Self {
        Self {
            validity: Duration::hours(validity_hours),
            rotate_before: Duration::hours(rotate_before_hours),
        }
    }

    /// Default rotation parameters of the CA.
    #[must_use]
    pub fn default_ca() -> Self {
        Self::from_hours(DEFAULT_CA_VALIDITY_HOURS, DEFAULT_ROTATE_BEFORE_HOURS)
    }

    /// Default rotation parameters of leaf certificates.
    #[must_use]
    pub fn default_cert() -> Self {
        Self::from_hours(DEFAULT_CERT_VALIDITY_HOURS, DEFAULT_ROTATE_BEFORE_HOURS)
    }
}

/// Time left until a certificate expiring at `not_after` must be rotated.
///
/// `not_after - rotate_before - now`, clamped to zero.
#[must_use]
pub fn should_rotate_in(
    now: DateTime<Utc>,
    not_after: DateTime<Utc>,
    rotate_before: Duration,
) -> std::time::Duration {
    (not_after - rotate_before - now)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

/// The parts of an X.509 certificate rotation decisions depend on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    /// Subject common name
    pub common_name: String,
    /// DNS names and IP addresses of the subject alternative name extension
    pub subject_alt_names: Vec<String>,
}

impl CertificateInfo {
    /// Parse the first certificate of a PEM document.
    ///
    /// # Errors
    ///
    /// Returns a certificate error if the bytes are not a PEM encoded certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| OperatorError::Certificate(format!("failed to parse PEM: {e}")))?;
        let cert = parsed
            .parse_x509()
            .map_err(|e| OperatorError::Certificate(format!("failed to parse certificate: {e}")))?;

        let not_before = from_timestamp(cert.validity().not_before.timestamp())?;
        let not_after = from_timestamp(cert.validity().not_after.timestamp())?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut subject_alt_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => subject_alt_names.push((*dns).to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            subject_alt_names.push(ip.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        subject_alt_names.sort();

        Ok(Self {
            not_before,
            not_after,
            common_name,
            subject_alt_names,
        })
    }

    /// Valid at `now`, and not due for rotation within `rotate_before`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>, rotate_before: Duration) -> bool {
        self.not_before <= now && now + rotate_before < self.not_after
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(std::net::IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(std::net::IpAddr::from),
        _ => None,
    }
}

fn from_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| OperatorError::Certificate(format!("timestamp {secs} out of range")))
}

/// Convert a chrono timestamp into the time type used by rcgen.
pub(crate) fn to_offset(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| OperatorError::Certificate(format!("invalid certificate time: {e}")))
}

/// Bytes stored under `key` in a secret.
#[must_use]
pub fn secret_value<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
}

/// Outcome of the certificate reconciliation of one resource.
#[derive(Clone, Debug)]
pub struct CertificateResults {
    /// The CA signing the HTTP certificates
    pub ca: Ca,
    /// The internal HTTP certificates secret
    pub http_certificates: Secret,
    /// Time until the next certificate needs rotating
    pub requeue_after: std::time::Duration,
}

/// Inputs of [`reconcile_certificates`] besides the store and owner.
pub struct CertificateParams<'a> {
    /// Namer of the owner's product
    pub namer: Namer,
    /// Labels applied to every certificate secret
    pub labels: &'a BTreeMap<String, String>,
    /// TLS options of the owner's HTTP layer
    pub tls: &'a TlsOptions,
    /// Services the HTTP certificate is issued for
    pub services: &'a [Service],
    /// CA rotation
    pub ca_rotation: RotationParams,
    /// Leaf certificate rotation
    pub cert_rotation: RotationParams,
}

/// Reconcile the HTTP CA, the HTTP certificates and the public certificates secret.
///
/// Returns `None` when TLS is disabled.
///
/// # Errors
///
/// Returns an error if certificate generation fails or a secret cannot be written.
pub async fn reconcile_certificates<S, O>(
    store: &S,
    owner: &O,
    params: &CertificateParams<'_>,
    now: DateTime<Utc>,
) -> Result<Option<CertificateResults>>
where
    S: ObjectStore,
    O: Resource<DynamicType = ()> + Sync,
{
    if !params.tls.enabled() {
        return Ok(None);
    }

    let ca = reconcile_ca_for_owner(
        store,
        owner,
        params.namer,
        params.labels,
        HTTP_CA_TYPE,
        params.ca_rotation,
        now,
    )
    .await?;
    let mut requeue_after = should_rotate_in(now, ca.info.not_after, params.ca_rotation.rotate_before);

    let http_certificates =
        reconcile_http_certificates(store, owner, &ca, params, now).await?;
    if let Some(leaf) = secret_value(&http_certificates, CERT_FILE_NAME)
        .and_then(|pem| CertificateInfo::from_pem(pem).ok())
    {
        requeue_after = requeue_after.min(should_rotate_in(
            now,
            leaf.not_after,
            params.cert_rotation.rotate_before,
        ));
    }

    reconcile_http_certs_public_secret(store, owner, params.namer, params.labels, &http_certificates)
        .await?;

    Ok(Some(CertificateResults {
        ca,
        http_certificates,
        requeue_after,
    }))
}

#[cfg(test)]
#[path = "certificates_tests.rs"]
mod certificates_tests;
