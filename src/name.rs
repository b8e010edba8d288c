// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic, length-bounded names for derived objects.
//!
//! Every object the operator creates is named `{owner}-{short}-{suffixes...}`,
//! where `short` identifies the product (`es`, `kb`, `apm`, `ls`). Generated
//! names must fit in a label value (63 characters), because they are also used
//! as label values. When a name would not fit, the owner segment is truncated
//! and a short stable hash of the full owner name is appended to it, so two
//! long owners sharing a prefix still get distinct names.
//!
//! # Example
//!
//! ```rust
//! use elastic_operator::name::LS_NAMER;
//!
//! assert_eq!(LS_NAMER.http_service("sample"), "sample-ls-http");
//! assert_eq!(LS_NAMER.workload("sample"), "sample-ls");
//! ```

use crate::constants::{LABEL_VALUE_MAX_LENGTH, MAX_RESOURCE_NAME_LENGTH};
use crate::errors::OperatorError;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Length of the hash segment added to truncated owner names.
const HASH_LENGTH: usize = 8;

/// Builds derived object names for one product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Namer {
    /// Product short name inserted after the owner name
    pub short: &'static str,
    /// Upper bound of generated names
    pub max_length: usize,
}

/// Namer for Elasticsearch derived objects
pub const ES_NAMER: Namer = Namer::new("es");

/// Namer for Kibana derived objects
pub const KB_NAMER: Namer = Namer::new("kb");

/// Namer for APM Server derived objects
pub const APM_NAMER: Namer = Namer::new("apm");

/// Namer for Logstash derived objects
pub const LS_NAMER: Namer = Namer::new("ls");

impl Namer {
    /// Create a namer bounded by the label value length limit.
    #[must_use]
    pub const fn new(short: &'static str) -> Self {
        Self {
            short,
            max_length: LABEL_VALUE_MAX_LENGTH,
        }
    }

    /// Generate `{owner}-{short}-{suffixes joined by -}`.
    ///
    /// The result never exceeds `max_length`. Only the owner segment is ever
    /// shortened; the product and suffix segments are kept intact so that
    /// names of different derived objects never collide.
    #[must_use]
    pub fn suffix(&self, owner: &str, suffixes: &[&str]) -> String {
        let mut tail = format!("-{}", self.short);
        for s in suffixes.iter().filter(|s| !s.is_empty()) {
            tail.push('-');
            tail.push_str(s);
        }

        if owner.len() + tail.len() <= self.max_length {
            return format!("{owner}{tail}");
        }

        let hash = short_hash(owner);
        let keep = self
            .max_length
            .saturating_sub(tail.len() + HASH_LENGTH + 1);
        let prefix: String = owner.chars().take(keep).collect();
        let prefix = prefix.trim_end_matches('-');

        let name = if prefix.is_empty() {
            format!("{hash}{tail}")
        } else {
            format!("{prefix}-{hash}{tail}")
        };

        debug!(
            owner = %owner,
            name = %name,
            "Generated name exceeds {} characters, truncated owner segment",
            self.max_length
        );

        name.chars().take(self.max_length).collect()
    }

    /// Name of the workload (Deployment) of the owner.
    #[must_use]
    pub fn workload(&self, owner: &str) -> String {
        self.suffix(owner, &[])
    }

    /// Name of the HTTP service of the owner.
    #[must_use]
    pub fn http_service(&self, owner: &str) -> String {
        self.suffix(owner, &["http"])
    }

    /// Name of the secret holding the rendered configuration.
    #[must_use]
    pub fn config_secret(&self, owner: &str) -> String {
        self.suffix(owner, &["config"])
    }

    /// Name of the secret holding a self-signed CA of the given type.
    #[must_use]
    pub fn ca_internal_secret(&self, owner: &str, ca_type: &str) -> String {
        self.suffix(owner, &[ca_type, "ca-internal"])
    }

    /// Name of the secret holding the HTTP certificate, key and CA.
    #[must_use]
    pub fn http_certs_internal_secret(&self, owner: &str) -> String {
        self.suffix(owner, &["http-certs-internal"])
    }

    /// Name of the secret exposing the public HTTP certificate and CA.
    #[must_use]
    pub fn http_certs_public_secret(&self, owner: &str) -> String {
        self.suffix(owner, &["http-certs-public"])
    }

    /// Name of the secret aggregating the user's secure settings.
    #[must_use]
    pub fn secure_settings_secret(&self, owner: &str) -> String {
        self.suffix(owner, &["secure-settings"])
    }

    /// Name of the clear-text Elasticsearch credentials secret of an associated resource.
    #[must_use]
    pub fn es_auth_secret(&self, owner: &str) -> String {
        self.suffix(owner, &["es-auth"])
    }

    /// Name of the copy of the Elasticsearch CA in the associated resource's namespace.
    #[must_use]
    pub fn es_ca_secret(&self, owner: &str) -> String {
        self.suffix(owner, &["es-ca"])
    }
}

/// Logstash pipeline ConfigMap name.
#[must_use]
pub fn logstash_pipeline_config_map(owner: &str) -> String {
    LS_NAMER.suffix(owner, &["pipeline"])
}

/// APM Server secret token name.
#[must_use]
pub fn apm_secret_token(owner: &str) -> String {
    APM_NAMER.suffix(owner, &["token"])
}

/// Elasticsearch StatefulSet (and headless service) name of a node set.
#[must_use]
pub fn es_stateful_set(es_name: &str, node_set: &str) -> String {
    ES_NAMER.suffix(es_name, &[node_set])
}

/// Elasticsearch transport service name.
#[must_use]
pub fn es_transport_service(es_name: &str) -> String {
    ES_NAMER.suffix(es_name, &["transport"])
}

/// Elasticsearch `elastic` superuser secret name.
#[must_use]
pub fn es_elastic_user_secret(es_name: &str) -> String {
    ES_NAMER.suffix(es_name, &["elastic-user"])
}

/// Elasticsearch file realm secret name.
#[must_use]
pub fn es_file_realm_secret(es_name: &str) -> String {
    ES_NAMER.suffix(es_name, &["xpack-file-realm"])
}

/// Elasticsearch configuration secret name of a node set.
#[must_use]
pub fn es_config_secret(es_name: &str, node_set: &str) -> String {
    ES_NAMER.suffix(es_name, &[node_set, "es-config"])
}

/// Name of the pod with ordinal `ordinal` in a StatefulSet.
#[must_use]
pub fn stateful_set_pod(stateful_set: &str, ordinal: i32) -> String {
    format!("{stateful_set}-{ordinal}")
}

/// Reject owner names that would leave no room for derived suffixes.
///
/// # Errors
///
/// Returns a validation error when `name` is longer than the maximum managed
/// resource name length.
pub fn validate_resource_name(name: &str) -> Result<(), OperatorError> {
    if name.len() > MAX_RESOURCE_NAME_LENGTH {
        return Err(OperatorError::Validation(format!(
            "name '{name}' is {} characters long, the maximum is {MAX_RESOURCE_NAME_LENGTH}",
            name.len()
        )));
    }
    Ok(())
}

fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..HASH_LENGTH].to_string()
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod name_tests;
