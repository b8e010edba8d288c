// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for the Elastic Stack.
//!
//! All resources live in the `k8s.elastic.co` group, version `v1beta1`, and are
//! namespaced.
//!
//! # Resource Types
//!
//! - [`Elasticsearch`] - An Elasticsearch cluster made of one or more node sets
//! - [`Kibana`] - A Kibana deployment, associated with an Elasticsearch cluster
//! - [`ApmServer`] - An APM Server deployment, optionally associated with Elasticsearch
//! - [`Logstash`] - A Logstash deployment shipping events to Elasticsearch
//!
//! # Example: Logstash shipping to Elasticsearch
//!
//! ```rust,no_run
//! use elastic_operator::crd::{LogstashSpec, ObjectSelector};
//!
//! let spec = LogstashSpec {
//!     version: "7.4.0".to_string(),
//!     count: 1,
//!     elasticsearch_ref: ObjectSelector {
//!         name: "es1".to_string(),
//!         namespace: None,
//!     },
//!     ..Default::default()
//! };
//! ```

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Schema for free-form objects, kept as-is by the API server.
fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}

// ============================================================================
// Common Types
// ============================================================================

/// Reference to another object by name and optional namespace.
///
/// The namespace defaults to the namespace of the referring resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSelector {
    /// Name of the referenced object
    #[serde(default)]
    pub name: String,

    /// Namespace of the referenced object, defaults to the referring resource's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectSelector {
    /// A selector is defined when it names an object.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !self.name.is_empty()
    }

    /// Namespace of the referenced object, falling back to `default_namespace`.
    #[must_use]
    pub fn namespace_or(&self, default_namespace: &str) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => default_namespace.to_string(),
        }
    }
}

/// HTTP layer settings of a product.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Service template for the HTTP service
    #[serde(default)]
    pub service: ServiceTemplate,

    /// TLS options for the HTTP layer
    #[serde(default)]
    pub tls: TlsOptions,
}

/// User overrides applied to a generated Service.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    /// Labels and annotations merged into the generated Service
    #[serde(default)]
    pub metadata: ServiceTemplateMeta,

    /// Spec fields merged into the generated Service
    #[serde(default)]
    pub spec: ServiceTemplateSpec,
}

/// Metadata overrides of a generated Service.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateMeta {
    /// Extra labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Extra annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Spec overrides of a generated Service.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateSpec {
    /// Service type, e.g. `ClusterIP` or `LoadBalancer`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// TLS options of the HTTP layer.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// Settings of the operator-generated self-signed certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed_certificate: Option<SelfSignedCertificate>,

    /// User-provided certificate, used instead of a self-signed one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<SecretRef>,
}

impl TlsOptions {
    /// TLS is enabled unless the self-signed certificate is explicitly disabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self
            .self_signed_certificate
            .as_ref()
            .is_some_and(|s| s.disabled)
    }

    /// Name of the user-provided certificate secret, if any.
    #[must_use]
    pub fn custom_certificate_secret(&self) -> Option<&str> {
        self.certificate
            .as_ref()
            .map(|c| c.secret_name.as_str())
            .filter(|n| !n.is_empty())
    }

    /// Extra subject alternative names requested by the user.
    #[must_use]
    pub fn subject_alt_names(&self) -> &[SubjectAlternativeName] {
        self.self_signed_certificate
            .as_ref()
            .map_or(&[], |s| s.subject_alt_names.as_slice())
    }
}

/// Settings of the self-signed HTTP certificate.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignedCertificate {
    /// Extra subject alternative names
    #[serde(default)]
    pub subject_alt_names: Vec<SubjectAlternativeName>,

    /// Disable TLS on the HTTP layer
    #[serde(default)]
    pub disabled: bool,
}

/// One subject alternative name: a DNS name or an IP address.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAlternativeName {
    /// DNS name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,

    /// IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Reference to a secret in the resource's namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Name of the secret
    pub secret_name: String,
}

/// A secret whose entries are injected as secure settings into the keystore.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    /// Name of the secret, in the resource's namespace
    pub secret_name: String,

    /// Subset of entries to inject; every entry when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<KeyToPath>>,
}

/// Injects the secret entry `key` under the keystore setting `path` (or `key`).
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyToPath {
    /// Key of the secret entry
    pub key: String,

    /// Keystore setting name, defaults to `key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Common types include: Ready, Available, Progressing, Degraded, Failed.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// Association
// ============================================================================

/// Outcome of the latest association reconciliation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub enum AssociationStatus {
    /// No association is configured, or it was never reconciled
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// The association waits for external state (e.g. the cluster to exist)
    Pending,
    /// Credentials, CA and URL are resolved and persisted
    Established,
    /// An unrecoverable error occurred
    Failed,
}

impl fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "",
            Self::Pending => "Pending",
            Self::Established => "Established",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Resolved connection details of an association with Elasticsearch.
///
/// Persisted as JSON in the `association.k8s.elastic.co/es-conf` annotation
/// of the dependent resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssociationConf {
    /// Secret holding the association user's password
    #[serde(default)]
    pub auth_secret_name: String,

    /// Key of the password in the auth secret (also the user name)
    #[serde(default)]
    pub auth_secret_key: String,

    /// Whether the copied CA secret actually holds a CA certificate
    #[serde(default, rename = "caCertProvided")]
    pub ca_cert_provided: bool,

    /// Secret holding a copy of the Elasticsearch HTTP CA
    #[serde(default)]
    pub ca_secret_name: String,

    /// URL of the Elasticsearch HTTP service
    #[serde(default)]
    pub url: String,
}

impl AssociationConf {
    /// Credentials are resolved.
    #[must_use]
    pub fn auth_is_configured(&self) -> bool {
        !self.auth_secret_name.is_empty() && !self.auth_secret_key.is_empty()
    }

    /// A CA copy exists.
    #[must_use]
    pub fn ca_is_configured(&self) -> bool {
        !self.ca_secret_name.is_empty()
    }

    /// URL and credentials are resolved.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && self.auth_is_configured()
    }
}

// ============================================================================
// Elasticsearch
// ============================================================================

/// Health of an Elasticsearch cluster, as reported by `_cluster/health`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ElasticsearchHealth {
    /// All shards allocated
    Green,
    /// All primaries allocated
    Yellow,
    /// Some primaries unallocated, or the cluster is still forming
    Red,
    /// The cluster could not be queried
    #[default]
    Unknown,
}

/// Lifecycle phase of an Elasticsearch cluster.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum ElasticsearchPhase {
    /// Every node set is rolled out
    Ready,
    /// Node sets are being created or updated
    ApplyingChanges,
    /// The spec cannot be reconciled
    Invalid,
}

/// A group of identically configured Elasticsearch nodes.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSet {
    /// Node set name, part of the StatefulSet name
    pub name: String,

    /// Number of nodes
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub count: i32,

    /// `elasticsearch.yml` settings of the node set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// Pod template overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<PodTemplateSpec>,
}

/// `Elasticsearch` represents an Elasticsearch cluster.
///
/// # Example
///
/// ```yaml
/// apiVersion: k8s.elastic.co/v1beta1
/// kind: Elasticsearch
/// metadata:
///   name: es1
///   namespace: default
/// spec:
///   version: 7.4.0
///   nodeSets:
///     - name: default
///       count: 3
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "k8s.elastic.co",
    version = "v1beta1",
    kind = "Elasticsearch",
    namespaced,
    shortname = "es",
    category = "elastic",
    doc = "Elasticsearch represents an Elasticsearch cluster made of one StatefulSet per node set.",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[kube(status = "ElasticsearchStatus")]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Elasticsearch version, e.g. `7.4.0`
    pub version: String,

    /// Container image, defaults to the official image of `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// HTTP layer settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Node sets of the cluster
    #[serde(default)]
    pub node_sets: Vec<NodeSet>,

    /// Secrets injected into the keystore of every node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure_settings: Vec<SecretSource>,
}

/// `Elasticsearch` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchStatus {
    /// Pods that are ready
    #[serde(default)]
    pub available_nodes: i32,

    /// Cluster health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ElasticsearchHealth>,

    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ElasticsearchPhase>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// Kibana, APM Server, Logstash
// ============================================================================

/// Health of a Deployment-backed product.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProductHealth {
    /// At least one instance is available
    Green,
    /// No instance is available
    Red,
}

/// Status shared by Kibana, APM Server and Logstash.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    /// Available replicas of the Deployment
    #[serde(default)]
    pub available_nodes: i32,

    /// Deployment health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ProductHealth>,

    /// Outcome of the latest association reconciliation
    #[serde(default)]
    pub association_status: AssociationStatus,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DeploymentStatus {
    /// The status is worse than `prev`.
    #[must_use]
    pub fn is_degraded(&self, prev: &DeploymentStatus) -> bool {
        prev.health == Some(ProductHealth::Green) && self.health != Some(ProductHealth::Green)
    }
}

/// `Kibana` represents a Kibana deployment.
///
/// # Example
///
/// ```yaml
/// apiVersion: k8s.elastic.co/v1beta1
/// kind: Kibana
/// metadata:
///   name: kb1
/// spec:
///   version: 7.4.0
///   count: 1
///   elasticsearchRef:
///     name: es1
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "k8s.elastic.co",
    version = "v1beta1",
    kind = "Kibana",
    namespaced,
    shortname = "kb",
    category = "elastic",
    doc = "Kibana represents a Kibana deployment connected to an Elasticsearch cluster.",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[kube(status = "DeploymentStatus")]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    /// Kibana version
    pub version: String,

    /// Container image, defaults to the official image of `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of instances
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub count: i32,

    /// Elasticsearch cluster to connect to
    #[serde(default)]
    pub elasticsearch_ref: ObjectSelector,

    /// `kibana.yml` settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// HTTP layer settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Pod template overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<PodTemplateSpec>,

    /// Secrets injected into the keystore
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure_settings: Vec<SecretSource>,
}

/// `ApmServer` represents an APM Server deployment.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "k8s.elastic.co",
    version = "v1beta1",
    kind = "ApmServer",
    namespaced,
    shortname = "apm",
    category = "elastic",
    doc = "ApmServer represents an APM Server deployment, optionally shipping to an Elasticsearch cluster.",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[kube(status = "DeploymentStatus")]
#[serde(rename_all = "camelCase")]
pub struct ApmServerSpec {
    /// APM Server version
    pub version: String,

    /// Container image, defaults to the official image of `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of instances
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub count: i32,

    /// Elasticsearch cluster to ship events to
    #[serde(default)]
    pub elasticsearch_ref: ObjectSelector,

    /// `apm-server.yml` settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// HTTP layer settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Pod template overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<PodTemplateSpec>,

    /// Secrets injected into the keystore
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure_settings: Vec<SecretSource>,
}

/// `Logstash` represents a Logstash deployment.
///
/// # Example
///
/// ```yaml
/// apiVersion: k8s.elastic.co/v1beta1
/// kind: Logstash
/// metadata:
///   name: ls1
/// spec:
///   version: 7.4.0
///   count: 1
///   elasticsearchRef:
///     name: es1
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "k8s.elastic.co",
    version = "v1beta1",
    kind = "Logstash",
    namespaced,
    shortname = "ls",
    category = "elastic",
    doc = "Logstash represents a Logstash deployment shipping events to an Elasticsearch cluster.",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[kube(status = "DeploymentStatus")]
#[serde(rename_all = "camelCase")]
pub struct LogstashSpec {
    /// Logstash version
    pub version: String,

    /// Container image, defaults to the official OSS image of `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of instances
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub count: i32,

    /// Elasticsearch cluster to ship events to
    #[serde(default)]
    pub elasticsearch_ref: ObjectSelector,

    /// Pipeline input configuration; a beats input is generated when blank
    #[serde(default)]
    pub input_conf: String,

    /// Pipeline output configuration; an elasticsearch output is generated when blank
    #[serde(default)]
    pub output_conf: String,

    /// `logstash.yml` settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// HTTP layer settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Pod template overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<PodTemplateSpec>,

    /// Secrets injected into the keystore
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure_settings: Vec<SecretSource>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
