// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Elastic-specific labels/finalizers
//! to ensure consistency across all resources created by the controller.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for `app.kubernetes.io/managed-by` on everything this operator creates
pub const MANAGED_BY_OPERATOR: &str = "elastic-operator";

// ============================================================================
// Elastic-Specific Labels
// ============================================================================

/// Label describing which product (or user) a resource belongs to
pub const TYPE_LABEL: &str = "common.k8s.elastic.co/type";

/// `common.k8s.elastic.co/type` value for Elasticsearch user secrets
pub const USER_TYPE: &str = "user";

/// Label naming the Elasticsearch cluster a resource belongs to
pub const ELASTICSEARCH_CLUSTER_NAME_LABEL: &str = "elasticsearch.k8s.elastic.co/cluster-name";

/// Label naming the node set (StatefulSet) an Elasticsearch pod belongs to
pub const ELASTICSEARCH_NODE_SET_LABEL: &str = "elasticsearch.k8s.elastic.co/statefulset-name";

/// Label naming the Kibana a resource belongs to
pub const KIBANA_NAME_LABEL: &str = "kibana.k8s.elastic.co/name";

/// Label naming the APM Server a resource belongs to
pub const APM_SERVER_NAME_LABEL: &str = "apm.k8s.elastic.co/name";

/// Label naming the Logstash a resource belongs to
pub const LOGSTASH_NAME_LABEL: &str = "logstash.k8s.elastic.co/name";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer removing the dynamic watches an association controller registered
#[must_use]
pub fn association_watch_finalizer(kind: &str) -> String {
    format!(
        "finalizer.association.{}.k8s.elastic.co/elasticsearch",
        kind.to_lowercase()
    )
}

/// Finalizer deleting the Elasticsearch user secrets created for an association
#[must_use]
pub fn external_user_finalizer(kind: &str) -> String {
    format!(
        "finalizer.association.{}.k8s.elastic.co/external-user",
        kind.to_lowercase()
    )
}

/// Finalizer removing the secure settings watch of a managed resource
#[must_use]
pub fn secure_settings_finalizer(kind: &str) -> String {
    format!(
        "finalizer.{}.k8s.elastic.co/secure-settings-secret",
        kind.to_lowercase()
    )
}

/// Finalizer removing the auth/CA secret watch of a product driver
#[must_use]
pub fn es_auth_secret_finalizer(kind: &str) -> String {
    format!("finalizer.{}.k8s.elastic.co/es-auth-secret", kind.to_lowercase())
}

// ============================================================================
// Association Labels
// ============================================================================

/// Labels marking resources created by one association controller.
///
/// The name/namespace pair identifies the dependent resource the secrets were
/// created for, so garbage collection never touches another dependent's secrets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssociationLabels {
    /// e.g. `logstashassociation.k8s.elastic.co/name`
    pub name: &'static str,
    /// e.g. `logstashassociation.k8s.elastic.co/namespace`
    pub namespace: &'static str,
}

/// Association labels for Kibana ↔ Elasticsearch
pub const KIBANA_ASSOCIATION_LABELS: AssociationLabels = AssociationLabels {
    name: "kibanaassociation.k8s.elastic.co/name",
    namespace: "kibanaassociation.k8s.elastic.co/namespace",
};

/// Association labels for APM Server ↔ Elasticsearch
pub const APM_ASSOCIATION_LABELS: AssociationLabels = AssociationLabels {
    name: "apmassociation.k8s.elastic.co/name",
    namespace: "apmassociation.k8s.elastic.co/namespace",
};

/// Association labels for Logstash ↔ Elasticsearch
pub const LOGSTASH_ASSOCIATION_LABELS: AssociationLabels = AssociationLabels {
    name: "logstashassociation.k8s.elastic.co/name",
    namespace: "logstashassociation.k8s.elastic.co/namespace",
};

impl AssociationLabels {
    /// Selector matching every secret carrying the association name label.
    #[must_use]
    pub fn name_selector(&self, name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(self.name.to_string(), name.to_string())])
    }

    /// Selector matching the name+namespace pair of one dependent.
    #[must_use]
    pub fn pair_selector(&self, name: &str, namespace: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (self.name.to_string(), name.to_string()),
            (self.namespace.to_string(), namespace.to_string()),
        ])
    }

    /// Selector matching the Elasticsearch user secrets created for one dependent.
    #[must_use]
    pub fn user_selector(&self, name: &str, namespace: &str) -> BTreeMap<String, String> {
        let mut labels = self.pair_selector(name, namespace);
        labels.insert(TYPE_LABEL.to_string(), USER_TYPE.to_string());
        labels
    }

    /// Whether `labels` carry both halves of the pair for this dependent.
    #[must_use]
    pub fn created_for(
        &self,
        labels: Option<&BTreeMap<String, String>>,
        name: &str,
        namespace: &str,
    ) -> bool {
        labels.is_some_and(|l| {
            l.get(self.name).is_some_and(|v| v == name)
                && l.get(self.namespace).is_some_and(|v| v == namespace)
        })
    }
}

// ============================================================================
// Label Builders
// ============================================================================

/// Labels applied to every object belonging to one managed resource.
#[must_use]
pub fn new_labels(type_value: &str, name_label: &str, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TYPE_LABEL.to_string(), type_value.to_string()),
        (name_label.to_string(), name.to_string()),
    ])
}

/// Name of the pod template label holding the configuration checksum of a product.
#[must_use]
pub fn config_checksum_label(type_value: &str) -> String {
    let prefix = match type_value {
        "apm-server" => "apm",
        other => other,
    };
    format!("{prefix}.k8s.elastic.co/config-checksum")
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod labels_tests;
