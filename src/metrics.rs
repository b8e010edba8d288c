// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the Elastic Stack operator.
//!
//! This module provides metrics collection with the namespace prefix
//! `elastic_operator_k8s_elastic_co` (prometheus-safe version of
//! "elastic-operator.k8s.elastic.co").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Track reconciliation operations and their outcomes
//! - **Resource Lifecycle Metrics** - Track derived resource creation, updates, and deletions
//! - **Association Metrics** - Track association status transitions
//! - **Certificate Metrics** - Track CA and HTTP certificate rotations
//! - **Error Metrics** - Track error conditions and types
//!
//! # Example
//!
//! ```rust,no_run
//! use elastic_operator::metrics::record_reconciliation_success;
//!
//! // Record a successful reconciliation
//! record_reconciliation_success("Logstash", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all operator metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "elastic_operator_k8s_elastic_co";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by resource type and status
///
/// Labels:
/// - `resource_type`: Kind of resource (e.g., `Kibana`, `LogstashAssociation`)
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Labels:
/// - `resource_type`: Kind of resource
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeue operations
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `reason`: Reason for requeue (`error`, `conflict`, `pending`, `certificate_rotation`)
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Resource Lifecycle Metrics
// ============================================================================

/// Total number of derived resources created
///
/// Labels:
/// - `resource_type`: Kind of resource created (e.g., `Secret`, `Deployment`)
pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_created_total"),
        "Total number of resources created by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of derived resources updated
///
/// Labels:
/// - `resource_type`: Kind of resource updated
pub static RESOURCES_UPDATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_updated_total"),
        "Total number of resources updated by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of derived resources deleted
///
/// Labels:
/// - `resource_type`: Kind of resource deleted
pub static RESOURCES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_deleted_total"),
        "Total number of resources deleted by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Association Metrics
// ============================================================================

/// Total number of association status transitions
///
/// Labels:
/// - `resource_type`: Kind of the associated resource
/// - `from`: Previous status (`unknown` for the empty status)
/// - `to`: New status
pub static ASSOCIATION_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_association_transitions_total"),
        "Total number of association status transitions by resource type",
    );
    let counter = CounterVec::new(opts, &["resource_type", "from", "to"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Certificate Metrics
// ============================================================================

/// Total number of certificates issued, first issuance included
///
/// Labels:
/// - `resource_type`: Kind of the owner of the certificate
/// - `cert_type`: `http` for the HTTP CA and leaf certificates
pub static CERTIFICATE_ROTATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_certificate_rotations_total"),
        "Total number of certificates issued by owner type and certificate type",
    );
    let counter = CounterVec::new(opts, &["resource_type", "cert_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Health Metrics
// ============================================================================

/// Available nodes of each managed resource
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `namespace`: Namespace of the resource
/// - `name`: Name of the resource
pub static AVAILABLE_NODES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_available_nodes"),
        "Number of available nodes by managed resource",
    );
    let gauge = GaugeVec::new(opts, &["resource_type", "namespace", "name"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors by resource type and error category
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `error_type`: Category of error (`api_error`, `conflict`, `validation_error`, ...)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by resource type and error category",
    );
    let counter = CounterVec::new(opts, &["resource_type", "error_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled (e.g., `Kibana`)
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `duration` - Duration of the reconciliation before failure
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `reason` - Reason for requeue (e.g., `conflict`, `pending`)
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// Record resource creation
pub fn record_resource_created(resource_type: &str) {
    RESOURCES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record resource update
pub fn record_resource_updated(resource_type: &str) {
    RESOURCES_UPDATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record resource deletion
pub fn record_resource_deleted(resource_type: &str) {
    RESOURCES_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record an association status transition
///
/// # Arguments
/// * `resource_type` - Kind of the associated resource
/// * `from` - Previous status, empty for unknown
/// * `to` - New status, empty for unknown
pub fn record_association_transition(resource_type: &str, from: &str, to: &str) {
    let label = |s: &str| if s.is_empty() { "unknown" } else { s }.to_lowercase();
    ASSOCIATION_TRANSITIONS_TOTAL
        .with_label_values(&[resource_type, &label(from), &label(to)])
        .inc();
}

/// Record the issuance of a CA or leaf certificate
///
/// # Arguments
/// * `resource_type` - Kind of the certificate owner
/// * `cert_type` - Certificate type (e.g., `http`)
pub fn record_certificate_rotation(resource_type: &str, cert_type: &str) {
    CERTIFICATE_ROTATIONS_TOTAL
        .with_label_values(&[resource_type, cert_type])
        .inc();
}

/// Record the number of available nodes of a managed resource
pub fn record_available_nodes(resource_type: &str, namespace: &str, name: &str, nodes: i32) {
    AVAILABLE_NODES
        .with_label_values(&[resource_type, namespace, name])
        .set(f64::from(nodes));
}

/// Record an error
///
/// # Arguments
/// * `resource_type` - The kind of resource where error occurred
/// * `error_type` - Category of error (e.g., `api_error`, `validation_error`)
pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Returns
/// Prometheus-formatted metrics as a String
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_pass_counts_and_times() {
        record_reconciliation_success("Kibana", Duration::from_millis(500));

        let passes = RECONCILIATION_TOTAL.with_label_values(&["Kibana", "success"]);
        assert!(passes.get() >= 1.0);
        let timings = RECONCILIATION_DURATION_SECONDS.with_label_values(&["Kibana"]);
        assert!(timings.get_sample_count() >= 1);
    }

    #[test]
    fn test_failed_pass_and_error_category() {
        record_reconciliation_error("LogstashAssociation", Duration::from_millis(250));
        record_error("LogstashAssociation", "conflict");

        assert!(
            RECONCILIATION_TOTAL
                .with_label_values(&["LogstashAssociation", "error"])
                .get()
                >= 1.0
        );
        assert!(
            ERRORS_TOTAL
                .with_label_values(&["LogstashAssociation", "conflict"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_available_nodes_gauge_tracks_latest_value() {
        record_available_nodes("Elasticsearch", "default", "gauge-es", 3);
        record_available_nodes("Elasticsearch", "default", "gauge-es", 1);

        let gauge = AVAILABLE_NODES.with_label_values(&["Elasticsearch", "default", "gauge-es"]);
        assert!((gauge.get() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_association_transition_labels_unknown_status() {
        record_association_transition("TransitionTest", "", "Pending");

        let counter = ASSOCIATION_TRANSITIONS_TOTAL.with_label_values(&[
            "TransitionTest",
            "unknown",
            "pending",
        ]);
        assert!(counter.get() >= 1.0);
    }

    #[test]
    fn test_record_certificate_rotation() {
        record_certificate_rotation("RotationTest", "http");
        record_certificate_rotation("RotationTest", "http");

        let counter = CERTIFICATE_ROTATIONS_TOTAL.with_label_values(&["RotationTest", "http"]);
        assert!(counter.get() >= 2.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_requeue("ApmServer", "pending_association");

        let text = gather_metrics().unwrap();
        assert!(text.contains("elastic_operator_k8s_elastic_co_requeues_total"));
        assert!(text.contains("pending_association"));
    }
}
