// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Elastic Stack operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Elastic Stack CRDs
pub const API_GROUP: &str = "k8s.elastic.co";

/// API version for all Elastic Stack CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "k8s.elastic.co/v1beta1";

/// Kind name for `Elasticsearch` resource
pub const KIND_ELASTICSEARCH: &str = "Elasticsearch";

/// Kind name for `Kibana` resource
pub const KIND_KIBANA: &str = "Kibana";

/// Kind name for `ApmServer` resource
pub const KIND_APM_SERVER: &str = "ApmServer";

/// Kind name for `Logstash` resource
pub const KIND_LOGSTASH: &str = "Logstash";

// ============================================================================
// Product Ports
// ============================================================================

/// Elasticsearch HTTP API port
pub const ELASTICSEARCH_HTTP_PORT: i32 = 9200;

/// Elasticsearch transport (node-to-node) port
pub const ELASTICSEARCH_TRANSPORT_PORT: i32 = 9300;

/// Kibana HTTP port
pub const KIBANA_HTTP_PORT: i32 = 5601;

/// APM Server HTTP port
pub const APM_SERVER_HTTP_PORT: i32 = 8200;

/// Logstash beats input port
pub const LOGSTASH_BEATS_PORT: i32 = 5044;

/// Logstash monitoring API port
pub const LOGSTASH_MONITOR_PORT: i32 = 9600;

// ============================================================================
// Default Images
// ============================================================================

/// Default Elasticsearch image repository (tag is the spec version)
pub const DEFAULT_ELASTICSEARCH_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch";

/// Default Kibana image repository
pub const DEFAULT_KIBANA_IMAGE: &str = "docker.elastic.co/kibana/kibana";

/// Default APM Server image repository
pub const DEFAULT_APM_SERVER_IMAGE: &str = "docker.elastic.co/apm/apm-server";

/// Default Logstash image repository
pub const DEFAULT_LOGSTASH_IMAGE: &str = "docker.elastic.co/logstash/logstash-oss";

// ============================================================================
// Container Names
// ============================================================================

/// Main container name in Elasticsearch pods
pub const ELASTICSEARCH_CONTAINER_NAME: &str = "elasticsearch";

/// Main container name in Kibana pods
pub const KIBANA_CONTAINER_NAME: &str = "kibana";

/// Main container name in APM Server pods
pub const APM_SERVER_CONTAINER_NAME: &str = "apm-server";

/// Main container name in Logstash pods
pub const LOGSTASH_CONTAINER_NAME: &str = "logstash";

// ============================================================================
// Kubernetes Naming Limits
// ============================================================================

/// Maximum length of a user-provided managed resource name
pub const MAX_RESOURCE_NAME_LENGTH: usize = 36;

/// Maximum length of a Kubernetes label value (and of derived object names)
pub const LABEL_VALUE_MAX_LENGTH: usize = 63;

// ============================================================================
// Reconciliation Timing
// ============================================================================

/// Requeue delay while an association is pending (seconds)
pub const PENDING_REQUEUE_SECS: u64 = 10;

/// Requeue delay after a reconciliation error (seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue delay after an optimistic concurrency conflict (seconds)
pub const CONFLICT_REQUEUE_SECS: u64 = 5;

/// Interval between cluster health checks of a ready Elasticsearch cluster (seconds)
pub const HEALTH_REQUEUE_SECS: u64 = 60;

/// Timeout for Elasticsearch cluster health requests (seconds)
pub const ES_HEALTH_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Certificate Constants
// ============================================================================

/// Secret key holding a PEM certificate
pub const CERT_FILE_NAME: &str = "tls.crt";

/// Secret key holding a PEM private key
pub const KEY_FILE_NAME: &str = "tls.key";

/// Secret key holding the PEM CA certificate
pub const CA_FILE_NAME: &str = "ca.crt";

/// Default validity of a self-signed CA (hours)
pub const DEFAULT_CA_VALIDITY_HOURS: i64 = 24 * 365;

/// Default validity of an issued HTTP certificate (hours)
pub const DEFAULT_CERT_VALIDITY_HOURS: i64 = 24 * 365;

/// Default safety margin before certificate expiry at which rotation happens (hours)
pub const DEFAULT_ROTATE_BEFORE_HOURS: i64 = 24;

/// Mount path of the HTTP certificates volume inside product containers
pub const HTTP_CERTIFICATES_MOUNT_PATH: &str = "/mnt/elastic-internal/http-certs";

/// Volume name of the HTTP certificates volume
pub const HTTP_CERTIFICATES_VOLUME_NAME: &str = "elastic-internal-http-certificates";

/// Mount path of the Elasticsearch CA copy inside associated product containers
pub const ELASTICSEARCH_CA_MOUNT_PATH: &str = "/usr/share/elastic-internal/elasticsearch-certs";

/// Volume name of the Elasticsearch CA copy
pub const ELASTICSEARCH_CA_VOLUME_NAME: &str = "elasticsearch-certs";

/// Volume name of the rendered product configuration
pub const CONFIG_VOLUME_NAME: &str = "config";

// ============================================================================
// Keystore Constants
// ============================================================================

/// Volume name of the aggregated secure settings
pub const SECURE_SETTINGS_VOLUME_NAME: &str = "elastic-internal-secure-settings";

/// Mount path of the aggregated secure settings
pub const SECURE_SETTINGS_MOUNT_PATH: &str = "/mnt/elastic-internal/secure-settings";

/// Name of the init container that builds the keystore
pub const KEYSTORE_INIT_CONTAINER_NAME: &str = "elastic-internal-init-keystore";

// ============================================================================
// Association Constants
// ============================================================================

/// Annotation holding the serialized association configuration
pub const ASSOCIATION_CONF_ANNOTATION: &str = "association.k8s.elastic.co/es-conf";

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 24;

/// Length of the salt used for `{SSHA256}` password hashes
pub const PASSWORD_SALT_LENGTH: usize = 8;

/// Name of the built-in Elasticsearch superuser
pub const ELASTIC_USER_NAME: &str = "elastic";

/// Lowest supported major version of the Elastic Stack
pub const MIN_SUPPORTED_MAJOR: u64 = 6;

/// Highest supported major version of the Elastic Stack
pub const MAX_SUPPORTED_MAJOR: u64 = 8;

// ============================================================================
// Metrics Server
// ============================================================================

/// Default bind address of the metrics/health HTTP server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Path of the Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path of the liveness endpoint
pub const HEALTH_SERVER_PATH: &str = "/healthz";
