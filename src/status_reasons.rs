// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard condition types and reasons, and Kubernetes Event reasons.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a
//! condition has a particular status, or why an event was emitted.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   availableNodes: 1
//!   health: green
//!   associationStatus: Established
//!   conditions:
//!     - type: Ready
//!       status: "True"
//!       reason: Ready
//!       message: "1/1 nodes available"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Encompassing readiness of a managed resource
pub const CONDITION_TYPE_READY: &str = "Ready";

// ============================================================================
// Condition Reasons
// ============================================================================

/// Every expected node is available.
pub const REASON_READY: &str = "Ready";

/// Nodes are being created or updated.
pub const REASON_PROGRESSING: &str = "Progressing";

/// Workload creation is blocked until the Elasticsearch association is configured.
pub const REASON_ASSOCIATION_NOT_CONFIGURED: &str = "AssociationNotConfigured";

/// The spec cannot be reconciled.
pub const REASON_INVALID: &str = "Invalid";

// ============================================================================
// Event Reasons
// ============================================================================

/// The spec could not be reconciled (e.g. invalid version).
pub const EVENT_RECONCILIATION_ERROR: &str = "ReconciliationError";

/// The association backend is missing or not configured.
pub const EVENT_ASSOCIATION_ERROR: &str = "AssociationError";

/// The association status changed.
pub const EVENT_ASSOCIATION_STATUS_CHANGE: &str = "AssociationStatusChange";

/// Health degraded from green.
pub const EVENT_UNHEALTHY: &str = "Unhealthy";

/// A referenced secure settings secret does not exist.
pub const EVENT_SECURE_SETTINGS_ERROR: &str = "SecureSettingsError";

/// Map a ready flag to a condition status string.
#[must_use]
pub fn condition_status(ready: bool) -> &'static str {
    if ready {
        "True"
    } else {
        "False"
    }
}
