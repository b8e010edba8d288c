// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for managed resources.
//!
//! This module provides utility functions for creating and managing Kubernetes
//! status conditions following the standard conventions.
//!
//! # Condition Format
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (e.g., "Ready")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the condition changed
//!
//! Conditions are recomputed on every pass. [`set_condition`] keeps the
//! previous `lastTransitionTime` when nothing else changed, so an unchanged
//! condition leaves the status byte-identical.
//!
//! # Example
//!
//! ```rust
//! use elastic_operator::reconcilers::status::{create_condition, set_condition};
//!
//! let mut conditions = Vec::new();
//! set_condition(&mut conditions, create_condition("Ready", "True", "Ready", "1/1 available"));
//! assert_eq!(conditions.len(), 1);
//! ```

use crate::crd::Condition;
use chrono::Utc;

/// Create a new condition with the current timestamp.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (e.g., "Ready")
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase`
/// * `message` - A human-readable explanation
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Check if a condition differs from the existing one, ignoring `lastTransitionTime`.
#[must_use]
pub fn condition_changed(existing: Option<&Condition>, new_condition: &Condition) -> bool {
    existing.is_none_or(|current| {
        current.r#type != new_condition.r#type
            || current.status != new_condition.status
            || current.reason != new_condition.reason
            || current.message != new_condition.message
    })
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in a conditions list (in-memory, no API call).
///
/// An unchanged condition is left untouched, timestamp included.
pub fn set_condition(conditions: &mut Vec<Condition>, new_condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == new_condition.r#type)
    {
        Some(existing) => {
            if condition_changed(Some(existing), &new_condition) {
                *existing = new_condition;
            }
        }
        None => conditions.push(new_condition),
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
