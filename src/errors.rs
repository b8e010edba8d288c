// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for the Elastic Stack operator.
//!
//! Reconcilers need to tell apart a handful of error classes:
//!
//! - **not-found**: expected absence, drives the create path or a `Pending` association
//! - **conflict**: optimistic concurrency failure, resolved by requeueing
//! - **validation**: bad spec content, reported through a warning event, never retried
//! - **transient**: control-plane or crypto failures, retried by the controller backoff
//!
//! Helpers keep the classification intact, so it survives being wrapped in
//! [`anyhow::Error`] at the controller boundary (see [`classify`]).

use thiserror::Error;

/// Errors returned by the object store, certificate manager and reconcilers.
#[derive(Error, Debug)]
pub enum OperatorError {
    /// The requested object does not exist (HTTP 404)
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespace of the missing object
        namespace: String,
        /// Name of the missing object
        name: String,
    },

    /// An optimistic concurrency conflict occurred (HTTP 409)
    ///
    /// Returned when the resourceVersion sent with an update is stale, or when
    /// creating an object that already exists.
    #[error("conflict on {kind} {namespace}/{name}: {reason}")]
    Conflict {
        /// Kind of the conflicting object
        kind: String,
        /// Namespace of the conflicting object
        namespace: String,
        /// Name of the conflicting object
        name: String,
        /// Server supplied reason
        reason: String,
    },

    /// The managed resource spec is invalid and needs a user correction
    #[error("validation failed: {0}")]
    Validation(String),

    /// The Kubernetes API returned an unexpected error
    #[error("kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// Certificate generation or parsing failed
    #[error("certificate error: {0}")]
    Certificate(String),

    /// An object could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration document could not be rendered or parsed
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The association could not be resolved
    #[error("association error: {0}")]
    Association(String),
}

/// Convenience alias used by the store and certificate layers.
pub type Result<T, E = OperatorError> = std::result::Result<T, E>;

impl OperatorError {
    /// Build a `NotFound` error.
    #[must_use]
    pub fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Build a `Conflict` error.
    #[must_use]
    pub fn conflict(kind: &str, namespace: &str, name: &str, reason: &str) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Map a `kube::Error` onto the taxonomy, keeping 404 and 409 distinguishable.
    #[must_use]
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(status) if status.code == 404 => {
                Self::not_found(kind, namespace, name)
            }
            kube::Error::Api(status) if status.code == 409 => {
                Self::conflict(kind, namespace, name, &status.message)
            }
            _ => Self::Kube(err),
        }
    }

    /// Returns true if this error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this error is an optimistic concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this error requires a spec correction.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Short category name used for the `error_type` metrics label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Validation(_) => "validation_error",
            Self::Kube(_) => "api_error",
            Self::Certificate(_) => "certificate_error",
            Self::Serialization(_) | Self::Config(_) => "serialization_error",
            Self::Association(_) => "association_error",
        }
    }
}

/// Find the [`OperatorError`] inside an `anyhow` chain, if any.
#[must_use]
pub fn classify(err: &anyhow::Error) -> Option<&OperatorError> {
    err.chain().find_map(|e| e.downcast_ref::<OperatorError>())
}

/// Returns true if an `anyhow` error wraps a conflict.
#[must_use]
pub fn is_conflict(err: &anyhow::Error) -> bool {
    classify(err).is_some_and(OperatorError::is_conflict)
}

/// Returns true if an `anyhow` error wraps a not-found.
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    classify(err).is_some_and(OperatorError::is_not_found)
}

/// Returns true if an `anyhow` error wraps a validation failure.
#[must_use]
pub fn is_validation(err: &anyhow::Error) -> bool {
    classify(err).is_some_and(OperatorError::is_validation)
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
