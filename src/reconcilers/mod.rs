// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for the Elastic Stack.
//!
//! Each managed kind has a product driver, and the kinds that connect to
//! Elasticsearch also have an association controller:
//!
//! | Kind | Driver | Association |
//! |---|---|---|
//! | `Elasticsearch` | [`elasticsearch::reconcile_elasticsearch`] | |
//! | `Kibana` | [`kibana::reconcile_kibana`] | [`association::reconcile_association`] |
//! | `ApmServer` | [`apmserver::reconcile_apm_server`] | [`association::reconcile_association`] |
//! | `Logstash` | [`logstash::reconcile_logstash`] | [`association::reconcile_association`] |
//!
//! # Reconciliation Architecture
//!
//! 1. **Watch** - Managed resources, their children and the dynamic watches
//! 2. **Reconcile** - Build the expected children and create or update them
//! 3. **Status** - Accumulate the observed state and persist it once
//!
//! # Example: Running one Logstash pass
//!
//! ```rust,no_run
//! use elastic_operator::context::Context;
//! use elastic_operator::crd::Logstash;
//! use elastic_operator::reconcilers::logstash::reconcile_logstash;
//! use elastic_operator::store::MemoryStore;
//! use std::sync::Arc;
//!
//! async fn run(ls: Logstash) -> anyhow::Result<()> {
//!     let ctx = Context::for_store(Arc::new(MemoryStore::new()));
//!     let outcome = reconcile_logstash(&ctx, ls).await?;
//!     println!("requeue after {:?}", outcome.requeue_after);
//!     Ok(())
//! }
//! ```

pub mod apmserver;
pub mod association;
pub mod driver;
pub mod elasticsearch;
pub mod finalizers;
pub mod kibana;
pub mod logstash;
pub mod resources;
pub mod state;
pub mod status;

use std::time::Duration;

/// Scheduling decision of one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Reconcile again after this delay, even without a watch event
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Nothing to schedule; the next pass comes from a watch event.
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Reconcile again after `delay`.
    #[must_use]
    pub fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Keep the earliest requeue of `self` and `other`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self { requeue_after }
    }

    /// Keep the earliest of the current requeue and `delay`.
    #[must_use]
    pub fn requeue_at_most(self, delay: Duration) -> Self {
        self.merge(Self::requeue(delay))
    }
}

#[cfg(test)]
mod mod_tests;
