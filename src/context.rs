// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every controller receives an `Arc<Context<S>>` holding:
//! - the object store (the Kubernetes API in production, memory in tests)
//! - the event publisher
//! - the dynamic watch registries of the controller
//! - the association configuration side-table
//! - the Elasticsearch health observer
//! - the resolved operator parameters
//!
//! Watch registries are per controller: use [`Context::with_fresh_watches`]
//! when wiring a new controller from a shared base context.

use crate::config::OperatorParams;
use crate::events::{EventPublisher, NoopEventPublisher};
use crate::observer::{ClusterHealthObserver, StaticHealthObserver};
use crate::reconcilers::association::conf::AssociationTable;
use crate::store::ObjectStore;
use crate::watches::DynamicWatches;
use std::sync::Arc;

/// Shared context passed to all controllers.
pub struct Context<S: ObjectStore> {
    /// Object store client
    pub store: Arc<S>,

    /// Kubernetes event sink
    pub events: Arc<dyn EventPublisher>,

    /// Dynamic watches of this controller
    pub watches: Arc<DynamicWatches>,

    /// Association configurations, keyed by dependent
    pub associations: Arc<AssociationTable>,

    /// Elasticsearch cluster health source
    pub observer: Arc<dyn ClusterHealthObserver>,

    /// Operator parameters
    pub params: OperatorParams,
}

impl<S: ObjectStore> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            watches: Arc::clone(&self.watches),
            associations: Arc::clone(&self.associations),
            observer: Arc::clone(&self.observer),
            params: self.params.clone(),
        }
    }
}

impl<S: ObjectStore> Context<S> {
    /// Build a context with its own watch registries.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        events: Arc<dyn EventPublisher>,
        observer: Arc<dyn ClusterHealthObserver>,
        params: OperatorParams,
    ) -> Self {
        Self {
            store,
            events,
            watches: Arc::new(DynamicWatches::new()),
            associations: Arc::new(AssociationTable::new()),
            observer,
            params,
        }
    }

    /// Context for a store with no events, no reachable cluster and default parameters.
    #[must_use]
    pub fn for_store(store: Arc<S>) -> Self {
        Self::new(
            store,
            Arc::new(NoopEventPublisher),
            Arc::new(StaticHealthObserver::new()),
            OperatorParams::default(),
        )
    }

    /// A copy sharing everything but the watch registries, which start empty.
    #[must_use]
    pub fn with_fresh_watches(&self) -> Self {
        Self {
            watches: Arc::new(DynamicWatches::new()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
