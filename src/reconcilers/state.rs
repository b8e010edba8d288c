// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status and event accumulation for one reconciliation pass.
//!
//! Drivers never write status directly. They record observations on a
//! [`ReconcileState`] and, at the end of the pass, [`ReconcileState::apply`]
//! hands back the events to publish and the new status, or `None` when the
//! status did not change. The caller persists the status once.

use crate::crd::{
    DeploymentStatus, ElasticsearchHealth, ElasticsearchPhase, ElasticsearchStatus, ProductHealth,
};
use crate::events::PendingEvent;
use crate::reconcilers::status::{create_condition, set_condition};
use crate::status_reasons::{
    condition_status, CONDITION_TYPE_READY, EVENT_UNHEALTHY, REASON_INVALID, REASON_PROGRESSING,
    REASON_READY,
};

/// A status type whose degradation is reported as an event.
pub trait TrackedStatus: Clone + Default + PartialEq + Send {
    /// The status is worse than `prev`.
    fn is_degraded(&self, prev: &Self) -> bool;

    /// Message of the `Unhealthy` event emitted on degradation.
    fn degraded_message(&self) -> String;
}

impl TrackedStatus for DeploymentStatus {
    fn is_degraded(&self, prev: &Self) -> bool {
        DeploymentStatus::is_degraded(self, prev)
    }

    fn degraded_message(&self) -> String {
        "Health degraded".to_string()
    }
}

impl TrackedStatus for ElasticsearchStatus {
    /// Green to yellow or red. Unknown health never counts as degraded.
    fn is_degraded(&self, prev: &Self) -> bool {
        prev.health == Some(ElasticsearchHealth::Green)
            && matches!(
                self.health,
                Some(ElasticsearchHealth::Yellow | ElasticsearchHealth::Red)
            )
    }

    fn degraded_message(&self) -> String {
        "Elasticsearch cluster health degraded".to_string()
    }
}

/// Accumulates the new status and the events of one reconciliation pass.
#[derive(Debug)]
pub struct ReconcileState<S> {
    original: S,
    status: S,
    events: Vec<PendingEvent>,
}

impl<S: TrackedStatus> ReconcileState<S> {
    /// Start from the status currently stored on the resource.
    #[must_use]
    pub fn new(current: Option<&S>) -> Self {
        let original = current.cloned().unwrap_or_default();
        Self {
            status: original.clone(),
            original,
            events: Vec::new(),
        }
    }

    /// The status as it was at the start of the pass.
    #[must_use]
    pub fn original(&self) -> &S {
        &self.original
    }

    /// The status being built.
    #[must_use]
    pub fn status(&self) -> &S {
        &self.status
    }

    /// Mutable access to the status being built.
    pub fn status_mut(&mut self) -> &mut S {
        &mut self.status
    }

    /// Queue an event.
    pub fn add_event(&mut self, event: PendingEvent) {
        self.events.push(event);
    }

    /// Events queued so far.
    #[must_use]
    pub fn events(&self) -> &[PendingEvent] {
        &self.events
    }

    /// Finish the pass: events to publish and the status to persist, if changed.
    ///
    /// A degradation since the original status adds a `Unhealthy` warning.
    #[must_use]
    pub fn apply(mut self) -> (Vec<PendingEvent>, Option<S>) {
        if self.status.is_degraded(&self.original) {
            let message = self.status.degraded_message();
            self.events.push(PendingEvent::warning(EVENT_UNHEALTHY, message));
        }
        let changed = (self.status != self.original).then_some(self.status);
        (self.events, changed)
    }
}

impl ReconcileState<DeploymentStatus> {
    /// Record the observed deployment state.
    ///
    /// Health is green iff the deployment reports `Available=True`.
    pub fn update_deployment(&mut self, available_nodes: i32, available: bool, expected: i32) {
        self.status.available_nodes = available_nodes;
        self.status.health = Some(if available {
            ProductHealth::Green
        } else {
            ProductHealth::Red
        });
        let (reason, message) = if available {
            (REASON_READY, format!("{available_nodes}/{expected} nodes available"))
        } else {
            (
                REASON_PROGRESSING,
                format!("{available_nodes}/{expected} nodes available"),
            )
        };
        set_condition(
            &mut self.status.conditions,
            create_condition(
                CONDITION_TYPE_READY,
                condition_status(available),
                reason,
                &message,
            ),
        );
    }

    /// Record the generation this pass reconciled.
    pub fn update_observed_generation(&mut self, generation: Option<i64>) {
        self.status.observed_generation = generation;
    }
}

impl ReconcileState<ElasticsearchStatus> {
    /// Record the observed cluster state.
    pub fn update_elasticsearch_state(
        &mut self,
        available_nodes: i32,
        health: ElasticsearchHealth,
        phase: ElasticsearchPhase,
    ) {
        self.status.available_nodes = available_nodes;
        self.status.health = Some(health);
        self.status.phase = Some(phase);
        let ready = phase == ElasticsearchPhase::Ready;
        let reason = if ready { REASON_READY } else { REASON_PROGRESSING };
        set_condition(
            &mut self.status.conditions,
            create_condition(
                CONDITION_TYPE_READY,
                condition_status(ready),
                reason,
                &format!("{available_nodes} nodes available"),
            ),
        );
    }

    /// Mark the cluster invalid and queue a warning event.
    pub fn update_elasticsearch_invalid(&mut self, event: PendingEvent) {
        self.status.phase = Some(ElasticsearchPhase::Invalid);
        set_condition(
            &mut self.status.conditions,
            create_condition(
                CONDITION_TYPE_READY,
                condition_status(false),
                REASON_INVALID,
                &event.message,
            ),
        );
        self.events.push(event);
    }

    /// Record the generation this pass reconciled.
    pub fn update_observed_generation(&mut self, generation: Option<i64>) {
        self.status.observed_generation = generation;
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod state_tests;
