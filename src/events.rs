// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes Event recording.
//!
//! Reconcilers report user-visible outcomes (unresolvable references, health
//! degradation, association status changes) as Kubernetes Events. Publishing
//! is fire-and-forget: a failure is logged and never fails the reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::sync::Mutex;
use tracing::warn;

/// Action recorded on every event emitted by a reconciler.
pub const ACTION_RECONCILE: &str = "Reconcile";

/// An event waiting to be published.
#[derive(Clone, Debug)]
pub struct PendingEvent {
    /// Normal or Warning
    pub type_: EventType,
    /// Machine-readable reason, e.g. `AssociationError`
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl PendingEvent {
    /// A `Normal` event.
    #[must_use]
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// A `Warning` event.
    #[must_use]
    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// Whether this is a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self.type_, EventType::Warning)
    }
}

/// Sink for Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event on the given object.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `event` - Type, reason and message of the event
    async fn publish(&self, resource_ref: &ObjectReference, event: &PendingEvent);
}

/// Publish every event in `events` on `resource`.
pub async fn publish_all<K, P>(publisher: &P, resource: &K, events: &[PendingEvent])
where
    K: Resource<DynamicType = ()>,
    P: EventPublisher + ?Sized,
{
    if events.is_empty() {
        return;
    }
    let reference = resource.object_ref(&());
    for event in events {
        publisher.publish(&reference, event).await;
    }
}

/// Publisher wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`.
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, event: &PendingEvent) {
        let ev = Event {
            type_: event.type_,
            reason: event.reason.clone(),
            note: Some(event.message.clone()),
            action: ACTION_RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&ev, resource_ref).await {
            warn!(
                reason = %event.reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _resource_ref: &ObjectReference, _event: &PendingEvent) {}
}

/// A published event together with the object it was published on.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    /// `namespace/name` of the object
    pub object: String,
    /// The event itself
    pub event: PendingEvent,
}

/// Publisher buffering events in memory.
#[derive(Default)]
pub struct MemoryEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventPublisher {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Reasons of every event published so far, in order.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.event.reason)
            .collect()
    }

    /// Drop the buffered events.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, event: &PendingEvent) {
        let object = format!(
            "{}/{}",
            resource_ref.namespace.as_deref().unwrap_or_default(),
            resource_ref.name.as_deref().unwrap_or_default()
        );
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                object,
                event: event.clone(),
            });
        }
    }
}
