// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Association of Kibana, Logstash and APM Server with an Elasticsearch cluster.
//!
//! One association pass resolves everything a dependent needs to talk to its
//! Elasticsearch cluster and persists it in the association configuration:
//!
//! 1. Finalizers releasing the watches and the user secrets are maintained.
//! 2. Secrets left over from a previous reference are garbage collected.
//! 3. The referenced cluster and the user secret are watched.
//! 4. A dedicated Elasticsearch user is reconciled ([`user`]).
//! 5. The cluster HTTP CA is copied next to the dependent ([`ca`]).
//! 6. The resulting [`AssociationConf`] is persisted as an annotation.
//!
//! The outcome is recorded in `status.associationStatus`:
//!
//! | Outcome | Status |
//! |---|---|
//! | no reference | `""` (unknown) |
//! | cluster missing, user or CA failure, conflict | `Pending` |
//! | cluster lookup failure | `Failed` |
//! | configuration persisted | `Established` |

pub mod ca;
pub mod conf;
pub mod user;

use crate::constants::{
    CONFLICT_REQUEUE_SECS, ELASTICSEARCH_HTTP_PORT, PENDING_REQUEUE_SECS,
};
use crate::context::Context;
use crate::crd::{AssociationConf, AssociationStatus, Elasticsearch, ObjectSelector};
use crate::errors::{OperatorError, Result};
use crate::events::{publish_all, PendingEvent};
use crate::labels::{
    association_watch_finalizer, external_user_finalizer, AssociationLabels, TYPE_LABEL,
    USER_TYPE,
};
use crate::metrics;
use crate::name::{Namer, ES_NAMER};
use crate::reconcilers::finalizers::{handle_finalizers, is_being_deleted, Finalizer, WatchFinalizer};
use crate::reconcilers::ReconcileOutcome;
use crate::status_reasons::{EVENT_ASSOCIATION_ERROR, EVENT_ASSOCIATION_STATUS_CHANGE};
use crate::store::{delete_if_exists, get_if_exists, is_controlled_by, ObjectStore, StoreObject};
use crate::watches::{DynamicWatches, NamedWatch, ObjectKey};
use conf::persist_association_conf;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A resource that can be associated with an Elasticsearch cluster.
pub trait Associated: StoreObject {
    /// Product name used in user names, e.g. `logstash`
    const PRODUCT: &'static str;

    /// Elasticsearch role granted to the association user
    const USER_ROLE: &'static str;

    /// Namer of the product's derived objects
    const NAMER: Namer;

    /// Labels marking the secrets created for the association
    const LABELS: AssociationLabels;

    /// The referenced Elasticsearch cluster.
    fn elasticsearch_ref(&self) -> &ObjectSelector;

    /// Association status stored on the resource.
    fn association_status(&self) -> AssociationStatus;

    /// Record a new association status on the resource.
    fn set_association_status(&mut self, status: AssociationStatus);
}

/// Name of the watch registrations on the referenced cluster and its user secret.
#[must_use]
pub fn es_watch_name(dependent: &ObjectKey) -> String {
    format!("{}-{}-es-watch", dependent.namespace, dependent.name)
}

/// Name of the watch registration on the cluster's public HTTP certificates.
#[must_use]
pub fn ca_watch_name(dependent: &ObjectKey) -> String {
    format!("{}-{}-ca-watch", dependent.namespace, dependent.name)
}

/// Namespace and name of the cluster referenced by `resource`.
#[must_use]
pub fn referenced_cluster<K: Associated>(resource: &K) -> ObjectKey {
    let selector = resource.elasticsearch_ref();
    ObjectKey {
        namespace: selector.namespace_or(&resource.namespace().unwrap_or_default()),
        name: selector.name.clone(),
    }
}

/// URL of the HTTP service of `es`.
#[must_use]
pub fn elasticsearch_url(es: &Elasticsearch) -> String {
    let scheme = if es.spec.http.tls.enabled() {
        "https"
    } else {
        "http"
    };
    format!(
        "{scheme}://{}.{}.svc:{ELASTICSEARCH_HTTP_PORT}",
        ES_NAMER.http_service(&es.name_any()),
        es.namespace().unwrap_or_default()
    )
}

fn remove_watches(watches: &DynamicWatches, dependent: &ObjectKey) {
    let es_watch = es_watch_name(dependent);
    watches.elasticsearch_clusters.remove_handler_for_key(&es_watch);
    watches.secrets.remove_handler_for_key(&es_watch);
    watches.secrets.remove_handler_for_key(&ca_watch_name(dependent));
}

/// Run one association pass for `resource`.
///
/// # Errors
///
/// Returns errors that should be retried with the controller backoff. The
/// association status is persisted before they are returned.
pub async fn reconcile_association<K, S>(
    ctx: &Context<S>,
    mut resource: K,
) -> anyhow::Result<ReconcileOutcome>
where
    K: Associated,
    S: ObjectStore,
{
    let store = ctx.store.as_ref();
    let key = ObjectKey::of(&resource);
    let kind = K::kind(&()).to_string();

    let es_watch = es_watch_name(&key);
    let ca_watch = ca_watch_name(&key);
    let watch_finalizer = WatchFinalizer::new(
        association_watch_finalizer(&kind),
        vec![
            (&ctx.watches.elasticsearch_clusters, es_watch.clone()),
            (&ctx.watches.secrets, es_watch),
            (&ctx.watches.secrets, ca_watch),
        ],
    );
    let user_finalizer =
        user::UserFinalizer::new::<K>(store, external_user_finalizer(&kind), &key);
    let finalizers: [&dyn Finalizer; 2] = [&watch_finalizer, &user_finalizer];

    match handle_finalizers(store, &mut resource, &finalizers).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            debug!(namespace = %key.namespace, name = %key.name, "Conflict while handling finalizers");
            metrics::record_reconciliation_requeue(&kind, "conflict");
            return Ok(ReconcileOutcome::requeue(Duration::from_secs(
                CONFLICT_REQUEUE_SECS,
            )));
        }
        Err(e) => return Err(e.into()),
    }
    if is_being_deleted(&resource) {
        ctx.associations.remove(&resource);
        return Ok(ReconcileOutcome::done());
    }

    ctx.associations.load(&resource)?;

    let old_status = resource.association_status();
    let (new_status, failure) = reconcile_internal(ctx, &mut resource).await;

    if new_status != old_status {
        resource.set_association_status(new_status);
        match store.update_status(&resource).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(namespace = %key.namespace, name = %key.name, "Conflict while updating association status");
                return Ok(ReconcileOutcome::requeue(Duration::from_secs(
                    CONFLICT_REQUEUE_SECS,
                )));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            kind = %kind,
            namespace = %key.namespace,
            name = %key.name,
            from = %old_status,
            to = %new_status,
            "Association status changed"
        );
        metrics::record_association_transition(
            &kind,
            &old_status.to_string(),
            &new_status.to_string(),
        );
        publish_all(
            ctx.events.as_ref(),
            &resource,
            &[PendingEvent::normal(
                EVENT_ASSOCIATION_STATUS_CHANGE,
                format!("Association status changed from [{old_status}] to [{new_status}]"),
            )],
        )
        .await;
    }

    if let Some(e) = failure {
        return Err(e.into());
    }
    if new_status == AssociationStatus::Pending {
        metrics::record_reconciliation_requeue(&kind, "pending");
        return Ok(ReconcileOutcome::requeue(Duration::from_secs(
            PENDING_REQUEUE_SECS,
        )));
    }
    Ok(ReconcileOutcome::done())
}

async fn reconcile_internal<K, S>(
    ctx: &Context<S>,
    resource: &mut K,
) -> (AssociationStatus, Option<OperatorError>)
where
    K: Associated,
    S: ObjectStore,
{
    let store = ctx.store.as_ref();
    let key = ObjectKey::of(&*resource);
    let reference_defined = resource.elasticsearch_ref().is_defined();
    let es_key = referenced_cluster(&*resource);

    if let Err(e) = delete_orphaned_secrets(store, &*resource, reference_defined, &es_key).await {
        warn!(namespace = %key.namespace, name = %key.name, error = %e, "Failed to delete orphaned association secrets");
    }

    if !reference_defined {
        remove_watches(&ctx.watches, &key);
        if let Err(e) = persist_association_conf(store, resource, None).await {
            if !e.is_conflict() {
                return (AssociationStatus::Unknown, Some(e));
            }
            debug!(namespace = %key.namespace, name = %key.name, "Conflict while removing association configuration");
        }
        ctx.associations.remove(&*resource);
        return (AssociationStatus::Unknown, None);
    }

    let es_watch = es_watch_name(&key);
    ctx.watches.elasticsearch_clusters.add_handler(NamedWatch {
        name: es_watch.clone(),
        watched: vec![es_key.clone()],
        watcher: key.clone(),
    });
    ctx.watches.secrets.add_handler(NamedWatch {
        name: es_watch,
        watched: vec![ObjectKey::new(
            &es_key.namespace,
            &user::user_name(&key.namespace, &key.name, K::PRODUCT),
        )],
        watcher: key.clone(),
    });

    let es = match get_if_exists::<Elasticsearch, _>(store, &es_key.namespace, &es_key.name).await {
        Ok(Some(es)) => es,
        Ok(None) => {
            publish_all(
                ctx.events.as_ref(),
                &*resource,
                &[PendingEvent::warning(
                    EVENT_ASSOCIATION_ERROR,
                    format!("Failed to find referenced backend {es_key}"),
                )],
            )
            .await;
            if let Err(e) = persist_association_conf(store, resource, None).await {
                if !e.is_conflict() {
                    return (AssociationStatus::Pending, Some(e));
                }
            }
            ctx.associations.remove(&*resource);
            return (AssociationStatus::Pending, None);
        }
        Err(e) => {
            error!(namespace = %key.namespace, name = %key.name, error = %e, "Failed to get referenced Elasticsearch cluster");
            return (AssociationStatus::Failed, Some(e));
        }
    };

    let credentials = match user::reconcile_es_user(store, &*resource, &es_key).await {
        Ok(credentials) => credentials,
        Err(e) => return (AssociationStatus::Pending, Some(e)),
    };

    let ca = match ca::reconcile_ca_copy(store, &ctx.watches.secrets, &*resource, &es_key).await {
        Ok(ca) => ca,
        Err(e) => return (AssociationStatus::Pending, Some(e)),
    };

    let expected = AssociationConf {
        auth_secret_name: credentials.auth_secret_name,
        auth_secret_key: credentials.user_name,
        ca_cert_provided: ca.as_ref().is_some_and(|c| c.ca_cert_provided),
        ca_secret_name: ca.map(|c| c.secret_name).unwrap_or_default(),
        url: elasticsearch_url(&es),
    };

    if ctx.associations.get(&*resource).as_ref() != Some(&expected) {
        if let Err(e) = persist_association_conf(store, resource, Some(&expected)).await {
            if e.is_conflict() {
                debug!(namespace = %key.namespace, name = %key.name, "Conflict while persisting association configuration");
                return (AssociationStatus::Pending, None);
            }
            return (AssociationStatus::Pending, Some(e));
        }
        ctx.associations.set(&*resource, expected);
    }

    (AssociationStatus::Established, None)
}

/// Delete secrets created for `resource` that its current reference no longer needs.
///
/// Only secrets owned by the resource, or labeled for its name and namespace,
/// are considered.
async fn delete_orphaned_secrets<K, S>(
    store: &S,
    resource: &K,
    reference_defined: bool,
    es: &ObjectKey,
) -> Result<()>
where
    K: Associated,
    S: ObjectStore + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let uid = resource.uid().unwrap_or_default();

    let secrets: Vec<Secret> = store.list(None, &K::LABELS.name_selector(&name)).await?;
    for secret in secrets {
        let labels = secret.labels();
        let ours = (!uid.is_empty() && is_controlled_by(&secret, &uid))
            || K::LABELS.created_for(Some(labels), &name, &namespace);
        if !ours {
            continue;
        }
        let secret_namespace = secret.namespace().unwrap_or_default();
        let is_user = labels.get(TYPE_LABEL).is_some_and(|t| t == USER_TYPE);
        if reference_defined && !(is_user && secret_namespace != es.namespace) {
            continue;
        }
        let secret_name = secret.name_any();
        info!(
            namespace = %secret_namespace,
            name = %secret_name,
            dependent = %name,
            "Deleting orphaned association secret"
        );
        delete_if_exists::<Secret, _>(store, &secret_namespace, &secret_name).await?;
        metrics::record_resource_deleted("Secret");
    }
    Ok(())
}

#[cfg(test)]
#[path = "association_tests.rs"]
mod association_tests;
