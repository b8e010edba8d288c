// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! End-to-end reconciliation scenarios on the in-memory store.
//!
//! Each scenario drives the Elasticsearch, association and Logstash
//! reconcilers in the order the controllers would, without a cluster.
//!
//! Run with: cargo test --test stack_integration

mod common;

use common::{elasticsearch, logstash, Stack};
use elastic_operator::crd::{
    AssociationStatus, ElasticsearchHealth, ElasticsearchPhase, Logstash, ObjectSelector,
};
use elastic_operator::reconcilers::association::conf::conf_from_annotation;
use elastic_operator::reconcilers::association::{reconcile_association, Associated};
use elastic_operator::reconcilers::elasticsearch::{reconcile_elasticsearch, USERS_FILE};
use elastic_operator::reconcilers::logstash::reconcile_logstash;
use elastic_operator::reconcilers::ReconcileOutcome;
use elastic_operator::store::{is_controlled_by, ObjectStore};
use elastic_operator::watches::ObjectKey;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Secret};
use kube::ResourceExt;
use std::time::Duration;

const CHECKSUM_LABEL: &str = "logstash.k8s.elastic.co/config-checksum";

/// Run one pass of every controller, in dependency order.
async fn converge(stack: &Stack) {
    let es = stack.elasticsearch("default", "es1").await;
    reconcile_elasticsearch(&stack.ctx, es).await.unwrap();
    let ls = stack.logstash("default", "ls1").await;
    reconcile_association(&stack.ctx, ls).await.unwrap();
    let es = stack.elasticsearch("default", "es1").await;
    reconcile_elasticsearch(&stack.ctx, es).await.unwrap();
    let ls = stack.logstash("default", "ls1").await;
    reconcile_logstash(&stack.ctx, ls).await.unwrap();
}

/// Run the association and Logstash passes of one Logstash.
async fn associate(stack: &Stack, namespace: &str, name: &str) {
    let ls = stack.logstash(namespace, name).await;
    reconcile_association(&stack.ctx, ls).await.unwrap();
    let es = stack.elasticsearch("default", "es1").await;
    reconcile_elasticsearch(&stack.ctx, es).await.unwrap();
    let ls = stack.logstash(namespace, name).await;
    reconcile_logstash(&stack.ctx, ls).await.unwrap();
}

/// Clear the Elasticsearch reference of a Logstash.
async fn drop_reference(stack: &Stack, namespace: &str, name: &str) -> Logstash {
    let mut ls = stack.logstash(namespace, name).await;
    ls.spec.elasticsearch_ref = ObjectSelector::default();
    stack.store.update(&ls).await.unwrap()
}

fn without_checksum(mut template: PodTemplateSpec) -> PodTemplateSpec {
    if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
        labels.remove(CHECKSUM_LABEL);
    }
    template
}

async fn stack_with_logstash() -> Stack {
    let stack = Stack::new();
    stack.store.insert(elasticsearch("default", "es1")).unwrap();
    stack
        .store
        .insert(logstash("default", "ls1", "es1", None))
        .unwrap();
    converge(&stack).await;
    stack
}

#[tokio::test]
async fn test_logstash_connects_to_elasticsearch() {
    let stack = stack_with_logstash().await;

    let ls = stack.logstash("default", "ls1").await;
    assert_eq!(ls.association_status(), AssociationStatus::Established);
    let conf = conf_from_annotation(&ls).unwrap().unwrap();
    assert_eq!(conf.url, "https://es1-es-http.default.svc:9200");
    assert_eq!(conf.auth_secret_name, "ls1-ls-es-auth");
    assert_eq!(conf.ca_secret_name, "ls1-ls-es-ca");
    assert!(conf.ca_cert_provided);

    // The association user lands in the cluster's file realm.
    let realm = stack.secret("default", "es1-es-xpack-file-realm").await;
    let users = String::from_utf8(realm.data.unwrap()[USERS_FILE].0.clone()).unwrap();
    assert!(users.contains("default-ls1-logstash-user:"));

    // The CA copy matches the cluster's public CA.
    let public = stack.secret("default", "es1-es-http-certs-public").await;
    let ca_copy = stack.secret("default", "ls1-ls-es-ca").await;
    assert_eq!(
        public.data.unwrap()["ca.crt"],
        ca_copy.data.unwrap()["ca.crt"]
    );

    assert!(!stack.checksum("default", "ls1-ls", CHECKSUM_LABEL).await.is_empty());
}

#[tokio::test]
async fn test_converged_stack_is_stable() {
    let stack = stack_with_logstash().await;

    stack.store.reset_writes();
    stack.events.clear();
    converge(&stack).await;

    assert_eq!(stack.store.writes().total(), 0);
    assert!(stack.events.events().is_empty());
}

#[tokio::test]
async fn test_ca_rotation_restarts_logstash() {
    let stack = stack_with_logstash().await;
    let before = stack.checksum("default", "ls1-ls", CHECKSUM_LABEL).await;
    let template_before = stack.pod_template("default", "ls1-ls").await;

    stack
        .store
        .delete::<Secret>("default", "es1-es-http-ca-internal")
        .await
        .unwrap();
    converge(&stack).await;

    let after = stack.checksum("default", "ls1-ls", CHECKSUM_LABEL).await;
    assert_ne!(before, after);
    // Only the checksum label differs in the pod template.
    assert_eq!(
        without_checksum(stack.pod_template("default", "ls1-ls").await),
        without_checksum(template_before)
    );
    let public = stack.secret("default", "es1-es-http-certs-public").await;
    let ca_copy = stack.secret("default", "ls1-ls-es-ca").await;
    assert_eq!(
        public.data.unwrap()["ca.crt"],
        ca_copy.data.unwrap()["ca.crt"]
    );
}

#[tokio::test]
async fn test_cross_namespace_association() {
    let stack = Stack::new();
    stack.store.insert(elasticsearch("elastic", "es1")).unwrap();
    stack
        .store
        .insert(logstash("default", "ls1", "es1", Some("elastic")))
        .unwrap();

    let es = stack.elasticsearch("elastic", "es1").await;
    reconcile_elasticsearch(&stack.ctx, es).await.unwrap();
    let ls = stack.logstash("default", "ls1").await;
    reconcile_association(&stack.ctx, ls).await.unwrap();

    // User secret in the cluster namespace, credentials next to Logstash.
    assert!(stack
        .store
        .contains::<Secret>("elastic", "default-ls1-logstash-user"));
    assert!(stack.store.contains::<Secret>("default", "ls1-ls-es-auth"));
    let conf = conf_from_annotation(&stack.logstash("default", "ls1").await)
        .unwrap()
        .unwrap();
    assert_eq!(conf.url, "https://es1-es-http.elastic.svc:9200");
}

#[tokio::test]
async fn test_deleting_logstash_removes_its_user() {
    let stack = stack_with_logstash().await;

    stack
        .store
        .delete::<elastic_operator::crd::Logstash>("default", "ls1")
        .await
        .unwrap();
    let ls = stack.logstash("default", "ls1").await;
    reconcile_association(&stack.ctx, ls).await.unwrap();
    let es = stack.elasticsearch("default", "es1").await;
    reconcile_elasticsearch(&stack.ctx, es).await.unwrap();

    assert!(!stack
        .store
        .contains::<Secret>("default", "default-ls1-logstash-user"));
    let realm = stack.secret("default", "es1-es-xpack-file-realm").await;
    let users = String::from_utf8(realm.data.unwrap()[USERS_FILE].0.clone()).unwrap();
    assert!(!users.contains("default-ls1-logstash-user"));
}

#[tokio::test]
async fn test_cluster_status_follows_health() {
    let stack = stack_with_logstash().await;
    let status = stack.elasticsearch("default", "es1").await.status.unwrap();
    assert_eq!(status.phase, Some(ElasticsearchPhase::ApplyingChanges));

    stack
        .observer
        .set(ObjectKey::new("default", "es1"), ElasticsearchHealth::Green);
    // Without ready pods the observer is not consulted.
    converge(&stack).await;
    let status = stack.elasticsearch("default", "es1").await.status.unwrap();
    assert_eq!(status.health, Some(ElasticsearchHealth::Red));
}

#[tokio::test]
async fn test_logstash_waits_for_elasticsearch() {
    let stack = Stack::new();
    stack
        .store
        .insert(logstash("default", "ls1", "es1", None))
        .unwrap();

    let ls = stack.logstash("default", "ls1").await;
    let outcome = reconcile_association(&stack.ctx, ls).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::requeue(Duration::from_secs(10)));
    let ls = stack.logstash("default", "ls1").await;
    assert_eq!(ls.association_status(), AssociationStatus::Pending);
    reconcile_logstash(&stack.ctx, ls).await.unwrap();
    assert!(!stack.store.contains::<Deployment>("default", "ls1-ls"));
    assert!(stack.events.reasons().contains(&"AssociationError".to_string()));

    stack.store.insert(elasticsearch("default", "es1")).unwrap();
    converge(&stack).await;

    let ls = stack.logstash("default", "ls1").await;
    assert_eq!(ls.association_status(), AssociationStatus::Established);
    assert!(stack.store.contains::<Secret>("default", "ls1-ls-es-auth"));
    let deployment: Deployment = stack.store.get("default", "ls1-ls").await.unwrap();
    assert_eq!(deployment.spec.unwrap().replicas, Some(ls.spec.count));
}

#[tokio::test]
async fn test_dropped_reference_leaves_no_watches() {
    let stack = stack_with_logstash().await;
    let key = ObjectKey::new("default", "ls1");
    assert!(!stack.ctx.watches.secrets.registrations_for_watcher(&key).is_empty());

    drop_reference(&stack, "default", "ls1").await;
    associate(&stack, "default", "ls1").await;

    assert!(stack
        .ctx
        .watches
        .secrets
        .registrations_for_watcher(&key)
        .is_empty());
    assert!(stack
        .ctx
        .watches
        .elasticsearch_clusters
        .registrations_for_watcher(&key)
        .is_empty());
    assert!(stack
        .ctx
        .watches
        .secrets
        .watchers_for(&ObjectKey::new("default", "ls1-ls-es-auth"))
        .is_empty());
}

#[tokio::test]
async fn test_dropped_reference_keeps_other_dependents_secrets() {
    let stack = Stack::new();
    stack.store.insert(elasticsearch("default", "es1")).unwrap();
    stack
        .store
        .insert(logstash("default", "ls1", "es1", None))
        .unwrap();
    stack
        .store
        .insert(logstash("default", "ls2", "es1", None))
        .unwrap();
    // Same name as ls1 in another namespace: shares the name label.
    stack
        .store
        .insert(logstash("other", "ls1", "es1", Some("default")))
        .unwrap();
    let es = stack.elasticsearch("default", "es1").await;
    reconcile_elasticsearch(&stack.ctx, es).await.unwrap();
    for (namespace, name) in [("default", "ls1"), ("default", "ls2"), ("other", "ls1")] {
        associate(&stack, namespace, name).await;
    }

    drop_reference(&stack, "default", "ls1").await;
    let ls = stack.logstash("default", "ls1").await;
    reconcile_association(&stack.ctx, ls).await.unwrap();

    for (namespace, name) in [
        ("default", "ls1-ls-es-auth"),
        ("default", "ls1-ls-es-ca"),
        ("default", "default-ls1-logstash-user"),
    ] {
        assert!(!stack.store.contains::<Secret>(namespace, name), "{namespace}/{name} left");
    }
    for (namespace, name) in [
        ("default", "ls2-ls-es-auth"),
        ("default", "ls2-ls-es-ca"),
        ("default", "default-ls2-logstash-user"),
        ("other", "ls1-ls-es-auth"),
        ("other", "ls1-ls-es-ca"),
        ("default", "other-ls1-logstash-user"),
    ] {
        assert!(stack.store.contains::<Secret>(namespace, name), "{namespace}/{name} removed");
    }
}

#[tokio::test]
async fn test_deleted_auth_secret_is_recreated() {
    let stack = stack_with_logstash().await;
    let ls = stack.logstash("default", "ls1").await;
    let uid = ls.uid().unwrap();
    // Owned by Logstash, so the association controller sees its changes.
    for name in ["ls1-ls-es-auth", "ls1-ls-es-ca"] {
        assert!(is_controlled_by(&stack.secret("default", name).await, &uid));
    }

    stack
        .store
        .delete::<Secret>("default", "ls1-ls-es-auth")
        .await
        .unwrap();
    associate(&stack, "default", "ls1").await;

    assert!(stack.store.contains::<Secret>("default", "ls1-ls-es-auth"));
    let ls = stack.logstash("default", "ls1").await;
    assert_eq!(ls.association_status(), AssociationStatus::Established);
}
