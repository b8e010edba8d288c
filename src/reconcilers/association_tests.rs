// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `association.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::OperatorParams;
    use crate::crd::{ElasticsearchSpec, Logstash, LogstashSpec};
    use crate::events::MemoryEventPublisher;
    use crate::observer::StaticHealthObserver;
    use crate::reconcilers::association::conf::conf_from_annotation;
    use crate::store::MemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn test_context(store: Arc<MemoryStore>) -> (Context<MemoryStore>, Arc<MemoryEventPublisher>) {
        let events = Arc::new(MemoryEventPublisher::new());
        let ctx = Context::new(
            store,
            events.clone(),
            Arc::new(StaticHealthObserver::new()),
            OperatorParams::default(),
        );
        (ctx, events)
    }

    fn logstash(es_name: &str, es_namespace: Option<&str>) -> Logstash {
        let mut ls = Logstash::new(
            "ls1",
            LogstashSpec {
                version: "7.4.0".to_string(),
                count: 1,
                elasticsearch_ref: ObjectSelector {
                    name: es_name.to_string(),
                    namespace: es_namespace.map(str::to_string),
                },
                ..Default::default()
            },
        );
        ls.metadata.namespace = Some("default".to_string());
        ls
    }

    fn elasticsearch(namespace: &str) -> Elasticsearch {
        let mut es = Elasticsearch::new(
            "es1",
            ElasticsearchSpec {
                version: "7.4.0".to_string(),
                ..Default::default()
            },
        );
        es.metadata.namespace = Some(namespace.to_string());
        es
    }

    fn public_certs(namespace: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("es1-es-http-certs-public".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("tls.crt".to_string(), ByteString(b"leaf".to_vec())),
                ("ca.crt".to_string(), ByteString(b"ca-pem".to_vec())),
            ])),
            ..Default::default()
        }
    }

    async fn stored(store: &MemoryStore) -> Logstash {
        store.get("default", "ls1").await.unwrap()
    }

    #[test]
    fn test_watch_names() {
        let key = ObjectKey::new("default", "ls1");
        assert_eq!(es_watch_name(&key), "default-ls1-es-watch");
        assert_eq!(ca_watch_name(&key), "default-ls1-ca-watch");
    }

    #[test]
    fn test_referenced_cluster_defaults_to_own_namespace() {
        assert_eq!(
            referenced_cluster(&logstash("es1", None)),
            ObjectKey::new("default", "es1")
        );
        assert_eq!(
            referenced_cluster(&logstash("es1", Some("elastic"))),
            ObjectKey::new("elastic", "es1")
        );
    }

    #[test]
    fn test_elasticsearch_url_follows_tls() {
        let mut es = elasticsearch("default");
        assert_eq!(elasticsearch_url(&es), "https://es1-es-http.default.svc:9200");

        es.spec.http.tls.self_signed_certificate = Some(crate::crd::SelfSignedCertificate {
            disabled: true,
            ..Default::default()
        });
        assert_eq!(elasticsearch_url(&es), "http://es1-es-http.default.svc:9200");
    }

    #[tokio::test]
    async fn test_no_reference_clears_association() {
        let store = Arc::new(MemoryStore::new());
        let ls = store.insert(logstash("", None)).unwrap();
        let (ctx, events) = test_context(store.clone());

        let outcome = reconcile_association(&ctx, ls).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::done());
        let ls = stored(&store).await;
        assert_eq!(ls.association_status(), AssociationStatus::Unknown);
        assert_eq!(conf_from_annotation(&ls).unwrap(), None);
        assert_eq!(ls.finalizers().len(), 2);
        assert!(events.events().is_empty());
        assert!(ctx.watches.elasticsearch_clusters.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_is_pending() {
        let store = Arc::new(MemoryStore::new());
        let ls = store.insert(logstash("es1", None)).unwrap();
        let (ctx, events) = test_context(store.clone());

        let outcome = reconcile_association(&ctx, ls).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::requeue(Duration::from_secs(PENDING_REQUEUE_SECS))
        );
        assert_eq!(
            stored(&store).await.association_status(),
            AssociationStatus::Pending
        );
        assert_eq!(
            events.reasons(),
            vec![
                EVENT_ASSOCIATION_ERROR.to_string(),
                EVENT_ASSOCIATION_STATUS_CHANGE.to_string()
            ]
        );
        assert_eq!(
            events.events()[1].event.message,
            "Association status changed from [] to [Pending]"
        );
        assert_eq!(
            ctx.watches
                .elasticsearch_clusters
                .watchers_for(&ObjectKey::new("default", "es1")),
            vec![ObjectKey::new("default", "ls1")]
        );
    }

    #[tokio::test]
    async fn test_established_association() {
        let store = Arc::new(MemoryStore::new());
        store.insert(elasticsearch("default")).unwrap();
        store.insert(public_certs("default")).unwrap();
        let ls = store.insert(logstash("es1", None)).unwrap();
        let (ctx, events) = test_context(store.clone());

        let outcome = reconcile_association(&ctx, ls).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::done());
        let ls = stored(&store).await;
        assert_eq!(ls.association_status(), AssociationStatus::Established);
        let expected = AssociationConf {
            auth_secret_name: "ls1-ls-es-auth".to_string(),
            auth_secret_key: "default-ls1-logstash-user".to_string(),
            ca_cert_provided: true,
            ca_secret_name: "ls1-ls-es-ca".to_string(),
            url: "https://es1-es-http.default.svc:9200".to_string(),
        };
        assert_eq!(conf_from_annotation(&ls).unwrap(), Some(expected.clone()));
        assert_eq!(ctx.associations.get(&ls), Some(expected));
        assert!(store.contains::<Secret>("default", "default-ls1-logstash-user"));
        assert!(store.contains::<Secret>("default", "ls1-ls-es-ca"));
        assert_eq!(
            events.reasons(),
            vec![EVENT_ASSOCIATION_STATUS_CHANGE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_established_association_is_stable() {
        let store = Arc::new(MemoryStore::new());
        store.insert(elasticsearch("default")).unwrap();
        store.insert(public_certs("default")).unwrap();
        let ls = store.insert(logstash("es1", None)).unwrap();
        let (ctx, events) = test_context(store.clone());
        reconcile_association(&ctx, ls).await.unwrap();

        store.reset_writes();
        events.clear();
        reconcile_association(&ctx, stored(&store).await).await.unwrap();

        assert_eq!(store.writes().total(), 0);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_ca_is_not_provided() {
        let store = Arc::new(MemoryStore::new());
        store.insert(elasticsearch("default")).unwrap();
        let ls = store.insert(logstash("es1", None)).unwrap();
        let (ctx, _) = test_context(store.clone());

        reconcile_association(&ctx, ls).await.unwrap();

        let conf = conf_from_annotation(&stored(&store).await).unwrap().unwrap();
        assert_eq!(conf.ca_secret_name, "");
        assert!(!conf.ca_cert_provided);
        assert!(conf.is_configured());
        assert!(ctx.watches.secrets.is_registered("default-ls1-ca-watch"));
    }

    #[tokio::test]
    async fn test_moving_cluster_deletes_old_user() {
        let store = Arc::new(MemoryStore::new());
        store.insert(elasticsearch("elastic")).unwrap();
        store.insert(elasticsearch("other")).unwrap();
        let ls = store.insert(logstash("es1", Some("elastic"))).unwrap();
        let (ctx, _) = test_context(store.clone());
        reconcile_association(&ctx, ls).await.unwrap();
        assert!(store.contains::<Secret>("elastic", "default-ls1-logstash-user"));

        let mut ls = stored(&store).await;
        ls.spec.elasticsearch_ref.namespace = Some("other".to_string());
        let ls = store.update(&ls).await.unwrap();
        reconcile_association(&ctx, ls).await.unwrap();

        assert!(!store.contains::<Secret>("elastic", "default-ls1-logstash-user"));
        assert!(store.contains::<Secret>("other", "default-ls1-logstash-user"));
        assert!(store.contains::<Secret>("default", "ls1-ls-es-auth"));
        let conf = conf_from_annotation(&stored(&store).await).unwrap().unwrap();
        assert_eq!(conf.url, "https://es1-es-http.other.svc:9200");
    }

    #[tokio::test]
    async fn test_removing_reference_cleans_up() {
        let store = Arc::new(MemoryStore::new());
        store.insert(elasticsearch("default")).unwrap();
        store.insert(public_certs("default")).unwrap();
        let ls = store.insert(logstash("es1", None)).unwrap();
        let (ctx, _) = test_context(store.clone());
        reconcile_association(&ctx, ls).await.unwrap();

        let mut ls = stored(&store).await;
        ls.spec.elasticsearch_ref = ObjectSelector::default();
        let ls = store.update(&ls).await.unwrap();
        reconcile_association(&ctx, ls).await.unwrap();

        let ls = stored(&store).await;
        assert_eq!(ls.association_status(), AssociationStatus::Unknown);
        assert_eq!(conf_from_annotation(&ls).unwrap(), None);
        assert_eq!(ctx.associations.get(&ls), None);
        assert!(!store.contains::<Secret>("default", "default-ls1-logstash-user"));
        assert!(!store.contains::<Secret>("default", "ls1-ls-es-auth"));
        assert!(!store.contains::<Secret>("default", "ls1-ls-es-ca"));
        assert!(ctx.watches.secrets.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_releases_user_and_watches() {
        let store = Arc::new(MemoryStore::new());
        store.insert(elasticsearch("default")).unwrap();
        let ls = store.insert(logstash("es1", None)).unwrap();
        let (ctx, _) = test_context(store.clone());
        reconcile_association(&ctx, ls).await.unwrap();

        store.delete::<Logstash>("default", "ls1").await.unwrap();
        let outcome = reconcile_association(&ctx, stored(&store).await)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::done());
        assert!(!store.contains::<Logstash>("default", "ls1"));
        assert!(!store.contains::<Secret>("default", "default-ls1-logstash-user"));
        assert!(ctx.watches.elasticsearch_clusters.registrations().is_empty());
        assert!(ctx.watches.secrets.registrations().is_empty());
        assert!(ctx.associations.is_empty());
    }

    #[tokio::test]
    async fn test_conflict_requeues() {
        let store = Arc::new(MemoryStore::new());
        let stale = store.insert(logstash("es1", None)).unwrap();
        store.touch::<Logstash>("default", "ls1");
        let (ctx, _) = test_context(store.clone());

        let outcome = reconcile_association(&ctx, stale).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::requeue(Duration::from_secs(CONFLICT_REQUEUE_SECS))
        );
        assert_eq!(store.writes().total(), 0);
    }
}
