// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `kibana.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::constants::ASSOCIATION_CONF_ANNOTATION;
    use crate::crd::{AssociationConf, KibanaSpec, SelfSignedCertificate, TlsOptions};
    use crate::observer::BasicAuth;
    use crate::reconcilers::driver::Version;
    use crate::store::MemoryStore;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{Secret, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use kube::ResourceExt;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const URL: &str = "https://es1-es-http.default.svc:9200";
    const USER: &str = "default-kb1-kibana-user";

    fn association() -> AssociationConf {
        AssociationConf {
            auth_secret_name: "kb1-kb-es-auth".to_string(),
            auth_secret_key: USER.to_string(),
            ca_cert_provided: true,
            ca_secret_name: "kb1-kb-es-ca".to_string(),
            url: URL.to_string(),
        }
    }

    fn kibana(version: &str) -> Kibana {
        let mut kb = Kibana::new(
            "kb1",
            KibanaSpec {
                version: version.to_string(),
                count: 1,
                elasticsearch_ref: ObjectSelector {
                    name: "es1".to_string(),
                    namespace: None,
                },
                ..Default::default()
            },
        );
        kb.metadata.namespace = Some("default".to_string());
        kb
    }

    fn build_config(kb: &Kibana, version: &str, tls_enabled: bool) -> CanonicalConfig {
        let version = Version::parse(version).unwrap();
        let labels = BTreeMap::new();
        let association = association();
        let credentials = BasicAuth {
            username: USER.to_string(),
            password: "s3cr3t".to_string(),
        };
        kb.build_config(&DriverInputs {
            name: "kb1",
            namespace: "default",
            version: &version,
            association: Some(&association),
            credentials: Some(&credentials),
            tls_enabled,
            labels: &labels,
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = build_config(&kibana("7.4.0"), "7.4.0", true);

        assert_eq!(config.get("server.name"), Some(&json!("kb1")));
        assert_eq!(config.get("server.host"), Some(&json!("0")));
        assert_eq!(config.get("elasticsearch.hosts"), Some(&json!([URL])));
        assert_eq!(config.get("elasticsearch.username"), Some(&json!(USER)));
        assert_eq!(config.get("elasticsearch.password"), Some(&json!("s3cr3t")));
        assert_eq!(config.get("elasticsearch.ssl.verificationMode"), Some(&json!("certificate")));
        assert_eq!(
            config.get("elasticsearch.ssl.certificateAuthorities"),
            Some(&json!("/usr/share/elastic-internal/elasticsearch-certs/ca.crt"))
        );
        assert_eq!(config.get("server.ssl.enabled"), Some(&json!(true)));
        assert_eq!(config.get("elasticsearch.url"), None);
    }

    #[test]
    fn test_config_without_tls() {
        let config = build_config(&kibana("7.4.0"), "7.4.0", false);
        assert_eq!(config.get("server.ssl"), None);
    }

    #[test]
    fn test_legacy_url_setting() {
        let config = build_config(&kibana("6.8.0"), "6.8.0", true);
        assert_eq!(config.get("elasticsearch.url"), Some(&json!(URL)));
    }

    #[test]
    fn test_user_config_wins() {
        let mut kb = kibana("7.4.0");
        kb.spec.config = Some(json!({"server": {"name": "custom"}, "logging.verbose": true}));

        let config = build_config(&kb, "7.4.0", true);

        assert_eq!(config.get("server.name"), Some(&json!("custom")));
        assert_eq!(config.get("server.host"), Some(&json!("0")));
        assert_eq!(config.get("logging.verbose"), Some(&json!(true)));
    }

    #[test]
    fn test_workload_defaults() {
        let version = Version::parse("7.4.0").unwrap();
        let labels = BTreeMap::from([("a".to_string(), "b".to_string())]);
        let kb = kibana("7.4.0");
        let defaults = kb.build_workload(&DriverInputs {
            name: "kb1",
            namespace: "default",
            version: &version,
            association: None,
            credentials: None,
            tls_enabled: true,
            labels: &labels,
        });

        assert_eq!(defaults.image, "docker.elastic.co/kibana/kibana:7.4.0");
        assert_eq!(defaults.memory, "1Gi");
        assert_eq!(defaults.ports[0].container_port, 5601);
        assert_eq!(defaults.labels, labels);
    }

    #[tokio::test]
    async fn test_reconciles_kibana_without_tls() {
        let store = Arc::new(MemoryStore::new());
        let mut kb = kibana("7.4.0");
        kb.spec.http.tls = TlsOptions {
            self_signed_certificate: Some(SelfSignedCertificate {
                disabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        kb.annotations_mut().insert(
            ASSOCIATION_CONF_ANNOTATION.to_string(),
            serde_json::to_string(&AssociationConf {
                ca_secret_name: String::new(),
                ca_cert_provided: false,
                ..association()
            })
            .unwrap(),
        );
        let kb = store.insert(kb).unwrap();
        store
            .insert(Secret {
                metadata: ObjectMeta {
                    name: Some("kb1-kb-es-auth".to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(USER.to_string(), ByteString(b"s3cr3t".to_vec()))])),
                ..Default::default()
            })
            .unwrap();
        let ctx = Context::for_store(store.clone());

        let outcome = reconcile_kibana(&ctx, kb).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::done());
        let service: Service = store.get("default", "kb1-kb-http").await.unwrap();
        assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 5601);
        assert!(!store.contains::<Secret>("default", "kb1-kb-http-certs-internal"));

        let deployment: Deployment = store.get("default", "kb1-kb").await.unwrap();
        let pod = deployment.spec.unwrap().template;
        let labels = pod.metadata.unwrap().labels.unwrap();
        assert!(labels.contains_key("kibana.k8s.elastic.co/config-checksum"));
        let volumes: Vec<String> = pod
            .spec
            .unwrap()
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert!(volumes.contains(&"config".to_string()));
        assert!(!volumes.contains(&"elasticsearch-certs".to_string()));
        assert!(!volumes.contains(&"elastic-internal-http-certificates".to_string()));

        let config: Secret = store.get("default", "kb1-kb-config").await.unwrap();
        let rendered = String::from_utf8(config.data.unwrap()["kibana.yml"].0.clone()).unwrap();
        assert!(!rendered.contains("certificateAuthorities"));
    }
}
