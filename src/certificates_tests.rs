// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `certificates.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{
        Kibana, KibanaSpec, SecretRef, SelfSignedCertificate, SubjectAlternativeName,
    };
    use crate::name::KB_NAMER;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use kube::ResourceExt;

    fn kibana(store: &MemoryStore) -> Kibana {
        let mut kb = Kibana::new(
            "kb1",
            KibanaSpec {
                version: "7.4.0".to_string(),
                count: 1,
                ..Default::default()
            },
        );
        kb.metadata.namespace = Some("default".to_string());
        store.insert(kb).unwrap()
    }

    fn http_service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("kb1-kb-http".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn params<'a>(
        labels: &'a BTreeMap<String, String>,
        tls: &'a TlsOptions,
        services: &'a [Service],
    ) -> CertificateParams<'a> {
        CertificateParams {
            namer: KB_NAMER,
            labels,
            tls,
            services,
            ca_rotation: RotationParams::from_hours(72, 24),
            cert_rotation: RotationParams::from_hours(48, 12),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn data(secret: &Secret, key: &str) -> Vec<u8> {
        secret_value(secret, key).unwrap_or_default().to_vec()
    }

    #[test]
    fn test_should_rotate_in_clamps_to_zero() {
        let now = now();
        let wait = should_rotate_in(now, now + Duration::hours(10), Duration::hours(4));
        assert_eq!(wait, std::time::Duration::from_secs(6 * 3600));

        let late = should_rotate_in(now, now + Duration::hours(1), Duration::hours(4));
        assert_eq!(late, std::time::Duration::ZERO);
    }

    #[test]
    fn test_self_signed_ca_info() {
        let now = now();
        let ca = Ca::new_self_signed("kb1-http", "kb1", now, Duration::hours(72)).unwrap();

        assert_eq!(ca.info.common_name, "kb1-http");
        assert_eq!(ca.info.not_before, now);
        assert_eq!(ca.info.not_after, now + Duration::hours(72));
        assert!(ca.info.is_usable_at(now, Duration::hours(24)));
        assert!(!ca.info.is_usable_at(now + Duration::hours(48), Duration::hours(24)));
        assert!(!ca.info.is_usable_at(now - Duration::hours(1), Duration::hours(24)));

        let reloaded = Ca::from_pem(ca.cert_pem.as_bytes(), ca.key_pem.as_bytes()).unwrap();
        assert_eq!(reloaded.info, ca.info);
    }

    #[test]
    fn test_issued_certificate_carries_dns_and_ip_sans() {
        let now = now();
        let ca = Ca::new_self_signed("kb1-http", "kb1", now, Duration::hours(72)).unwrap();
        let sans = vec!["10.0.0.1".to_string(), "kb1-kb-http".to_string()];
        let (cert, _key) = ca.issue("kb1-kb-http", &sans, now, Duration::hours(48)).unwrap();

        let info = CertificateInfo::from_pem(cert.as_bytes()).unwrap();
        assert_eq!(info.common_name, "kb1-kb-http");
        assert_eq!(info.subject_alt_names, sans);
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let err = CertificateInfo::from_pem(b"not a certificate").unwrap_err();
        assert!(matches!(err, OperatorError::Certificate(_)));
    }

    #[test]
    fn test_certificate_sans_for_services_and_user_names() {
        let tls = TlsOptions {
            self_signed_certificate: Some(SelfSignedCertificate {
                subject_alt_names: vec![
                    SubjectAlternativeName {
                        dns: Some("kibana.example.com".to_string()),
                        ip: None,
                    },
                    SubjectAlternativeName {
                        dns: None,
                        ip: Some("192.168.1.10".to_string()),
                    },
                ],
                disabled: false,
            }),
            certificate: None,
        };

        let sans = certificate_sans(&[http_service()], &tls);
        assert_eq!(
            sans,
            vec![
                "192.168.1.10",
                "kb1-kb-http",
                "kb1-kb-http.default",
                "kb1-kb-http.default.svc",
                "kb1-kb-http.default.svc.cluster.local",
                "kibana.example.com",
            ]
        );
    }

    #[tokio::test]
    async fn test_disabled_tls_is_a_noop() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        let labels = BTreeMap::new();
        let tls = TlsOptions {
            self_signed_certificate: Some(SelfSignedCertificate {
                disabled: true,
                ..Default::default()
            }),
            certificate: None,
        };
        let services = [http_service()];

        let result = reconcile_certificates(&store, &kb, &params(&labels, &tls, &services), now())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.writes().total(), 0);
    }

    #[tokio::test]
    async fn test_certificates_created_then_reused() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        let labels = BTreeMap::from([("kibana.k8s.elastic.co/name".to_string(), "kb1".to_string())]);
        let tls = TlsOptions::default();
        let services = [http_service()];
        let params = params(&labels, &tls, &services);

        let first = reconcile_certificates(&store, &kb, &params, now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.writes().creates, 3);

        let ca_secret: Secret = store.get("default", "kb1-kb-http-ca-internal").await.unwrap();
        assert_eq!(data(&ca_secret, CERT_FILE_NAME), first.ca.cert_pem.as_bytes());
        assert_eq!(ca_secret.owner_references()[0].name, "kb1");
        assert_eq!(ca_secret.labels(), &labels);

        let public: Secret = store.get("default", "kb1-kb-http-certs-public").await.unwrap();
        assert!(secret_value(&public, crate::constants::KEY_FILE_NAME).is_none());
        assert_eq!(data(&public, "ca.crt"), first.ca.cert_pem.as_bytes());
        assert_eq!(
            data(&public, CERT_FILE_NAME),
            data(&first.http_certificates, CERT_FILE_NAME)
        );

        store.reset_writes();
        let second = reconcile_certificates(&store, &kb, &params, now() + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.writes().total(), 0);
        assert_eq!(second.ca.cert_pem, first.ca.cert_pem);
        assert_eq!(
            data(&second.http_certificates, CERT_FILE_NAME),
            data(&first.http_certificates, CERT_FILE_NAME)
        );
    }

    #[tokio::test]
    async fn test_requeue_is_bounded_by_earliest_rotation() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        let labels = BTreeMap::new();
        let tls = TlsOptions::default();
        let services = [http_service()];

        let result = reconcile_certificates(&store, &kb, &params(&labels, &tls, &services), now())
            .await
            .unwrap()
            .unwrap();

        // leaf: 48h validity, rotated 12h before expiry
        assert_eq!(result.requeue_after, std::time::Duration::from_secs(36 * 3600));
    }

    #[tokio::test]
    async fn test_ca_rotated_before_expiry() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        let labels = BTreeMap::new();
        let tls = TlsOptions::default();
        let services = [http_service()];
        let params = params(&labels, &tls, &services);

        let first = reconcile_certificates(&store, &kb, &params, now())
            .await
            .unwrap()
            .unwrap();

        // 72h CA rotated 24h before expiry: due after 48h
        let later = now() + Duration::hours(48) + Duration::minutes(1);
        let second = reconcile_certificates(&store, &kb, &params, later)
            .await
            .unwrap()
            .unwrap();

        assert_ne!(second.ca.cert_pem, first.ca.cert_pem);
        assert_eq!(second.ca.info.not_before, later);
        assert_eq!(
            data(&second.http_certificates, "ca.crt"),
            second.ca.cert_pem.as_bytes()
        );

        let stored: Secret = store.get("default", "kb1-kb-http-ca-internal").await.unwrap();
        assert_eq!(stored.data.as_ref().map(BTreeMap::len), Some(2));
        assert_eq!(data(&stored, CERT_FILE_NAME), second.ca.cert_pem.as_bytes());
    }

    #[tokio::test]
    async fn test_leaf_reissued_when_sans_change() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        let labels = BTreeMap::new();
        let services = [http_service()];
        let tls = TlsOptions::default();

        let first = reconcile_certificates(&store, &kb, &params(&labels, &tls, &services), now())
            .await
            .unwrap()
            .unwrap();

        let with_san = TlsOptions {
            self_signed_certificate: Some(SelfSignedCertificate {
                subject_alt_names: vec![SubjectAlternativeName {
                    dns: Some("kibana.example.com".to_string()),
                    ip: None,
                }],
                disabled: false,
            }),
            certificate: None,
        };
        let second =
            reconcile_certificates(&store, &kb, &params(&labels, &with_san, &services), now())
                .await
                .unwrap()
                .unwrap();

        assert_eq!(second.ca.cert_pem, first.ca.cert_pem);
        let leaf = CertificateInfo::from_pem(&data(&second.http_certificates, CERT_FILE_NAME))
            .unwrap();
        assert!(leaf
            .subject_alt_names
            .contains(&"kibana.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_user_provided_certificate_is_copied() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        store
            .insert(Secret {
                metadata: ObjectMeta {
                    name: Some("my-cert".to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([
                    ("tls.crt".to_string(), ByteString(b"CERT".to_vec())),
                    ("tls.key".to_string(), ByteString(b"KEY".to_vec())),
                ])),
                ..Default::default()
            })
            .unwrap();
        let labels = BTreeMap::new();
        let services = [http_service()];
        let tls = TlsOptions {
            self_signed_certificate: None,
            certificate: Some(SecretRef {
                secret_name: "my-cert".to_string(),
            }),
        };

        let result = reconcile_http_certificates(
            &store,
            &kb,
            &Ca::new_self_signed("kb1-http", "kb1", now(), Duration::hours(72)).unwrap(),
            &params(&labels, &tls, &services),
            now(),
        )
        .await
        .unwrap();

        assert_eq!(data(&result, CERT_FILE_NAME), b"CERT");
        assert_eq!(data(&result, "tls.key"), b"KEY");
        assert!(secret_value(&result, "ca.crt").is_none());
    }

    #[tokio::test]
    async fn test_missing_user_certificate_is_a_validation_error() {
        let store = MemoryStore::new();
        let kb = kibana(&store);
        let labels = BTreeMap::new();
        let services = [http_service()];
        let tls = TlsOptions {
            self_signed_certificate: None,
            certificate: Some(SecretRef {
                secret_name: "absent".to_string(),
            }),
        };

        let err = reconcile_http_certificates(
            &store,
            &kb,
            &Ca::new_self_signed("kb1-http", "kb1", now(), Duration::hours(72)).unwrap(),
            &params(&labels, &tls, &services),
            now(),
        )
        .await
        .unwrap_err();
        assert!(err.is_validation());
    }
}
