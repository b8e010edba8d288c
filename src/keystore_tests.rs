// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `keystore.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{KeyToPath, Kibana, KibanaSpec};
    use crate::events::MemoryEventPublisher;
    use crate::name::KB_NAMER;
    use crate::store::{is_controlled_by, MemoryStore};

    const INIT: KeystoreInit = KeystoreInit {
        create_command: "/usr/share/kibana/bin/kibana-keystore create",
        add_command: r#"/usr/share/kibana/bin/kibana-keystore add "$key" --stdin < "$filename""#,
        data_volume: "kibana-data",
        data_path: "/usr/share/kibana/data",
    };

    fn kibana(store: &MemoryStore) -> Kibana {
        let mut kb = Kibana::new("kb1", KibanaSpec::default());
        kb.metadata.namespace = Some("default".to_string());
        store.insert(kb).unwrap()
    }

    fn source_secret(store: &MemoryStore, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };
        store.insert(secret).unwrap();
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("kibana.k8s.elastic.co/name".to_string(), "kb1".to_string())])
    }

    #[tokio::test]
    async fn test_no_secure_settings_removes_watch() {
        let store = MemoryStore::new();
        let events = MemoryEventPublisher::new();
        let watches = WatchRegistry::new();
        let kb = kibana(&store);
        watches.add_handler(NamedWatch {
            name: "default-kb1-secure-settings".to_string(),
            watched: vec![ObjectKey::new("default", "old")],
            watcher: ObjectKey::new("default", "kb1"),
        });
        let labels = labels();
        let params = KeystoreParams {
            namer: KB_NAMER,
            labels: &labels,
            sources: &[],
            init: INIT,
        };

        let resources = reconcile_keystore_resources(&store, &events, &watches, &kb, &params)
            .await
            .unwrap();

        assert!(resources.is_none());
        assert!(!watches.is_registered("default-kb1-secure-settings"));
        assert_eq!(store.writes().total(), 0);
    }

    #[tokio::test]
    async fn test_aggregates_sources() {
        let store = MemoryStore::new();
        let events = MemoryEventPublisher::new();
        let watches = WatchRegistry::new();
        let kb = kibana(&store);
        source_secret(&store, "all-keys", &[("a", "1"), ("b", "2")]);
        source_secret(&store, "some-keys", &[("c", "3"), ("d", "4")]);
        let labels = labels();
        let sources = vec![
            SecretSource {
                secret_name: "all-keys".to_string(),
                entries: None,
            },
            SecretSource {
                secret_name: "some-keys".to_string(),
                entries: Some(vec![KeyToPath {
                    key: "c".to_string(),
                    path: Some("renamed".to_string()),
                }]),
            },
        ];
        let params = KeystoreParams {
            namer: KB_NAMER,
            labels: &labels,
            sources: &sources,
            init: INIT,
        };

        let resources = reconcile_keystore_resources(&store, &events, &watches, &kb, &params)
            .await
            .unwrap()
            .unwrap();

        let secret: Secret = store.get("default", "kb1-kb-secure-settings").await.unwrap();
        let keys: Vec<&String> = secret.data.as_ref().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "renamed"]);
        assert!(is_controlled_by(&secret, kb.metadata.uid.as_deref().unwrap()));
        assert_eq!(resources.version, secret.resource_version().unwrap());
        assert_eq!(resources.init_container.name, KEYSTORE_INIT_CONTAINER_NAME);
        assert_eq!(resources.volume.mount.mount_path, SECURE_SETTINGS_MOUNT_PATH);
        assert_eq!(
            watches.watchers_for(&ObjectKey::new("default", "some-keys")),
            vec![ObjectKey::new("default", "kb1")]
        );
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_reported_and_skipped() {
        let store = MemoryStore::new();
        let events = MemoryEventPublisher::new();
        let watches = WatchRegistry::new();
        let kb = kibana(&store);
        source_secret(&store, "present", &[("a", "1")]);
        let labels = labels();
        let sources = vec![
            SecretSource {
                secret_name: "missing".to_string(),
                entries: None,
            },
            SecretSource {
                secret_name: "present".to_string(),
                entries: None,
            },
        ];
        let params = KeystoreParams {
            namer: KB_NAMER,
            labels: &labels,
            sources: &sources,
            init: INIT,
        };

        reconcile_keystore_resources(&store, &events, &watches, &kb, &params)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(events.reasons(), vec![EVENT_SECURE_SETTINGS_ERROR.to_string()]);
        let secret: Secret = store.get("default", "kb1-kb-secure-settings").await.unwrap();
        assert_eq!(secret.data.unwrap().len(), 1);
        assert_eq!(
            watches.watchers_for(&ObjectKey::new("default", "missing")),
            vec![ObjectKey::new("default", "kb1")]
        );
    }

    #[tokio::test]
    async fn test_version_is_stable_without_changes() {
        let store = MemoryStore::new();
        let events = MemoryEventPublisher::new();
        let watches = WatchRegistry::new();
        let kb = kibana(&store);
        source_secret(&store, "settings", &[("a", "1")]);
        let labels = labels();
        let sources = vec![SecretSource {
            secret_name: "settings".to_string(),
            entries: None,
        }];
        let params = KeystoreParams {
            namer: KB_NAMER,
            labels: &labels,
            sources: &sources,
            init: INIT,
        };

        let first = reconcile_keystore_resources(&store, &events, &watches, &kb, &params)
            .await
            .unwrap()
            .unwrap();
        store.reset_writes();
        let second = reconcile_keystore_resources(&store, &events, &watches, &kb, &params)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.version, second.version);
        assert_eq!(store.writes().total(), 0);
    }

    #[test]
    fn test_init_script() {
        let script = init_script(&INIT);
        assert!(script.contains("set -eux"));
        assert!(script.contains("kibana-keystore create"));
        assert!(script.contains("for filename in /mnt/elastic-internal/secure-settings/*"));
        assert!(script.contains(r#"add "$key" --stdin < "$filename""#));
    }
}
