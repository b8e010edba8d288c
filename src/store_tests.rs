// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `store.rs` and the in-memory store

#[cfg(test)]
mod tests {
    use super::super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    fn secret(ns: &str, name: &str, labels: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "k".to_string(),
                ByteString(b"v".to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get::<Secret>("default", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(get_if_exists::<Secret, _>(&store, "default", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_assigns_uid_and_version() {
        let store = MemoryStore::new();
        let created = store.create(&secret("default", "s1", &[])).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(store.writes().creates, 1);
    }

    #[tokio::test]
    async fn test_create_existing_is_conflict() {
        let store = MemoryStore::new();
        store.create(&secret("default", "s1", &[])).await.unwrap();
        let err = store
            .create(&secret("default", "s1", &[]))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&secret("default", "s1", &[])).await.unwrap();
        store.touch::<Secret>("default", "s1");

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_kinds_are_separate() {
        let store = MemoryStore::new();
        store.create(&secret("default", "same", &[])).await.unwrap();
        assert!(store.get::<ConfigMap>("default", "same").await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        store
            .create(&secret("a", "s1", &[("app", "x")]))
            .await
            .unwrap();
        store
            .create(&secret("b", "s2", &[("app", "x")]))
            .await
            .unwrap();
        store
            .create(&secret("a", "s3", &[("app", "y")]))
            .await
            .unwrap();

        let selector = BTreeMap::from([("app".to_string(), "x".to_string())]);
        let all: Vec<Secret> = store.list(None, &selector).await.unwrap();
        let in_a: Vec<Secret> = store.list(Some("a"), &selector).await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].metadata.name.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_delete_with_finalizers_marks_for_deletion() {
        let store = MemoryStore::new();
        let mut s = secret("default", "s1", &[]);
        s.metadata.finalizers = Some(vec!["example.com/cleanup".to_string()]);
        store.create(&s).await.unwrap();

        store.delete::<Secret>("default", "s1").await.unwrap();
        let mut marked: Secret = store.get("default", "s1").await.unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        marked.metadata.finalizers = Some(vec![]);
        store.update(&marked).await.unwrap();
        assert!(!store.contains::<Secret>("default", "s1"));
    }

    #[tokio::test]
    async fn test_delete_if_exists_ignores_missing() {
        let store = MemoryStore::new();
        delete_if_exists::<Secret, _>(&store, "default", "missing")
            .await
            .unwrap();
        assert_eq!(store.writes().total(), 0);
    }

    #[test]
    fn test_labels_match() {
        let labels = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let selector = BTreeMap::from([("a".to_string(), "1".to_string())]);

        assert!(labels_match(Some(&labels), &selector));
        assert!(!labels_match(None, &selector));
        assert!(labels_match(None, &BTreeMap::new()));
    }

    #[test]
    fn test_selector_string() {
        let selector = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(selector_string(&selector), "a=1,b=2");
    }

    #[test]
    fn test_controller_reference_requires_uid() {
        let owner = secret("default", "owner", &[]);
        assert!(controller_reference(&owner).unwrap_err().is_validation());
    }

    #[test]
    fn test_is_controlled_by() {
        let mut owner = secret("default", "owner", &[]);
        owner.metadata.uid = Some("abc".to_string());
        let mut child = secret("default", "child", &[]);
        child.metadata.owner_references = Some(vec![controller_reference(&owner).unwrap()]);

        assert!(is_controlled_by(&child, "abc"));
        assert!(!is_controlled_by(&child, "other"));
    }
}
