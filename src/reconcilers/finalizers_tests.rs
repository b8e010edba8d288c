// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `finalizers.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{Logstash, LogstashSpec};
    use crate::store::MemoryStore;
    use crate::watches::{NamedWatch, ObjectKey};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Finalizer for Counting {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn finalize(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(OperatorError::Association("cleanup failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn logstash(store: &MemoryStore) -> Logstash {
        let mut ls = Logstash::new(
            "ls1",
            LogstashSpec {
                version: "7.4.0".to_string(),
                ..Default::default()
            },
        );
        ls.metadata.namespace = Some("default".to_string());
        store.insert(ls).unwrap()
    }

    #[tokio::test]
    async fn test_adds_missing_finalizers_once() {
        let store = MemoryStore::new();
        let mut ls = logstash(&store);
        let a = Counting::new("a.k8s.elastic.co/x", false);
        let b = Counting::new("b.k8s.elastic.co/y", false);

        handle_finalizers(&store, &mut ls, &[&a, &b]).await.unwrap();
        assert_eq!(ls.finalizers(), &["a.k8s.elastic.co/x", "b.k8s.elastic.co/y"]);
        assert_eq!(store.writes().updates, 1);

        handle_finalizers(&store, &mut ls, &[&a, &b]).await.unwrap();
        assert_eq!(store.writes().updates, 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_runs_cleanup_and_removes_on_deletion() {
        let store = MemoryStore::new();
        let mut ls = logstash(&store);
        let a = Counting::new("a.k8s.elastic.co/x", false);
        handle_finalizers(&store, &mut ls, &[&a]).await.unwrap();

        store.delete::<Logstash>("default", "ls1").await.unwrap();
        let mut deleting: Logstash = store.get("default", "ls1").await.unwrap();
        assert!(is_being_deleted(&deleting));

        handle_finalizers(&store, &mut deleting, &[&a]).await.unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert!(!store.contains::<Logstash>("default", "ls1"));
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_finalizer() {
        let store = MemoryStore::new();
        let mut ls = logstash(&store);
        let ok = Counting::new("a.k8s.elastic.co/ok", false);
        let broken = Counting::new("b.k8s.elastic.co/broken", true);
        handle_finalizers(&store, &mut ls, &[&ok, &broken]).await.unwrap();

        store.delete::<Logstash>("default", "ls1").await.unwrap();
        let mut deleting: Logstash = store.get("default", "ls1").await.unwrap();

        let err = handle_finalizers(&store, &mut deleting, &[&ok, &broken])
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Association(_)));

        let stored: Logstash = store.get("default", "ls1").await.unwrap();
        assert_eq!(stored.finalizers(), &["b.k8s.elastic.co/broken"]);
    }

    #[tokio::test]
    async fn test_foreign_finalizers_are_left_alone() {
        let store = MemoryStore::new();
        let mut ls = logstash(&store);
        ls.finalizers_mut().push("someone.else/finalizer".to_string());
        let mut ls = store.update(&ls).await.unwrap();
        let a = Counting::new("a.k8s.elastic.co/x", false);
        handle_finalizers(&store, &mut ls, &[&a]).await.unwrap();

        store.delete::<Logstash>("default", "ls1").await.unwrap();
        let mut deleting: Logstash = store.get("default", "ls1").await.unwrap();
        handle_finalizers(&store, &mut deleting, &[&a]).await.unwrap();

        let stored: Logstash = store.get("default", "ls1").await.unwrap();
        assert_eq!(stored.finalizers(), &["someone.else/finalizer"]);
    }

    #[tokio::test]
    async fn test_watch_finalizer_removes_registrations() {
        let registry = WatchRegistry::new();
        registry.add_handler(NamedWatch {
            name: "default-ls1-es-watch".to_string(),
            watched: vec![ObjectKey::new("default", "es1")],
            watcher: ObjectKey::new("default", "ls1"),
        });
        registry.add_handler(NamedWatch {
            name: "default-kb1-es-watch".to_string(),
            watched: vec![ObjectKey::new("default", "es1")],
            watcher: ObjectKey::new("default", "kb1"),
        });

        let finalizer = WatchFinalizer::new(
            "finalizer.association.logstash.k8s.elastic.co/elasticsearch",
            vec![(&registry, "default-ls1-es-watch".to_string())],
        );
        finalizer.finalize().await.unwrap();
        // idempotent
        finalizer.finalize().await.unwrap();

        assert!(!registry.is_registered("default-ls1-es-watch"));
        assert_eq!(
            registry.watchers_for(&ObjectKey::new("default", "es1")),
            vec![ObjectKey::new("default", "kb1")]
        );
    }
}
