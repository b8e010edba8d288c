// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `conf.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{Kibana, KibanaSpec, Logstash, LogstashSpec};
    use crate::store::MemoryStore;

    fn conf() -> AssociationConf {
        AssociationConf {
            auth_secret_name: "ls1-ls-es-auth".to_string(),
            auth_secret_key: "default-ls1-logstash-user".to_string(),
            ca_cert_provided: true,
            ca_secret_name: "ls1-ls-es-ca".to_string(),
            url: "https://es1-es-http.default.svc:9200".to_string(),
        }
    }

    fn logstash() -> Logstash {
        let mut ls = Logstash::new("ls1", LogstashSpec::default());
        ls.metadata.namespace = Some("default".to_string());
        ls
    }

    #[test]
    fn test_blank_annotation_is_none() {
        let mut ls = logstash();
        assert_eq!(conf_from_annotation(&ls).unwrap(), None);

        ls.annotations_mut()
            .insert(ASSOCIATION_CONF_ANNOTATION.to_string(), " ".to_string());
        assert_eq!(conf_from_annotation(&ls).unwrap(), None);

        ls.annotations_mut()
            .insert(ASSOCIATION_CONF_ANNOTATION.to_string(), "{".to_string());
        assert!(conf_from_annotation(&ls).is_err());
    }

    #[tokio::test]
    async fn test_persist_then_remove() {
        let store = MemoryStore::new();
        let mut ls = store.insert(logstash()).unwrap();

        persist_association_conf(&store, &mut ls, Some(&conf()))
            .await
            .unwrap();
        assert_eq!(conf_from_annotation(&ls).unwrap(), Some(conf()));

        persist_association_conf(&store, &mut ls, Some(&conf()))
            .await
            .unwrap();
        assert_eq!(store.writes().updates, 1);

        persist_association_conf(&store, &mut ls, None).await.unwrap();
        let stored: Logstash = store.get("default", "ls1").await.unwrap();
        assert!(!stored
            .annotations()
            .contains_key(ASSOCIATION_CONF_ANNOTATION));
        assert_eq!(store.writes().updates, 2);
    }

    #[tokio::test]
    async fn test_persist_conflict_is_reported() {
        let store = MemoryStore::new();
        let mut ls = store.insert(logstash()).unwrap();
        store.touch::<Logstash>("default", "ls1");

        let err = persist_association_conf(&store, &mut ls, Some(&conf()))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_table_is_keyed_by_kind_and_identity() {
        let table = AssociationTable::new();
        let mut ls = logstash();
        ls.annotations_mut().insert(
            ASSOCIATION_CONF_ANNOTATION.to_string(),
            serde_json::to_string(&conf()).unwrap(),
        );
        let mut kb = Kibana::new("ls1", KibanaSpec::default());
        kb.metadata.namespace = Some("default".to_string());

        assert_eq!(table.load(&ls).unwrap(), Some(conf()));
        assert_eq!(table.get(&ls), Some(conf()));
        assert_eq!(table.get(&kb), None);

        table.set(&kb, AssociationConf::default());
        assert_eq!(table.len(), 2);

        table.remove(&ls);
        assert_eq!(table.get(&ls), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_load_without_annotation_clears_entry() {
        let table = AssociationTable::new();
        let ls = logstash();
        table.set(&ls, conf());

        assert_eq!(table.load(&ls).unwrap(), None);
        assert!(table.is_empty());
    }
}
