// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `labels.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_finalizer_names_use_lowercase_kind() {
        assert_eq!(
            association_watch_finalizer("Logstash"),
            "finalizer.association.logstash.k8s.elastic.co/elasticsearch"
        );
        assert_eq!(
            external_user_finalizer("ApmServer"),
            "finalizer.association.apmserver.k8s.elastic.co/external-user"
        );
        assert_eq!(
            secure_settings_finalizer("Kibana"),
            "finalizer.kibana.k8s.elastic.co/secure-settings-secret"
        );
        assert_eq!(
            es_auth_secret_finalizer("Kibana"),
            "finalizer.kibana.k8s.elastic.co/es-auth-secret"
        );
    }

    #[test]
    fn test_user_selector_adds_type_label() {
        let selector = LOGSTASH_ASSOCIATION_LABELS.user_selector("ls1", "default");

        assert_eq!(selector.len(), 3);
        assert_eq!(selector[TYPE_LABEL], USER_TYPE);
        assert_eq!(selector[LOGSTASH_ASSOCIATION_LABELS.name], "ls1");
        assert_eq!(selector[LOGSTASH_ASSOCIATION_LABELS.namespace], "default");
    }

    #[test]
    fn test_created_for_requires_both_halves_of_the_pair() {
        let labels = KIBANA_ASSOCIATION_LABELS.pair_selector("kb1", "default");

        assert!(KIBANA_ASSOCIATION_LABELS.created_for(Some(&labels), "kb1", "default"));
        assert!(!KIBANA_ASSOCIATION_LABELS.created_for(Some(&labels), "kb1", "other"));
        assert!(!KIBANA_ASSOCIATION_LABELS.created_for(Some(&labels), "kb2", "default"));
        assert!(!KIBANA_ASSOCIATION_LABELS.created_for(None, "kb1", "default"));

        let name_only = KIBANA_ASSOCIATION_LABELS.name_selector("kb1");
        assert!(!KIBANA_ASSOCIATION_LABELS.created_for(Some(&name_only), "kb1", "default"));
    }

    #[test]
    fn test_config_checksum_label_per_product() {
        assert_eq!(
            config_checksum_label("logstash"),
            "logstash.k8s.elastic.co/config-checksum"
        );
        assert_eq!(
            config_checksum_label("apm-server"),
            "apm.k8s.elastic.co/config-checksum"
        );
    }

    #[test]
    fn test_new_labels() {
        let labels = new_labels("kibana", KIBANA_NAME_LABEL, "kb1");
        assert_eq!(labels[TYPE_LABEL], "kibana");
        assert_eq!(labels[KIBANA_NAME_LABEL], "kb1");
    }
}
