// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `errors.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use anyhow::Context as _;

    #[test]
    fn test_predicates_match_variants() {
        let not_found = OperatorError::not_found("Secret", "default", "es1-es-elastic-user");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert_eq!(not_found.to_string(), "Secret default/es1-es-elastic-user not found");

        let conflict = OperatorError::conflict("Kibana", "default", "kb1", "stale resourceVersion");
        assert!(conflict.is_conflict());
        assert!(!conflict.is_validation());

        assert!(OperatorError::Validation("bad version".to_string()).is_validation());
    }

    #[test]
    fn test_categories() {
        assert_eq!(OperatorError::not_found("a", "b", "c").category(), "not_found");
        assert_eq!(OperatorError::conflict("a", "b", "c", "d").category(), "conflict");
        assert_eq!(
            OperatorError::Validation(String::new()).category(),
            "validation_error"
        );
        assert_eq!(
            OperatorError::Certificate(String::new()).category(),
            "certificate_error"
        );
        assert_eq!(
            OperatorError::Association(String::new()).category(),
            "association_error"
        );
    }

    #[test]
    fn test_from_kube_keeps_404_and_409() {
        let api_error = |code: u16| {
            kube::Error::Api(
                kube::core::Status::failure("boom", "Reason")
                    .with_code(code)
                    .boxed(),
            )
        };

        assert!(OperatorError::from_kube(api_error(404), "Secret", "ns", "n").is_not_found());
        assert!(OperatorError::from_kube(api_error(409), "Secret", "ns", "n").is_conflict());
        assert!(matches!(
            OperatorError::from_kube(api_error(500), "Secret", "ns", "n"),
            OperatorError::Kube(_)
        ));
    }

    #[test]
    fn test_classification_survives_anyhow_context() {
        let err = Err::<(), _>(OperatorError::conflict("Logstash", "default", "ls1", "stale"))
            .context("updating status")
            .unwrap_err();

        assert!(is_conflict(&err));
        assert!(!is_not_found(&err));
        assert!(!is_validation(&err));
        assert_eq!(classify(&err).map(OperatorError::category), Some("conflict"));
    }

    #[test]
    fn test_foreign_errors_are_unclassified() {
        let err = anyhow::anyhow!("plain failure");
        assert!(classify(&err).is_none());
        assert!(!is_conflict(&err));
    }
}
