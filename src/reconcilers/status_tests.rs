// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_create_condition() {
        let condition = create_condition("Ready", "True", "Ready", "All nodes available");

        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason.as_deref(), Some("Ready"));
        assert!(condition.last_transition_time.is_some());
    }

    #[test]
    fn test_condition_changed() {
        let existing = create_condition("Ready", "False", "Progressing", "0/1 available");

        assert!(condition_changed(None, &existing));
        assert!(!condition_changed(Some(&existing), &existing.clone()));
        assert!(condition_changed(
            Some(&existing),
            &create_condition("Ready", "True", "Ready", "1/1 available")
        ));
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_unchanged() {
        let mut first = create_condition("Ready", "True", "Ready", "1/1 available");
        first.last_transition_time = Some("2025-01-01T00:00:00+00:00".to_string());
        let mut conditions = vec![first];

        set_condition(
            &mut conditions,
            create_condition("Ready", "True", "Ready", "1/1 available"),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_set_condition_replaces_and_appends() {
        let mut conditions = vec![create_condition("Ready", "False", "Progressing", "0/1")];

        set_condition(&mut conditions, create_condition("Ready", "True", "Ready", "1/1"));
        set_condition(
            &mut conditions,
            create_condition("ElasticsearchAssociation", "True", "Established", "ok"),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(find_condition(&conditions, "Ready").unwrap().status, "True");
        assert!(find_condition(&conditions, "Missing").is_none());
    }
}
