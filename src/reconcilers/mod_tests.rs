// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `reconcilers/mod.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_merge_keeps_earliest_requeue() {
        let ten = ReconcileOutcome::requeue(Duration::from_secs(10));
        let five = ReconcileOutcome::requeue(Duration::from_secs(5));

        assert_eq!(ten.merge(five), five);
        assert_eq!(five.merge(ten), five);
        assert_eq!(ReconcileOutcome::done().merge(ten), ten);
        assert_eq!(ten.merge(ReconcileOutcome::done()), ten);
        assert_eq!(
            ReconcileOutcome::done().merge(ReconcileOutcome::done()),
            ReconcileOutcome::done()
        );
    }

    #[test]
    fn test_requeue_at_most() {
        let outcome = ReconcileOutcome::done().requeue_at_most(Duration::from_secs(30));
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));
        assert_eq!(
            outcome
                .requeue_at_most(Duration::from_secs(60))
                .requeue_after,
            Some(Duration::from_secs(30))
        );
    }
}
