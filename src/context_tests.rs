// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `context.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::store::MemoryStore;
    use crate::watches::{NamedWatch, ObjectKey};

    #[test]
    fn test_fresh_watches_share_everything_else() {
        let ctx = Context::for_store(Arc::new(MemoryStore::new()));
        ctx.watches.secrets.add_handler(NamedWatch {
            name: "w".to_string(),
            watched: vec![ObjectKey::new("default", "s")],
            watcher: ObjectKey::new("default", "kb1"),
        });

        let other = ctx.with_fresh_watches();

        assert!(other.watches.secrets.registrations().is_empty());
        assert!(ctx.watches.secrets.is_registered("w"));
        assert!(Arc::ptr_eq(&ctx.store, &other.store));
        assert!(Arc::ptr_eq(&ctx.associations, &other.associations));
        assert_eq!(ctx.params, other.params);
    }

    #[test]
    fn test_clone_shares_watches() {
        let ctx = Context::for_store(Arc::new(MemoryStore::new()));
        let clone = ctx.clone();
        assert!(Arc::ptr_eq(&ctx.watches, &clone.watches));
    }
}
