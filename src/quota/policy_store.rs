//! Key → policy mapping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::ApiKeyPolicy;

/// Read-mostly policy table. Reloads swap the whole map under one write lock,
/// so readers see either the old set or the new one.
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: RwLock<HashMap<String, Arc<ApiKeyPolicy>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every policy; returns the new count.
    pub fn load(&self, policies: HashMap<String, ApiKeyPolicy>) -> usize {
        let next: HashMap<String, Arc<ApiKeyPolicy>> = policies
            .into_iter()
            .map(|(key, policy)| (key, Arc::new(policy)))
            .collect();
        let count = next.len();
        *self.policies.write().unwrap_or_else(|e| e.into_inner()) = next;
        count
    }

    pub fn get(&self, api_key: &str) -> Option<Arc<ApiKeyPolicy>> {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(api_key)
            .cloned()
    }

    /// Independent copy of every policy.
    pub fn all(&self) -> HashMap<String, ApiKeyPolicy> {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(key, policy)| (key.clone(), ApiKeyPolicy::clone(policy)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.policies.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_replaces_everything() {
        let store = PolicyStore::new();
        store.load(HashMap::from([
            ("a".to_string(), ApiKeyPolicy::new().max_tokens(1)),
            ("b".to_string(), ApiKeyPolicy::new().max_tokens(2)),
        ]));
        assert_eq!(store.len(), 2);

        let held = store.get("a").unwrap();
        store.load(HashMap::from([(
            "c".to_string(),
            ApiKeyPolicy::new().max_tokens(3),
        )]));

        assert!(store.get("a").is_none());
        assert!(store.get("b").is_none());
        assert_eq!(store.get("c").unwrap().max_tokens, 3);
        // Policies handed out earlier are unaffected by the reload.
        assert_eq!(held.max_tokens, 1);
    }

    #[test]
    fn test_all_is_a_copy() {
        let store = PolicyStore::new();
        store.load(HashMap::from([("a".to_string(), ApiKeyPolicy::new())]));

        let mut copy = store.all();
        copy.get_mut("a").unwrap().max_tokens = 99;
        copy.insert("z".into(), ApiKeyPolicy::new());

        assert_eq!(store.get("a").unwrap().max_tokens, 0);
        assert!(store.get("z").is_none());
    }
}
