// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Conversation identifier → continuation token store.

use dashmap::DashMap;
use std::fmt::Debug;
use tracing::debug;

/// Maps a client conversation identifier to the token the upstream issued
/// for resuming it.
///
/// Implementations must allow concurrent access for different
/// conversations; there are no invariants across keys.
pub trait SessionStore: Debug + Send + Sync {
    fn resolve(&self, conversation_id: &str) -> Option<String>;

    fn store(&self, conversation_id: &str, token: String);

    /// Forget the token, returning it if one was stored
    fn clear(&self, conversation_id: &str) -> Option<String>;
}

/// Process-local store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    tokens: DashMap<String, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn resolve(&self, conversation_id: &str) -> Option<String> {
        self.tokens.get(conversation_id).map(|token| token.value().clone())
    }

    fn store(&self, conversation_id: &str, token: String) {
        debug!(conversation_id, "storing continuation token");
        self.tokens.insert(conversation_id.to_string(), token);
    }

    fn clear(&self, conversation_id: &str) -> Option<String> {
        let removed = self.tokens.remove(conversation_id).map(|(_, token)| token);
        if removed.is_some() {
            debug!(conversation_id, "cleared continuation token");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn resolve_store_clear() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.resolve("t1"), None);

        store.store("t1", "resp_1".into());
        store.store("t1", "resp_2".into());
        assert_eq!(store.resolve("t1").as_deref(), Some("resp_2"));
        assert_eq!(store.len(), 1);

        assert_eq!(store.clear("t1").as_deref(), Some("resp_2"));
        assert_eq!(store.clear("t1"), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn independent_sessions_update_concurrently() {
        let store = Arc::new(InMemorySessionStore::new());
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let id = format!("thread-{i}");
                    store.store(&id, format!("resp_{i}"));
                    tokio::task::yield_now().await;
                    store.resolve(&id)
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), Some(format!("resp_{i}")));
        }
        assert_eq!(store.len(), 32);
    }
}
