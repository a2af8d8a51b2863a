use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Cancel handles of running connections, keyed by peer address.
#[derive(Debug, Default)]
pub(super) struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    token: CancellationToken,
}

impl Registry {
    /// Inserts `token` under `peer`. The entry lives exactly as long as the
    /// returned guard.
    pub(super) fn register(
        self: &Arc<Self>,
        peer: &str,
        token: CancellationToken,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        if entries.insert(peer.to_string(), Entry { id, token }).is_some() {
            tracing::warn!(peer = %peer, "Replacing registry entry for reused peer address");
        }
        Registration {
            registry: Arc::clone(self),
            peer: peer.to_string(),
            id,
        }
    }

    pub(super) fn tokens(&self) -> Vec<CancellationToken> {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .map(|entry| entry.token.clone())
            .collect()
    }

    pub(super) fn len(&self) -> usize {
        self.entries.lock().expect("registry mutex poisoned").len()
    }
}

pub(super) struct Registration {
    registry: Arc<Registry>,
    peer: String,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut entries = self
            .registry
            .entries
            .lock()
            .expect("registry mutex poisoned");
        if entries.get(&self.peer).is_some_and(|entry| entry.id == self.id) {
            entries.remove(&self.peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_guard_removes_entry() {
        let registry = Arc::new(Registry::default());
        let first = registry.register("10.0.0.1:5000", CancellationToken::new());
        let second = registry.register("10.0.0.2:5000", CancellationToken::new());
        assert_eq!(registry.len(), 2);
        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn stale_guard_keeps_newer_entry() {
        let registry = Arc::new(Registry::default());
        let stale = registry.register("peer", CancellationToken::new());
        let current_token = CancellationToken::new();
        let _current = registry.register("peer", current_token.clone());
        drop(stale);
        assert_eq!(registry.len(), 1);

        for token in registry.tokens() {
            token.cancel();
        }
        assert!(current_token.is_cancelled());
    }
}
