//! Revocable preview handles for decoded image buffers.
//!
//! The presentation layer displays each image of the working set while
//! the batch runs and while segments await confirmation. Handles are
//! registered in a per-session registry and revoke their entry on drop,
//! so buffers are released on every exit path — completion, cancel, or
//! replacement by a new batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

/// Registry of live preview buffers, keyed by handle id.
#[derive(Default)]
pub struct PreviewRegistry {
    entries: Mutex<HashMap<Uuid, Arc<Vec<u8>>>>,
}

impl PreviewRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a buffer and return its revocable handle.
    pub fn register(self: &Arc<Self>, bytes: Arc<Vec<u8>>) -> PreviewHandle {
        let id = Uuid::new_v4();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, bytes);
        }
        PreviewHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Look up a live preview buffer.
    pub fn resolve(&self, id: &Uuid) -> Option<Arc<Vec<u8>>> {
        self.entries.lock().ok().and_then(|e| e.get(id).cloned())
    }

    /// Number of live (unrevoked) previews.
    pub fn live_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    fn revoke(&self, id: &Uuid) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(id);
        }
    }
}

/// Revocable reference to a registered preview buffer.
///
/// Revokes its registry entry when dropped; explicit `revoke()` is
/// idempotent.
pub struct PreviewHandle {
    id: Uuid,
    registry: Weak<PreviewRegistry>,
}

impl PreviewHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn revoke(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.revoke(&self.id);
        }
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.revoke();
    }
}

impl std::fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_makes_buffer_resolvable() {
        let registry = PreviewRegistry::new();
        let handle = registry.register(Arc::new(vec![1, 2, 3]));
        let bytes = registry.resolve(&handle.id()).expect("registered");
        assert_eq!(*bytes, vec![1, 2, 3]);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn drop_revokes_entry() {
        let registry = PreviewRegistry::new();
        let id;
        {
            let handle = registry.register(Arc::new(vec![9]));
            id = handle.id();
        }
        assert!(registry.resolve(&id).is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn explicit_revoke_is_idempotent() {
        let registry = PreviewRegistry::new();
        let handle = registry.register(Arc::new(vec![7]));
        handle.revoke();
        handle.revoke();
        assert!(registry.resolve(&handle.id()).is_none());
        // Drop after explicit revoke is a no-op
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let registry = PreviewRegistry::new();
        let handle = registry.register(Arc::new(vec![4]));
        drop(registry);
        handle.revoke();
    }

    #[test]
    fn distinct_handles_for_same_bytes() {
        let registry = PreviewRegistry::new();
        let bytes = Arc::new(vec![5, 5]);
        let a = registry.register(bytes.clone());
        let b = registry.register(bytes);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.live_count(), 2);
    }
}
