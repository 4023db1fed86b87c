//! Context store: session-id to context association
//!
//! Wraps the concurrent map behind the attach/lookup/detach contract the
//! interceptor relies on. Attach uses keep-if-exists semantics so two opens
//! racing on the same session id resolve to a single context.

use crate::filter::context::FileContext;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Identity of one open file session
pub type FileObjectId = u64;

/// Result of an attach attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The supplied context was attached
    Attached,
    /// A context was already present; the supplied one was discarded
    KeptExisting,
}

/// Concurrent store of per-session contexts
pub struct ContextStore {
    contexts: DashMap<FileObjectId, Arc<FileContext>>,
}

impl ContextStore {
    pub fn new() -> Self {
        ContextStore {
            contexts: DashMap::new(),
        }
    }

    /// Attach a context unless one is already present.
    ///
    /// On `KeptExisting` the supplied context is dropped here, which is the
    /// discard of the losing allocation.
    pub fn attach_if_absent(
        &self,
        id: FileObjectId,
        context: Arc<FileContext>,
    ) -> AttachOutcome {
        match self.contexts.entry(id) {
            Entry::Occupied(_) => AttachOutcome::KeptExisting,
            Entry::Vacant(slot) => {
                slot.insert(context);
                AttachOutcome::Attached
            }
        }
    }

    /// Get the context for a session, if any
    pub fn lookup(&self, id: FileObjectId) -> Option<Arc<FileContext>> {
        self.contexts.get(&id).map(|entry| Arc::clone(&entry))
    }

    /// Remove and return the context for a session, if any
    pub fn detach(&self, id: FileObjectId) -> Option<Arc<FileContext>> {
        self.contexts.remove(&id).map(|(_, context)| context)
    }

    /// Number of attached contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Remove every context, returning them for teardown logging
    pub fn drain(&self) -> Vec<(FileObjectId, Arc<FileContext>)> {
        let ids: Vec<FileObjectId> = self.contexts.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.contexts.remove(&id))
            .collect()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context(path: &str) -> Arc<FileContext> {
        Arc::new(FileContext::new(PathBuf::from(path)))
    }

    #[test]
    fn test_attach_lookup_detach() {
        let store = ContextStore::new();
        assert!(store.lookup(1).is_none());

        let outcome = store.attach_if_absent(1, context("/data/secret/a.txt"));
        assert_eq!(outcome, AttachOutcome::Attached);

        let found = store.lookup(1).unwrap();
        assert_eq!(found.path(), PathBuf::from("/data/secret/a.txt"));

        let detached = store.detach(1).unwrap();
        assert_eq!(detached.path(), PathBuf::from("/data/secret/a.txt"));
        assert!(store.lookup(1).is_none());
        assert!(store.detach(1).is_none());
    }

    #[test]
    fn test_attach_keeps_existing() {
        let store = ContextStore::new();
        store.attach_if_absent(7, context("/data/secret/first.txt"));

        let outcome = store.attach_if_absent(7, context("/data/secret/second.txt"));
        assert_eq!(outcome, AttachOutcome::KeptExisting);

        // First attach wins
        let found = store.lookup(7).unwrap();
        assert_eq!(found.path(), PathBuf::from("/data/secret/first.txt"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_drain() {
        let store = ContextStore::new();
        store.attach_if_absent(1, context("/data/secret/a.txt"));
        store.attach_if_absent(2, context("/data/secret/b.txt"));

        let drained = store.drain();
        assert_eq!(drained.len(), 2);
        assert!(store.is_empty());
    }
}
