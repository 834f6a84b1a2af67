//! Tag table — live address tag to clique name mapping.
//!
//! One table per router. Lookups run on transport workers while cliques
//! rotate concurrently, so every mutation happens under the write half of a
//! `tokio::sync::RwLock`. A rotation registers the new tag and retires the
//! old one under a single write guard, which keeps the invariant that at
//! most one clique owns any live tag at any instant.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ChatError;

/// Mapping from live address tag to clique name.
#[derive(Debug, Default)]
pub struct TagTable {
    inner: RwLock<HashMap<String, String>>,
}

impl TagTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a tag to its owning clique name.
    pub async fn resolve(&self, tag: &str) -> Option<String> {
        self.inner.read().await.get(tag).cloned()
    }

    /// Register a tag for a clique. Rejects the registration if the tag is
    /// already live for a different clique.
    pub async fn register(&self, tag: &str, clique: &str) -> Result<(), ChatError> {
        let mut table = self.inner.write().await;
        if let Some(owner) = table.get(tag) {
            if owner != clique {
                warn!("Tag collision: {tag} already live for clique '{owner}'");
                return Err(ChatError::UnknownRoute(format!(
                    "tag {tag} already registered"
                )));
            }
            return Ok(());
        }
        table.insert(tag.to_string(), clique.to_string());
        debug!("Registered tag {tag} for clique '{clique}'");
        Ok(())
    }

    /// Atomically activate `new_tag` and retire `old_tag` for a clique.
    ///
    /// Register-new-then-deregister-old, under one write guard: no window
    /// exists where the clique is unreachable, and the retired tag stops
    /// routing the moment the guard drops.
    pub async fn swap(&self, new_tag: &str, old_tag: &str, clique: &str) -> Result<(), ChatError> {
        let mut table = self.inner.write().await;
        if let Some(owner) = table.get(new_tag) {
            if owner != clique {
                warn!("Tag collision on rotation: {new_tag} already live for '{owner}'");
                return Err(ChatError::UnknownRoute(format!(
                    "tag {new_tag} already registered"
                )));
            }
        }
        table.insert(new_tag.to_string(), clique.to_string());
        table.remove(old_tag);
        debug!("Rotated clique '{clique}' tag {old_tag} -> {new_tag}");
        Ok(())
    }

    /// Retire a tag, e.g. when a clique closes.
    pub async fn deregister(&self, tag: &str) {
        self.inner.write().await.remove(tag);
    }

    /// Number of live tags.
    pub async fn live_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
