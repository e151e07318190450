//! The active-world context.
//!
//! At most one world is active at a time. The application driver owns the
//! context and hands it to whichever component needs the active world; only
//! [`ChunkCache::load`] and [`ChunkCache::unload`] change it.

use std::sync::Arc;

use parking_lot::RwLock;
use strata_common::Location;

use crate::cache::ChunkCache;

/// Holds the currently active world, if any.
#[derive(Default)]
pub struct WorldContext {
    current: RwLock<Option<Arc<ChunkCache>>>,
}

impl WorldContext {
    /// Creates a context with no active world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active world.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ChunkCache>> {
        self.current.read().clone()
    }

    /// Checks whether `world` is the active world.
    #[must_use]
    pub fn is_current(&self, world: &ChunkCache) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), world))
    }

    /// Unloads a chunk from the active world.
    ///
    /// Returns false when no world is active or the chunk is not resident.
    pub fn unload_chunk(&self, location: Location) -> bool {
        self.current()
            .is_some_and(|world| world.unload_chunk(location))
    }

    pub(crate) fn set_current(&self, world: Arc<ChunkCache>) -> Option<Arc<ChunkCache>> {
        self.current.write().replace(world)
    }

    pub(crate) fn clear_if(&self, world: &ChunkCache) -> bool {
        let mut current = self.current.write();
        let matches = current
            .as_ref()
            .is_some_and(|active| std::ptr::eq(Arc::as_ptr(active), world));
        if matches {
            *current = None;
        }
        matches
    }
}

impl std::fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldContext")
            .field("active", &self.current.read().is_some())
            .finish()
    }
}
