//! Chunk persistence.
//!
//! The cache decides *when* a chunk is saved; a [`ChunkPersistor`] decides
//! where the bytes go. Eviction only needs the [`Saveable`] capability, so it
//! never depends on the concrete chunk type.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use strata_common::{Location, WorldError, WorldResult};
use tracing::debug;

use crate::chunk::Chunk;
use crate::tile::TileRegistry;

/// Persists chunks somewhere.
///
/// Implementations are called from several threads at once, for distinct
/// chunks as well as for the same chunk.
pub trait ChunkPersistor: Send + Sync + 'static {
    /// Persists a snapshot of `chunk`.
    fn persist(&self, chunk: &Chunk) -> WorldResult<()>;
}

impl<P: ChunkPersistor + ?Sized> ChunkPersistor for Arc<P> {
    fn persist(&self, chunk: &Chunk) -> WorldResult<()> {
        (**self).persist(chunk)
    }
}

/// Something the cache can save before dropping it.
pub trait Saveable {
    /// Location used to report failures.
    fn location(&self) -> Location;

    /// Saves through the given persistor.
    fn save_with(&self, persistor: &dyn ChunkPersistor) -> WorldResult<()>;
}

impl Saveable for Chunk {
    fn location(&self) -> Location {
        Chunk::location(self)
    }

    fn save_with(&self, persistor: &dyn ChunkPersistor) -> WorldResult<()> {
        persistor.persist(self)
    }
}

/// Discards every save.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersistor;

impl ChunkPersistor for NullPersistor {
    fn persist(&self, _chunk: &Chunk) -> WorldResult<()> {
        Ok(())
    }
}

/// Records saves in memory.
///
/// Useful for dry runs, and for checking exactly which chunks were saved.
/// Specific locations can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryPersistor {
    saves: Mutex<AHashMap<Location, usize>>,
    order: Mutex<Vec<Location>>,
    failing: Mutex<AHashSet<Location>>,
}

impl MemoryPersistor {
    /// Creates an empty persistor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future save of `location` fail.
    pub fn fail_on(&self, location: Location) {
        self.failing.lock().insert(location);
    }

    /// Lets saves of `location` succeed again.
    pub fn clear_failure(&self, location: Location) {
        self.failing.lock().remove(&location);
    }

    /// Number of successful saves of `location`.
    #[must_use]
    pub fn save_count(&self, location: Location) -> usize {
        self.saves.lock().get(&location).copied().unwrap_or(0)
    }

    /// Total number of successful saves.
    #[must_use]
    pub fn total_saves(&self) -> usize {
        self.order.lock().len()
    }

    /// Every successful save, in the order it happened.
    #[must_use]
    pub fn history(&self) -> Vec<Location> {
        self.order.lock().clone()
    }
}

impl ChunkPersistor for MemoryPersistor {
    fn persist(&self, chunk: &Chunk) -> WorldResult<()> {
        let location = chunk.location();
        if self.failing.lock().contains(&location) {
            return Err(WorldError::persist(location, "injected failure"));
        }
        *self.saves.lock().entry(location).or_insert(0) += 1;
        self.order.lock().push(location);
        Ok(())
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores one file per chunk in a directory.
#[derive(Debug, Clone)]
pub struct DiskPersistor {
    dir: PathBuf,
}

impl DiskPersistor {
    /// Creates a persistor writing into `dir` (created on first save).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The save directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path for a chunk.
    #[must_use]
    pub fn chunk_path(&self, location: Location) -> PathBuf {
        self.dir
            .join(format!("chunk_{}_{}.stch", location.x, location.y))
    }

    /// Loads a saved chunk, or `None` if it was never saved.
    pub fn load(&self, location: Location, registry: &TileRegistry) -> WorldResult<Option<Chunk>> {
        let path = self.chunk_path(location);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WorldError::generation(location, format!("read failed: {e}")));
            },
        };
        let chunk = Chunk::deserialize(&bytes, registry)
            .map_err(|e| WorldError::generation(location, e.to_string()))?;
        if chunk.location() != location {
            return Err(WorldError::generation(
                location,
                format!("{} holds chunk {}", path.display(), chunk.location()),
            ));
        }
        debug!("Loaded chunk {location} from {}", path.display());
        Ok(Some(chunk))
    }
}

impl ChunkPersistor for DiskPersistor {
    fn persist(&self, chunk: &Chunk) -> WorldResult<()> {
        let location = chunk.location();
        let path = self.chunk_path(location);
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| WorldError::persist(location, format!("mkdir failed: {e}")))?;
        let bytes = chunk
            .serialize()
            .map_err(|e| WorldError::persist(location, e.to_string()))?;

        // Readers only ever see a complete file. Concurrent saves of one chunk
        // each write their own temporary file.
        let tmp = path.with_extension(format!(
            "stch.{}.tmp",
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let written = std::fs::write(&tmp, bytes)
            .map_err(|e| WorldError::persist(location, format!("write failed: {e}")))
            .and_then(|()| {
                std::fs::rename(&tmp, &path)
                    .map_err(|e| WorldError::persist(location, format!("rename failed: {e}")))
            });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        debug!("Saved chunk {location} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Cell, DIRT_TILE};
    use tempfile::TempDir;

    #[test]
    fn test_memory_persistor_counts() {
        let persistor = MemoryPersistor::new();
        let chunk = Chunk::new(Location::new(2, 2));
        persistor.persist(&chunk).expect("persist failed");
        chunk.save_with(&persistor).expect("save failed");

        assert_eq!(persistor.save_count(Location::new(2, 2)), 2);
        assert_eq!(persistor.save_count(Location::new(0, 0)), 0);
        assert_eq!(persistor.total_saves(), 2);
    }

    #[test]
    fn test_memory_persistor_injected_failure() {
        let persistor = MemoryPersistor::new();
        let location = Location::new(-1, 4);
        persistor.fail_on(location);

        let err = Chunk::new(location).save_with(&persistor);
        assert!(matches!(err, Err(WorldError::PersistFailed { x: -1, y: 4, .. })));
        assert_eq!(persistor.total_saves(), 0);

        persistor.clear_failure(location);
        assert!(Chunk::new(location).save_with(&persistor).is_ok());
    }

    #[test]
    fn test_disk_round_trip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let persistor = DiskPersistor::new(dir.path().join("world"));
        let registry = TileRegistry::with_defaults();
        let dirt = registry.get_or_unknown(DIRT_TILE);
        let location = Location::new(7, -3);
        let chunk = Chunk::from_fn(location, |_, y| {
            if y < 10 {
                Cell::Tile(Arc::clone(&dirt))
            } else {
                Cell::Empty
            }
        });

        persistor.persist(&chunk).expect("persist failed");
        assert!(persistor.chunk_path(location).exists());

        let loaded = persistor
            .load(location, &registry)
            .expect("load failed")
            .expect("chunk missing");
        assert_eq!(loaded.cells(), chunk.cells());
    }

    #[test]
    fn test_disk_failed_save_leaves_no_temp_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let persistor = DiskPersistor::new(dir.path());
        let location = Location::new(4, 4);

        // A non-empty directory where the chunk file belongs makes the rename fail.
        let blocker = persistor.chunk_path(location);
        std::fs::create_dir_all(&blocker).expect("mkdir failed");
        std::fs::write(blocker.join("keep"), b"x").expect("write failed");

        let result = persistor.persist(&Chunk::new(location));
        assert!(matches!(result, Err(WorldError::PersistFailed { .. })));

        let leftovers = std::fs::read_dir(dir.path())
            .expect("read_dir failed")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_disk_missing_chunk() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let persistor = DiskPersistor::new(dir.path());
        let registry = TileRegistry::with_defaults();
        let loaded = persistor
            .load(Location::new(0, 0), &registry)
            .expect("load failed");
        assert!(loaded.is_none());
    }

    #[test]
    fn test_disk_corrupt_chunk() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let persistor = DiskPersistor::new(dir.path());
        let registry = TileRegistry::with_defaults();
        let location = Location::new(1, 1);
        std::fs::write(persistor.chunk_path(location), b"not a chunk").expect("write failed");

        assert!(matches!(
            persistor.load(location, &registry),
            Err(WorldError::GenerationFailed { .. })
        ));
    }
}
