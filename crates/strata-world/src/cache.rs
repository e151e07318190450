//! The chunk cache: a bounded, location-keyed store of pending and ready chunks.
//!
//! # Lifecycle
//!
//! ```text
//!   get(miss) ──► Pending ──generate──► Ready ──evict/unload──► save scheduled, dropped
//!                    │                    ▲
//!                    │ (removed while     │ get / get_soft (hit)
//!                    ▼  generating)       │
//!                 detached ──finish──► save scheduled, never installed
//! ```
//!
//! Every structural change (insert, evict, remove) happens under the store's
//! write lock. Generation and saving run on the runtime's blocking pool
//! without holding it. A finished generation takes the write lock and installs
//! its chunk only if its entry (identified by a ticket) is still resident.
//!
//! A chunk leaving the cache is saved in the background. Saves of one
//! location run in the order they were scheduled, and a new generation of a
//! location starts only after the saves already scheduled for it finish.
//! [`ChunkCache::flush`] waits for every scheduled save.
//!
//! A population that outlives its entry is *detached*: it still completes,
//! schedules one save of its chunk and hands it to whoever holds the handle,
//! but the chunk never re-enters the store.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use ahash::AHashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use strata_common::{Location, PixelRect, WorldError, WorldResult};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::chunk::Chunk;
use crate::context::WorldContext;
use crate::generation::ChunkGenerator;
use crate::persist::{ChunkPersistor, Saveable};
use crate::view::{area_to_chunk_range, viewable_area, Camera};

/// Default maximum number of resident chunks.
pub const MAXIMUM_CHUNKS: usize = 1024;

/// Chunk cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum resident chunks (pending and ready)
    pub max_resident: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_resident: MAXIMUM_CHUNKS,
        }
    }
}

type Outcome = WorldResult<Arc<Chunk>>;

/// Handle to a chunk that is, or will be, ready.
///
/// Cloning is cheap; every clone resolves to the same outcome. Awaiting the
/// handle suspends until population finishes. [`ChunkHandle::try_get`] never
/// waits.
#[derive(Clone)]
pub struct ChunkHandle {
    location: Location,
    inner: Shared<BoxFuture<'static, Outcome>>,
}

impl ChunkHandle {
    /// Location of the requested chunk.
    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    /// Outcome if population already finished, without waiting.
    #[must_use]
    pub fn try_get(&self) -> Option<Outcome> {
        self.inner.clone().now_or_never()
    }

    /// The chunk, if it is ready right now.
    #[must_use]
    pub fn ready(&self) -> Option<Arc<Chunk>> {
        self.try_get().and_then(Result::ok)
    }
}

impl Future for ChunkHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for ChunkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkHandle")
            .field("location", &self.location)
            .field("ready", &self.inner.peek().is_some())
            .finish()
    }
}

enum EntryState {
    Pending,
    Ready(Arc<Chunk>),
}

struct Entry {
    ticket: u64,
    state: EntryState,
    handle: ChunkHandle,
    last_access: AtomicU64,
    hits: AtomicU32,
}

impl Entry {
    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    const fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending)
    }

    /// Eviction order: ready before pending, then least recently used, then
    /// least used.
    fn eviction_key(&self) -> (bool, u64, u32) {
        (
            self.is_pending(),
            self.last_access.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
        )
    }
}

/// Completion of a scheduled save.
type SaveDone = Shared<BoxFuture<'static, ()>>;

/// Latest save scheduled for a location.
struct ScheduledSave {
    id: u64,
    done: SaveDone,
}

/// Counters describing cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident entries (pending and ready)
    pub resident: usize,
    /// Resident entries still generating
    pub pending: usize,
    /// Locations with a save still in flight
    pub saves_in_flight: usize,
    /// Lookups that found a resident entry
    pub hits: u64,
    /// Lookups that started a generation
    pub misses: u64,
    /// Chunks generated and installed
    pub generated: u64,
    /// Generations that failed
    pub generation_failures: u64,
    /// Entries removed to stay within capacity
    pub evicted: u64,
    /// Chunks saved when leaving the cache
    pub saved_on_removal: u64,
    /// Saves that failed when leaving the cache
    pub persist_failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    generated: AtomicU64,
    generation_failures: AtomicU64,
    evicted: AtomicU64,
    saved_on_removal: AtomicU64,
    persist_failures: AtomicU64,
}

/// State shared between the cache and its background tasks.
struct Store {
    entries: RwLock<AHashMap<Location, Entry>>,
    /// Lock order: `entries` before `saves`.
    saves: Mutex<AHashMap<Location, ScheduledSave>>,
    generator: Arc<dyn ChunkGenerator>,
    persistor: Arc<dyn ChunkPersistor>,
    runtime: Handle,
    max_resident: usize,
    clock: AtomicU64,
    next_ticket: AtomicU64,
    next_save: AtomicU64,
    counters: Counters,
}

impl Store {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Saves a chunk that is leaving the cache.
    ///
    /// Failures never stop the removal; they are logged and counted.
    fn save_on_removal(&self, chunk: &dyn Saveable) {
        match chunk.save_with(self.persistor.as_ref()) {
            Ok(()) => {
                self.counters.saved_on_removal.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to save chunk {} on removal: {e}", chunk.location());
            },
        }
    }

    /// Completion of the latest save scheduled for `location`, if any.
    fn save_in_flight(&self, location: Location) -> Option<SaveDone> {
        self.saves
            .lock()
            .get(&location)
            .map(|save| save.done.clone())
    }

    /// Saves a chunk leaving the cache on the blocking pool.
    ///
    /// Runs after any save already scheduled for the same location.
    fn schedule_save(self: &Arc<Self>, chunk: Arc<Chunk>) {
        let location = chunk.location();
        let id = self.next_save.fetch_add(1, Ordering::Relaxed);
        let mut saves = self.saves.lock();
        let previous = saves.get(&location).map(|save| save.done.clone());

        let store = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            let saver = Arc::clone(&store);
            let saved = store
                .runtime
                .spawn_blocking(move || saver.save_on_removal(chunk.as_ref()))
                .await;
            if let Err(e) = saved {
                store.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Save task for chunk {location} failed: {e}");
            }

            let mut saves = store.saves.lock();
            if saves.get(&location).is_some_and(|save| save.id == id) {
                saves.remove(&location);
            }
            drop(saves);
        });
        let done = async move {
            let _ = task.await;
        }
        .boxed()
        .shared();
        saves.insert(location, ScheduledSave { id, done });
    }

    /// Removes an entry, scheduling a save if it is ready.
    fn remove_entry(self: &Arc<Self>, location: Location, entry: Entry) {
        match entry.state {
            EntryState::Ready(chunk) => self.schedule_save(chunk),
            EntryState::Pending => debug!("Detached pending chunk {location}"),
        }
    }

    /// Evicts entries until one more fits.
    fn make_room(self: &Arc<Self>, entries: &mut AHashMap<Location, Entry>) {
        while entries.len() >= self.max_resident {
            let Some(victim) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.eviction_key())
                .map(|(location, _)| *location)
            else {
                return;
            };
            if let Some(entry) = entries.remove(&victim) {
                debug!("Evicting chunk {victim}");
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                self.remove_entry(victim, entry);
            }
        }
    }

    /// Body of a population task.
    fn populate(self: &Arc<Self>, location: Location, ticket: u64) -> Outcome {
        let generated = catch_unwind(AssertUnwindSafe(|| self.generator.generate(location)))
            .unwrap_or_else(|panic| Err(WorldError::generation(location, panic_message(&*panic))))
            .and_then(|chunk| {
                if chunk.location() == location {
                    Ok(chunk)
                } else {
                    Err(WorldError::generation(
                        location,
                        format!("generator returned chunk {}", chunk.location()),
                    ))
                }
            });

        let mut entries = self.entries.write();
        let attached = entries
            .get(&location)
            .is_some_and(|entry| entry.ticket == ticket);

        match generated {
            Ok(chunk) => {
                let chunk = Arc::new(chunk);
                if attached {
                    if let Some(entry) = entries.get_mut(&location) {
                        entry.state = EntryState::Ready(Arc::clone(&chunk));
                    }
                    self.counters.generated.fetch_add(1, Ordering::Relaxed);
                    debug!("Generated chunk {location}");
                } else {
                    debug!("Chunk {location} finished after removal, saving");
                    self.schedule_save(Arc::clone(&chunk));
                }
                Ok(chunk)
            },
            Err(e) => {
                if attached {
                    entries.remove(&location);
                }
                self.counters
                    .generation_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("{e}");
                Err(e)
            },
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("generator panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("generator panicked: {message}")
    } else {
        "generator panicked".to_owned()
    }
}

/// Bounded, concurrency-safe cache of chunks keyed by location.
///
/// Lookups never wait for generation or saving. Single-key operations on the
/// same location are linearized by the store lock; bulk operations hold it for
/// their whole sweep.
pub struct ChunkCache {
    store: Arc<Store>,
    camera: Arc<RwLock<Camera>>,
}

impl ChunkCache {
    /// Creates a cache on the current tokio runtime.
    pub fn new(
        config: &CacheConfig,
        camera: Arc<RwLock<Camera>>,
        generator: impl ChunkGenerator,
        persistor: impl ChunkPersistor,
    ) -> WorldResult<Self> {
        let runtime = Handle::try_current().map_err(|_| WorldError::NoRuntime)?;
        Ok(Self::with_runtime(
            config,
            camera,
            Arc::new(generator),
            Arc::new(persistor),
            runtime,
        ))
    }

    /// Creates a cache spawning its work on `runtime`.
    #[must_use]
    pub fn with_runtime(
        config: &CacheConfig,
        camera: Arc<RwLock<Camera>>,
        generator: Arc<dyn ChunkGenerator>,
        persistor: Arc<dyn ChunkPersistor>,
        runtime: Handle,
    ) -> Self {
        let max_resident = config.max_resident.max(1);
        Self {
            store: Arc::new(Store {
                entries: RwLock::new(AHashMap::with_capacity(max_resident)),
                saves: Mutex::new(AHashMap::new()),
                generator,
                persistor,
                runtime,
                max_resident,
                clock: AtomicU64::new(0),
                next_ticket: AtomicU64::new(0),
                next_save: AtomicU64::new(0),
                counters: Counters::default(),
            }),
            camera,
        }
    }

    /// Gets a chunk, starting its generation if it is not resident.
    ///
    /// Returns immediately. Concurrent calls for one location share a single
    /// generation.
    pub fn get(&self, location: Location) -> ChunkHandle {
        if let Some(handle) = self.get_soft(location) {
            return handle;
        }

        let mut entries = self.store.entries.write();
        if let Some(entry) = entries.get(&location) {
            entry.touch(self.store.tick());
            self.store.counters.hits.fetch_add(1, Ordering::Relaxed);
            return entry.handle.clone();
        }

        self.store.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.store.make_room(&mut entries);

        let ticket = self.store.next_ticket.fetch_add(1, Ordering::Relaxed);
        let handle = self.spawn_population(location, ticket);
        entries.insert(
            location,
            Entry {
                ticket,
                state: EntryState::Pending,
                handle: handle.clone(),
                last_access: AtomicU64::new(self.store.tick()),
                hits: AtomicU32::new(0),
            },
        );
        handle
    }

    /// Spawns generation for a freshly registered entry.
    ///
    /// Must be called with the write lock held, so the task cannot install
    /// its result before the entry exists. Generation waits for any save of
    /// the same location still in flight.
    fn spawn_population(&self, location: Location, ticket: u64) -> ChunkHandle {
        let earlier_save = self.store.save_in_flight(location);
        let store = Arc::clone(&self.store);
        let task = self.store.runtime.spawn(async move {
            if let Some(save) = earlier_save {
                save.await;
            }
            let runtime = store.runtime.clone();
            runtime
                .spawn_blocking(move || store.populate(location, ticket))
                .await
        });
        let inner = async move {
            task.await.and_then(|joined| joined).unwrap_or_else(|e| {
                Err(WorldError::generation(
                    location,
                    format!("generation task failed: {e}"),
                ))
            })
        }
        .boxed()
        .shared();
        ChunkHandle { location, inner }
    }

    /// Gets a chunk only if it is already resident (pending or ready).
    ///
    /// Never starts a generation and never waits for one.
    pub fn get_soft(&self, location: Location) -> Option<ChunkHandle> {
        let entries = self.store.entries.read();
        let entry = entries.get(&location)?;
        entry.touch(self.store.tick());
        self.store.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.handle.clone())
    }

    /// Gets many chunks, lazily and in input order.
    pub fn get_many<'a, I>(&'a self, locations: I) -> impl Iterator<Item = ChunkHandle> + 'a
    where
        I: IntoIterator<Item = Location>,
        I::IntoIter: 'a,
    {
        locations.into_iter().map(move |location| self.get(location))
    }

    /// Gets every chunk covering a pixel-space area (plus a one-chunk margin).
    pub fn get_chunks_in_area(&self, area: &PixelRect) -> impl Iterator<Item = ChunkHandle> + '_ {
        self.get_many(area_to_chunk_range(area))
    }

    /// Requests every chunk covering `area` and returns the ones already ready.
    ///
    /// Missing chunks start generating and show up on a later call.
    pub fn ready_chunks_in_area(&self, area: &PixelRect) -> Vec<Arc<Chunk>> {
        self.get_chunks_in_area(area)
            .filter_map(|handle| handle.ready())
            .collect()
    }

    /// Pixel-space area currently visible through the cache's camera.
    pub fn visible_area(&self) -> PixelRect {
        viewable_area(&self.camera.read())
    }

    /// Ready chunks in the camera's view; see [`Self::ready_chunks_in_area`].
    pub fn ready_chunks_in_view(&self) -> Vec<Arc<Chunk>> {
        let area = self.visible_area();
        self.ready_chunks_in_area(&area)
    }

    /// Saves every ready chunk, in location order.
    ///
    /// Holds the store's read lock for the sweep: lookups of resident chunks
    /// continue, but nothing is inserted or removed. A failing chunk does not
    /// stop the sweep; failures are reported together at the end.
    pub fn save_all(&self) -> WorldResult<usize> {
        let entries = self.store.entries.read();
        let mut ready: Vec<(Location, Arc<Chunk>)> = entries
            .iter()
            .filter_map(|(location, entry)| match &entry.state {
                EntryState::Ready(chunk) => Some((*location, Arc::clone(chunk))),
                EntryState::Pending => None,
            })
            .collect();
        ready.sort_unstable_by_key(|(location, _)| *location);

        let mut saved = 0;
        let mut failed = Vec::new();
        for (location, chunk) in ready {
            match chunk.save_with(self.store.persistor.as_ref()) {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!("Failed to save chunk {location}: {e}");
                    failed.push(location);
                },
            }
        }
        drop(entries);

        info!("Saved {saved} chunks");
        if failed.is_empty() {
            Ok(saved)
        } else {
            Err(WorldError::SaveSweepFailed { saved, failed })
        }
    }

    /// Saves one chunk.
    ///
    /// Residency is checked now: if the chunk is absent the returned future
    /// resolves to [`WorldError::ChunkNotFound`] without waiting. Otherwise it
    /// waits for the chunk to be ready and persists a snapshot of it.
    pub fn save_chunk(
        &self,
        location: Location,
    ) -> impl Future<Output = WorldResult<()>> + Send + 'static {
        let handle = self.get_soft(location);
        let persistor = Arc::clone(&self.store.persistor);
        let runtime = self.store.runtime.clone();
        async move {
            let handle = handle.ok_or(WorldError::not_found(location))?;
            let chunk = handle.await?;
            runtime
                .spawn_blocking(move || chunk.save_with(persistor.as_ref()))
                .await
                .unwrap_or_else(|e| {
                    Err(WorldError::persist(location, format!("save task failed: {e}")))
                })
        }
    }

    /// Removes a chunk, scheduling its save if it is ready.
    ///
    /// A pending chunk is detached: its generation finishes, saves once and
    /// is discarded. Returns whether the chunk was resident.
    pub fn unload_chunk(&self, location: Location) -> bool {
        let mut entries = self.store.entries.write();
        match entries.remove(&location) {
            Some(entry) => {
                self.store.remove_entry(location, entry);
                true
            },
            None => false,
        }
    }

    /// Removes every chunk, scheduling a save of each ready one.
    ///
    /// Pending chunks are detached like in [`Self::unload_chunk`]. Returns the
    /// number of entries removed.
    pub fn unload_all(&self) -> usize {
        let mut entries = self.store.entries.write();
        let mut drained: Vec<(Location, Entry)> = entries.drain().collect();
        drained.sort_unstable_by_key(|(location, _)| *location);

        let removed = drained.len();
        for (location, entry) in drained {
            self.store.remove_entry(location, entry);
        }
        entries.shrink_to_fit();
        drop(entries);

        if removed > 0 {
            info!("Unloaded {removed} chunks");
        }
        removed
    }

    /// Waits for every save scheduled so far to finish.
    ///
    /// Saves of detached generations are scheduled when the generation
    /// finishes, so they are only covered once it has.
    pub async fn flush(&self) {
        let scheduled: Vec<SaveDone> = self
            .store
            .saves
            .lock()
            .values()
            .map(|save| save.done.clone())
            .collect();
        join_all(scheduled).await;
    }

    /// Makes this cache the active world of `context`.
    ///
    /// Returns the previously active world, if any.
    pub fn load(self: &Arc<Self>, context: &WorldContext) -> Option<Arc<Self>> {
        info!("Loading world");
        context.set_current(Arc::clone(self))
    }

    /// Unloads every chunk and, if this cache is the active world of
    /// `context`, clears it.
    pub fn unload(&self, context: &WorldContext) -> usize {
        let removed = self.unload_all();
        if context.clear_if(self) {
            info!("Unloaded world");
        }
        removed
    }

    /// Checks whether a location is resident.
    pub fn contains(&self, location: Location) -> bool {
        self.store.entries.read().contains_key(&location)
    }

    /// Checks whether a location is resident and ready.
    pub fn is_ready(&self, location: Location) -> bool {
        self.store
            .entries
            .read()
            .get(&location)
            .is_some_and(|entry| !entry.is_pending())
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.store.entries.read().len()
    }

    /// Checks whether nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.store.entries.read().is_empty()
    }

    /// Maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.store.max_resident
    }

    /// Resident locations, sorted.
    pub fn resident_locations(&self) -> Vec<Location> {
        let mut locations: Vec<_> = self.store.entries.read().keys().copied().collect();
        locations.sort_unstable();
        locations
    }

    /// The camera used for default view areas.
    pub fn camera(&self) -> &Arc<RwLock<Camera>> {
        &self.camera
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.store.entries.read();
        let counters = &self.store.counters;
        CacheStats {
            resident: entries.len(),
            pending: entries.values().filter(|e| e.is_pending()).count(),
            saves_in_flight: self.store.saves.lock().len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            generated: counters.generated.load(Ordering::Relaxed),
            generation_failures: counters.generation_failures.load(Ordering::Relaxed),
            evicted: counters.evicted.load(Ordering::Relaxed),
            saved_on_removal: counters.saved_on_removal.load(Ordering::Relaxed),
            persist_failures: counters.persist_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("resident", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{MemoryPersistor, NullPersistor};
    use ahash::AHashSet;
    use futures::future::join_all;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Empty chunks, counting calls. Can be slowed down and made to fail.
    #[derive(Clone, Default)]
    struct TestGenerator {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        failing: Arc<Mutex<AHashSet<Location>>>,
    }

    impl TestGenerator {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChunkGenerator for TestGenerator {
        fn generate(&self, location: Location) -> WorldResult<Chunk> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.failing.lock().contains(&location) {
                return Err(WorldError::generation(location, "injected failure"));
            }
            Ok(Chunk::new(location))
        }
    }

    /// Records saves after a fixed delay.
    struct SlowPersistor {
        delay: Duration,
        inner: Arc<MemoryPersistor>,
    }

    impl ChunkPersistor for SlowPersistor {
        fn persist(&self, chunk: &Chunk) -> WorldResult<()> {
            std::thread::sleep(self.delay);
            self.inner.persist(chunk)
        }
    }

    fn camera() -> Arc<RwLock<Camera>> {
        Arc::new(RwLock::new(Camera::default()))
    }

    fn cache_with(
        max_resident: usize,
        generator: impl ChunkGenerator,
        persistor: &Arc<MemoryPersistor>,
    ) -> ChunkCache {
        ChunkCache::new(
            &CacheConfig { max_resident },
            camera(),
            generator,
            Arc::clone(persistor),
        )
        .expect("no runtime")
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = ChunkCache::new(
            &CacheConfig::default(),
            camera(),
            TestGenerator::default(),
            NullPersistor,
        );
        assert!(matches!(result, Err(WorldError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_generates_once() {
        let generator = TestGenerator::slow(Duration::from_millis(50));
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = Arc::new(cache_with(16, generator.clone(), &persistor));
        let location = Location::new(3, -2);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(location).await })
            })
            .collect();

        for result in join_all(tasks).await {
            let chunk = result.expect("task panicked").expect("generation failed");
            assert_eq!(chunk.location(), location);
        }
        assert_eq!(generator.calls(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_ready(location));

        // A hit on a ready chunk resolves immediately.
        assert!(cache.get(location).ready().is_some());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_returns_before_generation() {
        let generator = TestGenerator::slow(Duration::from_millis(200));
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator, &persistor);
        let location = Location::new(0, 0);

        let handle = cache.get(location);
        assert!(handle.try_get().is_none());
        assert!(cache.contains(location));
        assert!(!cache.is_ready(location));
        assert_eq!(cache.stats().pending, 1);

        let chunk = handle.clone().await.expect("generation failed");
        assert_eq!(chunk.location(), location);
        assert!(matches!(handle.try_get(), Some(Ok(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_soft_never_inserts() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator.clone(), &persistor);
        let location = Location::new(1, 1);

        assert!(cache.get_soft(location).is_none());
        assert!(cache.is_empty());
        assert_eq!(generator.calls(), 0);

        cache.get(location).await.expect("generation failed");
        let handle = cache.get_soft(location).expect("chunk should be resident");
        assert!(handle.ready().is_some());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_chunk_absent() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator.clone(), &persistor);
        let location = Location::new(5, 5);

        let result = cache.save_chunk(location).await;
        assert_eq!(result, Err(WorldError::not_found(location)));
        assert!(!cache.contains(location));
        assert_eq!(generator.calls(), 0);
        assert_eq!(persistor.total_saves(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_chunk_waits_for_pending() {
        let generator = TestGenerator::slow(Duration::from_millis(100));
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator, &persistor);
        let location = Location::new(-4, 2);

        let _handle = cache.get(location);
        cache.save_chunk(location).await.expect("save failed");
        assert_eq!(persistor.save_count(location), 1);
        assert!(cache.contains(location));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unload_chunk_saves_once() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator.clone(), &persistor);
        let location = Location::new(2, 7);

        cache.get(location).await.expect("generation failed");
        assert!(cache.unload_chunk(location));
        assert!(!cache.contains(location));
        cache.flush().await;
        assert_eq!(persistor.save_count(location), 1);

        assert!(!cache.unload_chunk(location));
        assert_eq!(persistor.save_count(location), 1);

        // Unloaded chunks are generated again on the next request.
        cache.get(location).await.expect("generation failed");
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unload_pending_detaches() {
        let generator = TestGenerator::slow(Duration::from_millis(150));
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator, &persistor);
        let location = Location::new(0, 3);

        let handle = cache.get(location);
        assert!(cache.unload_chunk(location));
        assert_eq!(persistor.save_count(location), 0);

        // The generation still completes and its holder gets the chunk.
        let chunk = handle.await.expect("generation failed");
        assert_eq!(chunk.location(), location);
        cache.flush().await;
        assert_eq!(persistor.save_count(location), 1);
        assert!(!cache.contains(location));
        assert_eq!(cache.stats().generated, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capacity_evicts_least_recently_used() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(4, generator, &persistor);
        let locations: Vec<_> = (0..4).map(|x| Location::new(x, 0)).collect();

        for handle in cache.get_many(locations.clone()).collect::<Vec<_>>() {
            handle.await.expect("generation failed");
        }
        assert_eq!(cache.len(), 4);

        // Touch the oldest so the next oldest becomes the victim.
        assert!(cache.get_soft(locations[0]).is_some());

        let newcomer = Location::new(10, 10);
        cache.get(newcomer).await.expect("generation failed");

        assert_eq!(cache.len(), 4);
        assert!(cache.contains(locations[0]));
        assert!(!cache.contains(locations[1]));
        assert!(cache.contains(newcomer));
        cache.flush().await;
        assert_eq!(persistor.save_count(locations[1]), 1);
        assert_eq!(persistor.total_saves(), 1);
        assert_eq!(cache.stats().evicted, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capacity_holds_under_load() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = Arc::new(cache_with(8, generator, &persistor));

        let tasks: Vec<_> = (0..4)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for i in 0..25 {
                        let location = Location::new(worker * 100 + i, i % 3);
                        let _ = cache.get(location).await;
                        assert!(cache.len() <= 8);
                    }
                })
            })
            .collect();
        for result in join_all(tasks).await {
            result.expect("task panicked");
        }

        assert!(cache.len() <= 8);
        let stats = cache.stats();
        assert_eq!(stats.misses, 100);
        assert_eq!(stats.evicted as usize, 100 - cache.len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generation_failure_is_retried() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator.clone(), &persistor);
        let location = Location::new(-1, -1);
        generator.failing.lock().insert(location);

        let result = cache.get(location).await;
        assert!(matches!(result, Err(WorldError::GenerationFailed { .. })));
        assert!(!cache.contains(location));
        assert_eq!(cache.stats().generation_failures, 1);

        generator.failing.lock().clear();
        cache.get(location).await.expect("retry failed");
        assert!(cache.is_ready(location));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generator_panic_is_reported() {
        let persistor = Arc::new(MemoryPersistor::new());
        let panicking = |_location: Location| -> WorldResult<Chunk> { panic!("terrain exploded") };
        let cache = cache_with(16, panicking, &persistor);
        let location = Location::new(0, 0);

        match cache.get(location).await {
            Err(WorldError::GenerationFailed { reason, .. }) => {
                assert!(reason.contains("terrain exploded"));
            },
            other => panic!("Expected generation failure, got {other:?}"),
        }
        assert!(!cache.contains(location));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_all_continues_past_failures() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator, &persistor);
        let locations = [Location::new(2, 0), Location::new(0, 0), Location::new(1, 0)];

        for handle in cache.get_many(locations).collect::<Vec<_>>() {
            handle.await.expect("generation failed");
        }
        persistor.fail_on(Location::new(1, 0));

        let result = cache.save_all();
        assert_eq!(
            result,
            Err(WorldError::SaveSweepFailed {
                saved: 2,
                failed: vec![Location::new(1, 0)],
            })
        );
        assert_eq!(persistor.history(), vec![Location::new(0, 0), Location::new(2, 0)]);

        persistor.clear_failure(Location::new(1, 0));
        assert_eq!(cache.save_all(), Ok(3));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_all_skips_pending() {
        let generator = TestGenerator::slow(Duration::from_millis(200));
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator, &persistor);

        let handle = cache.get(Location::new(0, 0));
        assert_eq!(cache.save_all(), Ok(0));
        handle.await.expect("generation failed");
        assert_eq!(cache.save_all(), Ok(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unload_all() {
        let generator = TestGenerator::slow(Duration::from_millis(100));
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, generator, &persistor);
        assert_eq!(cache.unload_all(), 0);

        let ready = Location::new(0, 0);
        cache.get(ready).await.expect("generation failed");
        let pending = Location::new(9, 9);
        let handle = cache.get(pending);

        assert_eq!(cache.unload_all(), 2);
        assert!(cache.is_empty());
        cache.flush().await;
        assert_eq!(persistor.save_count(ready), 1);

        handle.await.expect("generation failed");
        cache.flush().await;
        assert_eq!(persistor.save_count(pending), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_chunks_in_area_includes_margin() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(64, generator.clone(), &persistor);

        let area = PixelRect::new(0.0, 0.0, 1024.0, 1024.0);
        let handles: Vec<_> = cache.get_chunks_in_area(&area).collect();
        assert_eq!(handles.len(), 16);
        assert_eq!(handles[0].location(), Location::new(-1, -1));
        assert_eq!(handles[15].location(), Location::new(2, 2));

        for handle in handles {
            handle.await.expect("generation failed");
        }
        assert_eq!(cache.ready_chunks_in_area(&area).len(), 16);
        assert_eq!(generator.calls(), 16);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ready_chunks_in_view_follows_camera() {
        let generator = TestGenerator::default();
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(256, generator, &persistor);

        let area = cache.visible_area();
        for handle in cache.get_chunks_in_area(&area).collect::<Vec<_>>() {
            handle.await.expect("generation failed");
        }
        // 1280x720 around the origin spans 5x5 chunks with the margin.
        assert_eq!(cache.ready_chunks_in_view().len(), 25);

        cache
            .camera()
            .write()
            .center_on(glam::Vec2::new(100_000.0, 0.0));
        let far = cache.visible_area();
        assert!(far.x > 90_000.0);
        assert!(cache
            .ready_chunks_in_view()
            .iter()
            .all(|chunk| chunk.location().x > 50));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_world_context_lifecycle() {
        let persistor = Arc::new(MemoryPersistor::new());
        let context = WorldContext::new();
        let first = Arc::new(cache_with(16, TestGenerator::default(), &persistor));
        let second = Arc::new(cache_with(16, TestGenerator::default(), &persistor));

        assert!(first.load(&context).is_none());
        assert!(context.is_current(&first));

        let location = Location::new(4, 4);
        let chunk = first.get(location).await.expect("generation failed");
        assert!(chunk.unload(&context));
        assert!(!first.contains(location));
        first.flush().await;
        assert_eq!(persistor.save_count(location), 1);

        let previous = second.load(&context).expect("first world was active");
        assert!(Arc::ptr_eq(&previous, &first));

        // Unloading a world that is not active leaves the context alone.
        first.unload(&context);
        assert!(context.is_current(&second));

        second.get(location).await.expect("generation failed");
        assert_eq!(second.unload(&context), 1);
        assert!(context.current().is_none());
        assert!(!context.unload_chunk(location));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_eviction_save_does_not_block_get() {
        let saves = Arc::new(MemoryPersistor::new());
        let persistor = SlowPersistor {
            delay: Duration::from_millis(400),
            inner: Arc::clone(&saves),
        };
        let cache = ChunkCache::new(
            &CacheConfig { max_resident: 1 },
            camera(),
            TestGenerator::default(),
            persistor,
        )
        .expect("no runtime");
        let first = Location::new(0, 0);
        let second = Location::new(1, 0);
        cache.get(first).await.expect("generation failed");

        let started = Instant::now();
        let handle = cache.get(second);
        assert!(cache.get_soft(second).is_some());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(!cache.contains(first));
        assert_eq!(saves.save_count(first), 0);
        assert_eq!(cache.stats().saves_in_flight, 1);

        handle.await.expect("generation failed");
        cache.flush().await;
        assert_eq!(saves.save_count(first), 1);
        assert_eq!(cache.stats().saves_in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_regeneration_waits_for_eviction_save() {
        let generator = TestGenerator::default();
        let saves = Arc::new(MemoryPersistor::new());
        let persistor = SlowPersistor {
            delay: Duration::from_millis(200),
            inner: Arc::clone(&saves),
        };
        let cache = ChunkCache::new(
            &CacheConfig { max_resident: 1 },
            camera(),
            generator.clone(),
            persistor,
        )
        .expect("no runtime");
        let location = Location::new(3, 3);

        cache.get(location).await.expect("generation failed");
        let _evicting = cache.get(Location::new(4, 3));
        assert_eq!(saves.save_count(location), 0);

        // The evicted copy reaches the persistor before the new one exists.
        cache.get(location).await.expect("generation failed");
        assert_eq!(saves.save_count(location), 1);
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_eviction_persist_failure_frees_slot() {
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(1, TestGenerator::default(), &persistor);
        let first = Location::new(0, 0);
        persistor.fail_on(first);

        cache.get(first).await.expect("generation failed");
        cache
            .get(Location::new(1, 0))
            .await
            .expect("generation failed");
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(first));

        cache.flush().await;
        let stats = cache.stats();
        assert_eq!(stats.persist_failures, 1);
        assert_eq!(stats.saved_on_removal, 0);
        assert_eq!(stats.evicted, 1);
        assert_eq!(persistor.save_count(first), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_chunk_persist_failure() {
        let persistor = Arc::new(MemoryPersistor::new());
        let cache = cache_with(16, TestGenerator::default(), &persistor);
        let location = Location::new(1, 0);

        cache.get(location).await.expect("generation failed");
        persistor.fail_on(location);
        assert_eq!(
            cache.save_chunk(location).await,
            Err(WorldError::persist(location, "injected failure"))
        );
        assert!(cache.contains(location));

        persistor.clear_failure(location);
        assert_eq!(cache.save_chunk(location).await, Ok(()));
        assert_eq!(persistor.save_count(location), 1);
    }
}
