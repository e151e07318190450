//! Application lifecycle.
//!
//! Builds a world from the configuration, pans the camera across it for a
//! number of frames while collecting the chunks in view, then saves and
//! unloads it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use glam::Vec2;
use parking_lot::RwLock;
use strata_common::WorldError;
use strata_world::{
    area_to_chunk_range, CacheStats, Camera, ChunkCache, ChunkGenerator, ChunkPersistor,
    DiskPersistor, NoiseTerrainGenerator, NullPersistor, SineTerrainGenerator,
    StoredTerrainGenerator, TileRegistry, WorldContext,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, TerrainKind};

/// Frames between progress lines.
const REPORT_INTERVAL: u32 = 60;

/// What a run did.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Frames simulated
    pub frames: u32,
    /// Most ready chunks seen in a single frame
    pub peak_ready: usize,
    /// Chunks written by the final save
    pub saved: usize,
    /// Chunks removed by the final unload
    pub unloaded: usize,
    /// Cache counters just before shutdown
    pub stats: CacheStats,
}

/// Builds the terrain generator, reading saved chunks first when persisting.
fn build_generator(config: &AppConfig, registry: &Arc<TileRegistry>) -> Arc<dyn ChunkGenerator> {
    fn stored<G: ChunkGenerator>(
        config: &AppConfig,
        registry: &Arc<TileRegistry>,
        generator: G,
    ) -> Arc<dyn ChunkGenerator> {
        if config.persist_to_disk {
            Arc::new(StoredTerrainGenerator::new(
                DiskPersistor::new(&config.save_dir),
                Arc::clone(registry),
                generator,
            ))
        } else {
            Arc::new(generator)
        }
    }

    match config.terrain {
        TerrainKind::Sine => stored(config, registry, SineTerrainGenerator::new(registry)),
        TerrainKind::Noise => stored(
            config,
            registry,
            NoiseTerrainGenerator::with_seed(config.world_seed, registry),
        ),
    }
}

fn build_persistor(config: &AppConfig) -> Arc<dyn ChunkPersistor> {
    if config.persist_to_disk {
        info!("Saving chunks to {}", config.save_dir.display());
        Arc::new(DiskPersistor::new(&config.save_dir))
    } else {
        Arc::new(NullPersistor)
    }
}

/// Runs the scripted pan on the current runtime.
pub async fn run(config: &AppConfig) -> Result<RunSummary> {
    let runtime = Handle::try_current().context("Strata must run inside a tokio runtime")?;
    let registry = Arc::new(TileRegistry::with_defaults());

    let mut camera = Camera::new(config.viewport_width, config.viewport_height);
    camera.set_zoom(config.camera_zoom);
    let camera = Arc::new(RwLock::new(camera));

    let world = Arc::new(ChunkCache::with_runtime(
        &config.cache(),
        Arc::clone(&camera),
        build_generator(config, &registry),
        build_persistor(config),
        runtime,
    ));
    let context = WorldContext::new();
    world.load(&context);

    let mut interval = tokio::time::interval(Duration::from_millis(config.frame_interval_ms));
    let mut peak_ready = 0;
    for frame in 0..config.frames {
        interval.tick().await;
        camera.write().translate(Vec2::new(config.pan_speed, 0.0));

        let ready = world.ready_chunks_in_view();
        let tiles: usize = ready.iter().map(|chunk| chunk.visible_tiles().count()).sum();
        peak_ready = peak_ready.max(ready.len());

        if frame % REPORT_INTERVAL == 0 {
            let wanted = area_to_chunk_range(&world.visible_area()).len();
            info!(
                "Frame {frame}: {}/{wanted} chunks ready, {tiles} tiles, {} resident",
                ready.len(),
                world.len()
            );
        } else {
            debug!("Frame {frame}: {} chunks ready", ready.len());
        }
    }

    let stats = world.stats();
    info!("Cache stats: {stats:?}");

    let saved = match world.save_all() {
        Ok(saved) => saved,
        Err(WorldError::SaveSweepFailed { saved, failed }) => {
            warn!("{} chunks failed to save, first at {:?}", failed.len(), failed.first());
            saved
        },
        Err(e) => return Err(e.into()),
    };
    let unloaded = world.unload(&context);
    world.flush().await;

    Ok(RunSummary {
        frames: config.frames,
        peak_ready,
        saved,
        unloaded,
        stats,
    })
}
