//! Procedural chunk generation.

use std::sync::Arc;

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};
use strata_common::{Location, WorldResult, CHUNK_SIZE};

use crate::chunk::Chunk;
use crate::persist::DiskPersistor;
use crate::tile::{Cell, Tile, TileRegistry, DIRT_TILE, GRASS_TILE, STONE_TILE, TEST_SOLID_TILE};

/// Produces the content of a chunk.
///
/// Must be a pure function of the location plus the generator's own
/// parameters, and safe to call concurrently for distinct locations.
/// Generation may be slow; the cache runs it off the async workers.
pub trait ChunkGenerator: Send + Sync + 'static {
    /// Generates the fully populated chunk at `location`.
    fn generate(&self, location: Location) -> WorldResult<Chunk>;
}

impl<F> ChunkGenerator for F
where
    F: Fn(Location) -> WorldResult<Chunk> + Send + Sync + 'static,
{
    fn generate(&self, location: Location) -> WorldResult<Chunk> {
        self(location)
    }
}

/// Rolling hills from a sine wave over the world's tile columns.
///
/// Column `rx` has surface height `trunc(sin(rx / wavelength) * amplitude)`;
/// every tile at or below it is solid.
#[derive(Debug, Clone)]
pub struct SineTerrainGenerator {
    solid: Arc<Tile>,
    wavelength: f64,
    amplitude: f64,
}

impl SineTerrainGenerator {
    /// Default wavelength in tiles.
    pub const WAVELENGTH: f64 = 50.0;
    /// Default amplitude in tiles.
    pub const AMPLITUDE: f64 = 50.0;

    /// Creates a generator filling terrain with the solid test tile.
    #[must_use]
    pub fn new(registry: &TileRegistry) -> Self {
        Self::with_tile(registry.get_or_unknown(TEST_SOLID_TILE))
    }

    /// Creates a generator filling terrain with `solid`.
    #[must_use]
    pub fn with_tile(solid: Arc<Tile>) -> Self {
        Self {
            solid,
            wavelength: Self::WAVELENGTH,
            amplitude: Self::AMPLITUDE,
        }
    }

    /// Surface height (in tiles) of world column `rx`.
    #[must_use]
    pub fn height(&self, rx: i64) -> i64 {
        ((rx as f64 / self.wavelength).sin() * self.amplitude) as i64
    }
}

impl ChunkGenerator for SineTerrainGenerator {
    fn generate(&self, location: Location) -> WorldResult<Chunk> {
        let (origin_x, origin_y) = location.tile_origin();
        let heights: Vec<i64> = (0..i64::from(CHUNK_SIZE))
            .map(|x| self.height(origin_x + x))
            .collect();
        Ok(Chunk::from_fn(location, |x, y| {
            if origin_y + i64::from(y) <= heights[x as usize] {
                Cell::Tile(Arc::clone(&self.solid))
            } else {
                Cell::Empty
            }
        }))
    }
}

/// Noise terrain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// World seed
    pub seed: u32,
    /// Terrain scale (larger = smoother)
    pub terrain_scale: f64,
    /// Height scale in tiles
    pub height_scale: f64,
    /// Depth of the dirt layer below the grass
    pub dirt_depth: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            terrain_scale: 100.0,
            height_scale: 50.0,
            dirt_depth: 4,
        }
    }
}

/// Layered hills from Perlin noise: grass on the surface, a dirt band, then
/// stone.
pub struct NoiseTerrainGenerator {
    config: GeneratorConfig,
    terrain_noise: Perlin,
    detail_noise: Perlin,
    grass: Arc<Tile>,
    dirt: Arc<Tile>,
    stone: Arc<Tile>,
}

impl NoiseTerrainGenerator {
    /// Creates a generator with the given config.
    #[must_use]
    pub fn new(config: GeneratorConfig, registry: &TileRegistry) -> Self {
        let terrain_noise = Perlin::new(config.seed);
        let detail_noise = Perlin::new(config.seed.wrapping_add(1));

        Self {
            config,
            terrain_noise,
            detail_noise,
            grass: registry.get_or_unknown(GRASS_TILE),
            dirt: registry.get_or_unknown(DIRT_TILE),
            stone: registry.get_or_unknown(STONE_TILE),
        }
    }

    /// Creates a generator with default config and the given seed.
    #[must_use]
    pub fn with_seed(seed: u32, registry: &TileRegistry) -> Self {
        Self::new(
            GeneratorConfig {
                seed,
                ..Default::default()
            },
            registry,
        )
    }

    /// Surface height (in tiles) of world column `rx`.
    #[must_use]
    pub fn height(&self, rx: i64) -> i64 {
        let wx = rx as f64 / self.config.terrain_scale;
        let height = self.terrain_noise.get([wx, 0.0]);
        let detail = self.detail_noise.get([wx * 4.0, 0.5]) * 0.1;
        ((height + detail) * self.config.height_scale) as i64
    }

    fn cell_at(&self, depth: i64) -> Cell {
        match depth {
            d if d < 0 => Cell::Empty,
            0 => Cell::Tile(Arc::clone(&self.grass)),
            d if d <= self.config.dirt_depth => Cell::Tile(Arc::clone(&self.dirt)),
            _ => Cell::Tile(Arc::clone(&self.stone)),
        }
    }

    /// Returns the generator configuration.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl ChunkGenerator for NoiseTerrainGenerator {
    fn generate(&self, location: Location) -> WorldResult<Chunk> {
        let (origin_x, origin_y) = location.tile_origin();
        let heights: Vec<i64> = (0..i64::from(CHUNK_SIZE))
            .map(|x| self.height(origin_x + x))
            .collect();
        Ok(Chunk::from_fn(location, |x, y| {
            self.cell_at(heights[x as usize] - (origin_y + i64::from(y)))
        }))
    }
}

/// Loads previously saved chunks, generating the rest with `fallback`.
pub struct StoredTerrainGenerator<G> {
    store: DiskPersistor,
    registry: Arc<TileRegistry>,
    fallback: G,
}

impl<G: ChunkGenerator> StoredTerrainGenerator<G> {
    /// Creates a generator reading from `store`.
    #[must_use]
    pub fn new(store: DiskPersistor, registry: Arc<TileRegistry>, fallback: G) -> Self {
        Self {
            store,
            registry,
            fallback,
        }
    }
}

impl<G: ChunkGenerator> ChunkGenerator for StoredTerrainGenerator<G> {
    fn generate(&self, location: Location) -> WorldResult<Chunk> {
        match self.store.load(location, &self.registry)? {
            Some(chunk) => Ok(chunk),
            None => self.fallback.generate(location),
        }
    }
}
