//! Tile descriptors and the registry that owns them.
//!
//! Tiles are shared and immutable. Chunks never own a tile; each grid cell
//! either is empty or holds a reference-counted handle into the registry.

use std::sync::Arc;

use ahash::AHashMap;

/// Tile flag: the tile is never drawn.
pub const INVISIBLE_FLAG: u32 = 0b1;

/// Name of the fallback tile used for unknown ids.
pub const UNKNOWN_TILE: &str = "unknown";
/// Name of the invisible air tile.
pub const AIR_TILE: &str = "air";
/// Name of the solid test tile.
pub const TEST_SOLID_TILE: &str = "test_solid";
/// Name of the grass surface tile.
pub const GRASS_TILE: &str = "grass";
/// Name of the dirt tile.
pub const DIRT_TILE: &str = "dirt";
/// Name of the stone tile.
pub const STONE_TILE: &str = "stone";

/// Shared, immutable tile descriptor.
#[derive(Debug, PartialEq, Eq)]
pub struct Tile {
    id: u16,
    name: String,
    texture: String,
    flags: u32,
}

impl Tile {
    /// Registry-assigned id.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Tile name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the texture region used to draw this tile.
    #[must_use]
    pub fn texture(&self) -> &str {
        &self.texture
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether the tile is drawn at all.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.flags & INVISIBLE_FLAG != INVISIBLE_FLAG
    }
}

/// One cell of a chunk's tile grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cell {
    /// Nothing here (air).
    #[default]
    Empty,
    /// A tile from the registry.
    Tile(Arc<Tile>),
}

impl Cell {
    /// Checks whether the cell holds no tile.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The tile in this cell, if any.
    #[must_use]
    pub fn tile(&self) -> Option<&Arc<Tile>> {
        match self {
            Self::Empty => None,
            Self::Tile(tile) => Some(tile),
        }
    }

    /// Whether the cell should be drawn.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.tile().is_some_and(|tile| tile.is_visible())
    }

    /// Compact id used by the chunk file format (0 = empty).
    #[must_use]
    pub fn raw_id(&self) -> u16 {
        self.tile().map_or(0, |tile| tile.id() + 1)
    }
}

/// Owns every tile descriptor, addressable by name or id.
#[derive(Debug)]
pub struct TileRegistry {
    tiles: Vec<Arc<Tile>>,
    by_name: AHashMap<String, u16>,
}

impl TileRegistry {
    /// Creates a registry holding only the unknown tile.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            tiles: Vec::new(),
            by_name: AHashMap::new(),
        };
        registry.register(UNKNOWN_TILE, "unknown_texture", 0);
        registry
    }

    /// Creates a registry with the built-in terrain tiles.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AIR_TILE, "unknown_texture", INVISIBLE_FLAG);
        registry.register(TEST_SOLID_TILE, "test_solid", 0);
        registry.register(GRASS_TILE, "grass", 0);
        registry.register(DIRT_TILE, "dirt", 0);
        registry.register(STONE_TILE, "stone", 0);
        registry
    }

    /// Registers a tile, returning the existing descriptor if the name is taken.
    pub fn register(&mut self, name: &str, texture: &str, flags: u32) -> Arc<Tile> {
        if let Some(&id) = self.by_name.get(name) {
            return Arc::clone(&self.tiles[id as usize]);
        }
        let id = self.tiles.len() as u16;
        let tile = Arc::new(Tile {
            id,
            name: name.to_owned(),
            texture: texture.to_owned(),
            flags,
        });
        self.tiles.push(Arc::clone(&tile));
        self.by_name.insert(name.to_owned(), id);
        tile
    }

    /// Looks up a tile by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Tile>> {
        self.by_name
            .get(name)
            .map(|&id| Arc::clone(&self.tiles[id as usize]))
    }

    /// Looks up a tile by id.
    #[must_use]
    pub fn by_id(&self, id: u16) -> Option<Arc<Tile>> {
        self.tiles.get(id as usize).cloned()
    }

    /// Looks up a tile by name, falling back to the unknown tile.
    #[must_use]
    pub fn get_or_unknown(&self, name: &str) -> Arc<Tile> {
        self.get(name).unwrap_or_else(|| self.unknown())
    }

    /// The unknown tile.
    #[must_use]
    pub fn unknown(&self) -> Arc<Tile> {
        Arc::clone(&self.tiles[0])
    }

    /// Decodes a cell from its compact file id.
    ///
    /// Ids that no longer exist decode to the unknown tile.
    #[must_use]
    pub fn cell_from_raw(&self, raw: u16) -> Cell {
        match raw {
            0 => Cell::Empty,
            id => Cell::Tile(self.by_id(id - 1).unwrap_or_else(|| self.unknown())),
        }
    }

    /// Number of registered tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Always false; the unknown tile is registered on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl Default for TileRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
