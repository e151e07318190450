//! Chunk data structure and serialization.

use serde::{Deserialize, Serialize};
use strata_common::{Location, MagicBytes, PixelRect, SchemaVersion, CHUNK_SIZE};
use thiserror::Error;

use crate::context::WorldContext;
use crate::tile::{Cell, TileRegistry};

/// Number of cells in a chunk.
pub const CELLS_PER_CHUNK: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Chunk file errors.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    /// Deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    /// Invalid magic bytes
    #[error("Invalid chunk format")]
    InvalidFormat,
    /// Version mismatch
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version
        actual: String,
    },
    /// Compression failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
}

/// Result type for chunk file operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Chunk header for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Chunk X location
    pub x: i32,
    /// Chunk Y location
    pub y: i32,
    /// Chunk size in tiles
    pub size: u32,
}

impl ChunkHeader {
    /// Creates a new header.
    #[must_use]
    pub fn new(location: Location) -> Self {
        Self {
            magic: MagicBytes::CHUNK.0,
            version: SchemaVersion::CHUNK_FILE,
            x: location.x,
            y: location.y,
            size: CHUNK_SIZE as u32,
        }
    }

    /// Validates the header.
    pub fn validate(&self) -> ChunkResult<()> {
        if self.magic != MagicBytes::CHUNK.0 {
            return Err(ChunkError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_FILE.can_read(&self.version) {
            return Err(ChunkError::VersionMismatch {
                expected: SchemaVersion::CHUNK_FILE.to_string(),
                actual: self.version.to_string(),
            });
        }
        if self.size != CHUNK_SIZE as u32 {
            return Err(ChunkError::DeserializationFailed(format!(
                "chunk size {} (expected {CHUNK_SIZE})",
                self.size
            )));
        }
        Ok(())
    }
}

/// A square region of the tile grid.
///
/// Cells are stored row by row: index `y * CHUNK_SIZE + x`, with `y = 0` at
/// the bottom of the chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    location: Location,
    bounds: PixelRect,
    cells: Vec<Cell>,
    /// Background tint, only used for drawing.
    color: [f32; 4],
}

impl Chunk {
    /// Creates a chunk with every cell empty.
    #[must_use]
    pub fn new(location: Location) -> Self {
        Self {
            location,
            bounds: location.pixel_bounds(),
            cells: vec![Cell::Empty; CELLS_PER_CHUNK],
            color: [fastrand::f32(), fastrand::f32(), fastrand::f32(), 1.0],
        }
    }

    /// Creates a chunk by evaluating `fill` for every local `(x, y)`.
    #[must_use]
    pub fn from_fn(location: Location, mut fill: impl FnMut(u32, u32) -> Cell) -> Self {
        let mut chunk = Self::new(location);
        let size = CHUNK_SIZE as u32;
        for y in 0..size {
            for x in 0..size {
                chunk.cells[Self::index(x, y)] = fill(x, y);
            }
        }
        chunk
    }

    const fn index(x: u32, y: u32) -> usize {
        (y as usize) * (CHUNK_SIZE as usize) + (x as usize)
    }

    /// Returns the chunk location.
    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    /// Returns the pixel bounds of the chunk.
    #[must_use]
    pub const fn bounds(&self) -> PixelRect {
        self.bounds
    }

    /// Returns the background tint.
    #[must_use]
    pub const fn color(&self) -> [f32; 4] {
        self.color
    }

    /// Gets a cell at local coordinates.
    #[must_use]
    pub fn cell(&self, x: u32, y: u32) -> Option<&Cell> {
        if x >= CHUNK_SIZE as u32 || y >= CHUNK_SIZE as u32 {
            return None;
        }
        self.cells.get(Self::index(x, y))
    }

    /// Sets a cell at local coordinates.
    pub fn set_cell(&mut self, x: u32, y: u32, cell: Cell) -> bool {
        if x >= CHUNK_SIZE as u32 || y >= CHUNK_SIZE as u32 {
            return false;
        }
        self.cells[Self::index(x, y)] = cell;
        true
    }

    /// Returns a slice of all cells.
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Number of non-empty cells.
    #[must_use]
    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    /// Iterates visible cells with their pixel position (bottom-left corner).
    pub fn visible_tiles(&self) -> impl Iterator<Item = (f32, f32, &Cell)> + '_ {
        let tile = self.bounds.width / CHUNK_SIZE as f32;
        self.cells.iter().enumerate().filter_map(move |(i, cell)| {
            if !cell.is_visible() {
                return None;
            }
            let x = (i % CHUNK_SIZE as usize) as f32;
            let y = (i / CHUNK_SIZE as usize) as f32;
            Some((self.bounds.x + x * tile, self.bounds.y + y * tile, cell))
        })
    }

    /// Asks the active world in `context` to unload this chunk.
    ///
    /// Returns false when no world is active or the chunk is not resident.
    pub fn unload(&self, context: &WorldContext) -> bool {
        context.unload_chunk(self.location)
    }

    /// Serializes the chunk to bytes.
    pub fn serialize(&self) -> ChunkResult<Vec<u8>> {
        let header = ChunkHeader::new(self.location);

        let header_bytes = bincode::serialize(&header)
            .map_err(|e| ChunkError::SerializationFailed(e.to_string()))?;

        let cell_bytes: Vec<u8> = self
            .cells
            .iter()
            .flat_map(|c| c.raw_id().to_le_bytes())
            .collect();
        let compressed = lz4_flex::compress_prepend_size(&cell_bytes);

        // Layout: header length, header, compressed cell ids
        let mut result = Vec::with_capacity(header_bytes.len() + compressed.len() + 4);
        result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        result.extend_from_slice(&header_bytes);
        result.extend_from_slice(&compressed);

        Ok(result)
    }

    /// Deserializes a chunk from bytes, resolving tiles through `registry`.
    pub fn deserialize(bytes: &[u8], registry: &TileRegistry) -> ChunkResult<Self> {
        if bytes.len() < 8 {
            return Err(ChunkError::DeserializationFailed("data too short".into()));
        }

        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + header_len {
            return Err(ChunkError::DeserializationFailed(
                "header length mismatch".into(),
            ));
        }

        let header: ChunkHeader = bincode::deserialize(&bytes[4..4 + header_len])
            .map_err(|e| ChunkError::DeserializationFailed(e.to_string()))?;
        header.validate()?;

        let compressed = &bytes[4 + header_len..];
        let cell_bytes = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| ChunkError::CompressionFailed(e.to_string()))?;
        if cell_bytes.len() != CELLS_PER_CHUNK * 2 {
            return Err(ChunkError::DeserializationFailed(
                "cell data size mismatch".into(),
            ));
        }

        let mut chunk = Self::new(Location::new(header.x, header.y));
        for (slot, raw) in chunk.cells.iter_mut().zip(cell_bytes.chunks_exact(2)) {
            *slot = registry.cell_from_raw(u16::from_le_bytes([raw[0], raw[1]]));
        }
        Ok(chunk)
    }
}
