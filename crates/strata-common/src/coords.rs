//! Coordinate types for chunk locations and pixel-space areas.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Number of tiles along one side of a chunk.
pub const CHUNK_SIZE: i32 = 64;

/// Number of pixels along one side of a tile.
pub const TILE_SIZE: i32 = 16;

/// Number of pixels along one side of a chunk.
pub const CHUNK_SIZE_PIXELS: i32 = CHUNK_SIZE * TILE_SIZE;

/// Chunk location (identifies a chunk in the chunk grid, not in pixels).
///
/// Ordering is row-major (y first, then x) so that sweeps over a set of
/// locations visit them in a stable order. Keying only relies on equality.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Pod,
    Zeroable,
)]
#[repr(C)]
pub struct Location {
    /// Y coordinate in chunk space
    pub y: i32,
    /// X coordinate in chunk space
    pub x: i32,
}

impl Location {
    /// Creates a new location.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { y, x }
    }

    /// Location of the chunk containing a tile position (in tile units).
    #[must_use]
    pub const fn from_tile(tile_x: i64, tile_y: i64) -> Self {
        let size = CHUNK_SIZE as i64;
        Self::new(tile_x.div_euclid(size) as i32, tile_y.div_euclid(size) as i32)
    }

    /// Returns the location offset by the given number of chunks.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Tile position of this chunk's bottom-left tile.
    #[must_use]
    pub const fn tile_origin(self) -> (i64, i64) {
        (
            (self.x as i64) * (CHUNK_SIZE as i64),
            (self.y as i64) * (CHUNK_SIZE as i64),
        )
    }

    /// Pixel bounds covered by this chunk.
    #[must_use]
    pub fn pixel_bounds(self) -> PixelRect {
        let size = CHUNK_SIZE_PIXELS as f32;
        PixelRect::new(self.x as f32 * size, self.y as f32 * size, size, size)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned rectangle in pixel space (min corner plus extent).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    /// Minimum X coordinate
    pub x: f32,
    /// Minimum Y coordinate
    pub y: f32,
    /// Width in pixels
    pub width: f32,
    /// Height in pixels
    pub height: f32,
}

impl PixelRect {
    /// Creates a new rectangle.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest rectangle containing every given point.
    ///
    /// Returns an empty rectangle at the origin when no points are given.
    #[must_use]
    pub fn bounding<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut points = points.into_iter();
        let Some((x0, y0)) = points.next() else {
            return Self::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for (x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Maximum X coordinate.
    #[must_use]
    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    /// Maximum Y coordinate.
    #[must_use]
    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Checks whether a point lies inside the rectangle (edges inclusive).
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.max_x() && y >= self.y && y <= self.max_y()
    }

    /// Checks whether two rectangles overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.x < other.max_x()
            && other.x < self.max_x()
            && self.y < other.max_y()
            && other.y < self.max_y()
    }
}

/// Floor division rounding toward negative infinity.
#[must_use]
pub const fn floor_div(a: i32, b: i32) -> i32 {
    a.div_euclid(b) - if b < 0 && a.rem_euclid(b) != 0 { 1 } else { 0 }
}

/// Ceiling division rounding toward positive infinity.
///
/// Defined for every `a`, including `i32::MIN`.
#[must_use]
pub const fn ceil_div(a: i32, b: i32) -> i32 {
    a.div_euclid(b) + if b > 0 && a.rem_euclid(b) != 0 { 1 } else { 0 }
}
