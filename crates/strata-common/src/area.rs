//! Rectangular ranges of chunk locations.
//!
//! A [`ChunkRange`] is an inclusive rectangle in chunk space. Iterating it
//! yields every location row by row (x varies fastest). The range itself is
//! plain data, so iterating it again always starts from the beginning.

use serde::{Deserialize, Serialize};

use crate::coords::{ceil_div, floor_div, Location, PixelRect, CHUNK_SIZE_PIXELS};
use crate::error::{WorldError, WorldResult};

/// Inclusive rectangle of chunk locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Minimum corner (inclusive)
    pub min: Location,
    /// Maximum corner (inclusive)
    pub max: Location,
}

impl ChunkRange {
    /// Creates a range between two inclusive corners.
    ///
    /// A range whose max lies below its min on either axis is empty.
    #[must_use]
    pub const fn new(min: Location, max: Location) -> Self {
        Self { min, max }
    }

    /// Range covering every chunk that intersects a pixel-space rectangle,
    /// padded by one chunk on each side.
    ///
    /// Rectangle edges are truncated toward zero before dividing, so the
    /// margin also absorbs sub-pixel rounding at the viewport edge.
    #[must_use]
    pub fn from_pixel_area(area: &PixelRect) -> Self {
        let min = Location::new(
            floor_div(area.x as i32, CHUNK_SIZE_PIXELS) - 1,
            floor_div(area.y as i32, CHUNK_SIZE_PIXELS) - 1,
        );
        let max = Location::new(
            ceil_div(area.max_x() as i32, CHUNK_SIZE_PIXELS) + 1,
            ceil_div(area.max_y() as i32, CHUNK_SIZE_PIXELS) + 1,
        );
        Self::new(min, max)
    }

    /// Number of locations in a row, or zero for an empty range.
    #[must_use]
    pub fn width(&self) -> usize {
        span(self.min.x, self.max.x)
    }

    /// Number of rows, or zero for an empty range.
    #[must_use]
    pub fn height(&self) -> usize {
        span(self.min.y, self.max.y)
    }

    /// Total number of locations in the range.
    ///
    /// Saturates at `usize::MAX` for ranges too large to count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.width().saturating_mul(self.height())
    }

    /// Checks whether the range contains no locations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks whether a location lies within the range.
    #[must_use]
    pub const fn contains(&self, location: Location) -> bool {
        location.x >= self.min.x
            && location.x <= self.max.x
            && location.y >= self.min.y
            && location.y <= self.max.y
    }

    /// Returns a fresh iterator over the range.
    #[must_use]
    pub fn iter(&self) -> AreaIter {
        AreaIter::new(*self)
    }
}

fn span(min: i32, max: i32) -> usize {
    if max < min {
        0
    } else {
        usize::try_from(i64::from(max) - i64::from(min) + 1).unwrap_or(usize::MAX)
    }
}

impl IntoIterator for ChunkRange {
    type Item = Location;
    type IntoIter = AreaIter;

    fn into_iter(self) -> AreaIter {
        AreaIter::new(self)
    }
}

impl IntoIterator for &ChunkRange {
    type Item = Location;
    type IntoIter = AreaIter;

    fn into_iter(self) -> AreaIter {
        AreaIter::new(*self)
    }
}

/// Row-major iterator over a [`ChunkRange`].
///
/// Each location is computed directly from its index, so the iterator holds no
/// state besides the range and a cursor.
#[derive(Debug, Clone)]
pub struct AreaIter {
    range: ChunkRange,
    row_length: usize,
    count: usize,
    index: usize,
}

impl AreaIter {
    /// Creates an iterator positioned at the first location of `range`.
    #[must_use]
    pub fn new(range: ChunkRange) -> Self {
        Self {
            range,
            row_length: range.width(),
            count: range.len(),
            index: 0,
        }
    }

    /// Location at a linear index within the range.
    fn location_at(&self, index: usize) -> Location {
        let dx = (index % self.row_length) as i64;
        let dy = (index / self.row_length) as i64;
        Location::new(
            (i64::from(self.range.min.x) + dx) as i32,
            (i64::from(self.range.min.y) + dy) as i32,
        )
    }

    /// Advances the iterator, failing once every location has been produced.
    pub fn try_next(&mut self) -> WorldResult<Location> {
        self.next().ok_or(WorldError::AreaExhausted)
    }

    /// The range being iterated.
    #[must_use]
    pub const fn range(&self) -> ChunkRange {
        self.range
    }
}

impl Iterator for AreaIter {
    type Item = Location;

    fn next(&mut self) -> Option<Location> {
        if self.index >= self.count {
            return None;
        }
        let location = self.location_at(self.index);
        self.index += 1;
        Some(location)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<Location> {
        self.index = self.index.saturating_add(n).min(self.count);
        self.next()
    }
}

impl ExactSizeIterator for AreaIter {}

impl std::iter::FusedIterator for AreaIter {}
