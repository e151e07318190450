//! 2D camera and the view-area resolver.
//!
//! The camera maps screen pixels to world pixels. The resolver turns what the
//! camera can see into the range of chunk locations the renderer needs.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use strata_common::{ChunkRange, PixelRect};

/// Minimum zoom level (zoomed out).
pub const MIN_ZOOM: f32 = 0.05;

/// Maximum zoom level (zoomed in).
pub const MAX_ZOOM: f32 = 20.0;

/// Default zoom level.
pub const DEFAULT_ZOOM: f32 = 1.0;

/// Orthographic 2D camera.
///
/// Screen origin is top-left with Y growing downward. World Y grows upward,
/// so terrain height and screen height point the same way on screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    /// Camera position in world pixels (center of view).
    pub position: Vec2,
    /// Zoom level (1.0 = one world pixel per screen pixel, larger = closer).
    pub zoom: f32,
    /// Rotation of the view in radians (counter-clockwise).
    pub rotation: f32,
    /// Viewport size in screen pixels (width, height).
    pub viewport_size: (u32, u32),
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            zoom: DEFAULT_ZOOM,
            rotation: 0.0,
            viewport_size: (1280, 720),
        }
    }
}

impl Camera {
    /// Creates a new camera with the given viewport size.
    #[must_use]
    pub fn new(viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            viewport_size: (viewport_width, viewport_height),
            ..Default::default()
        }
    }

    /// Move camera by delta in world units.
    pub fn translate(&mut self, delta: Vec2) {
        self.position += delta;
    }

    /// Zoom in/out by factor (clamped to reasonable range).
    ///
    /// Factor > 1.0 zooms in, < 1.0 zooms out.
    pub fn zoom_by(&mut self, factor: f32) {
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Set absolute zoom level (clamped).
    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Rotate the view by `radians`.
    pub fn rotate(&mut self, radians: f32) {
        self.rotation = (self.rotation + radians).rem_euclid(std::f32::consts::TAU);
    }

    /// Center camera on world position.
    pub fn center_on(&mut self, world: Vec2) {
        self.position = world;
    }

    /// Set the viewport size.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport_size = (width, height);
    }

    fn half_viewport(&self) -> Vec2 {
        Vec2::new(self.viewport_size.0 as f32, self.viewport_size.1 as f32) / 2.0
    }

    /// Convert screen coordinates to world coordinates.
    #[must_use]
    pub fn unproject(&self, screen: Vec2) -> Vec2 {
        let half = self.half_viewport();
        let offset = Vec2::new(screen.x - half.x, half.y - screen.y) / self.zoom;
        self.position + Vec2::from_angle(self.rotation).rotate(offset)
    }

    /// Convert world coordinates to screen coordinates.
    #[must_use]
    pub fn project(&self, world: Vec2) -> Vec2 {
        let half = self.half_viewport();
        let offset = Vec2::from_angle(-self.rotation).rotate(world - self.position) * self.zoom;
        Vec2::new(offset.x + half.x, half.y - offset.y)
    }

    /// Screen-space corners of the viewport.
    fn viewport_corners(&self) -> [Vec2; 4] {
        let (w, h) = (self.viewport_size.0 as f32, self.viewport_size.1 as f32);
        [
            Vec2::new(0.0, 0.0),
            Vec2::new(w, 0.0),
            Vec2::new(0.0, h),
            Vec2::new(w, h),
        ]
    }
}

/// World-space rectangle that can be seen through `camera`.
///
/// All four viewport corners are unprojected, so the result bounds the view
/// under any rotation and zoom.
#[must_use]
pub fn viewable_area(camera: &Camera) -> PixelRect {
    PixelRect::bounding(
        camera
            .viewport_corners()
            .into_iter()
            .map(|corner| camera.unproject(corner))
            .map(|p| (p.x, p.y)),
    )
}

/// Chunk locations covering a pixel-space area, with a one-chunk margin.
#[must_use]
pub fn area_to_chunk_range(area: &PixelRect) -> ChunkRange {
    ChunkRange::from_pixel_area(area)
}
