//! # Strata Common
//!
//! Foundational types shared by the Strata crates:
//! - Chunk locations and pixel-space rectangles
//! - Inclusive chunk ranges and their row-major iterator
//! - Chunk and tile sizing constants
//! - The world error taxonomy
//! - File format versions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod area;
pub mod coords;
pub mod error;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::area::*;
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::version::*;
}

pub use prelude::*;
