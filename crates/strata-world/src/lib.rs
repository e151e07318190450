//! # Strata World
//!
//! World management for Strata.
//!
//! This crate handles:
//! - The bounded, asynchronous chunk cache
//! - Chunk data, tiles and the tile registry
//! - Procedural generation
//! - Chunk persistence
//! - Camera view areas and the chunks they cover

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod chunk;
pub mod context;
pub mod generation;
pub mod persist;
pub mod tile;
pub mod view;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::*;
    pub use crate::chunk::*;
    pub use crate::context::*;
    pub use crate::generation::*;
    pub use crate::persist::*;
    pub use crate::tile::*;
    pub use crate::view::*;
}

pub use prelude::*;
