//! Demand-loaded navigation mesh tiles
//!
//! Reads the `.mmap` / `.mmtile` files produced by the map extractor and
//! keeps one tiled navigation mesh per map. Tiles are linked in as the world
//! around a search is needed and unlinked when it is not; every thread gets
//! its own query over a shared mesh.

pub mod config;
pub mod coords;
pub mod error;
pub mod file_format;
pub mod flat_world;
pub mod tile_cache;


pub use config::{TileCacheConfig, DEFAULT_QUERY_NODE_BUDGET};
pub use coords::{nav_to_world, world_to_nav, TileCoord, MMAP_GRID_COUNT, MMAP_GRID_SIZE};
pub use error::{FormatError, TileError};
pub use file_format::{MmapTileHeader, NavTerrain, MMAP_MAGIC, MMAP_VERSION};
pub use flat_world::FlatWorld;
pub use tile_cache::{QueryLease, TileCache};
