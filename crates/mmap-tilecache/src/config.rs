use std::path::{Path, PathBuf};

use crate::coords::TileCoord;
use crate::file_format::{model_file_name, params_file_name, tile_file_name};

/// Node budget of each per-thread query
pub const DEFAULT_QUERY_NODE_BUDGET: usize = 2048;

/// Tile cache settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheConfig {
    /// Directory holding the `.mmap` and `.mmtile` files
    pub mmap_dir: PathBuf,
    /// Search node budget of every query handle
    pub query_node_budget: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            mmap_dir: PathBuf::from("mmaps"),
            query_node_budget: DEFAULT_QUERY_NODE_BUDGET,
        }
    }
}

impl TileCacheConfig {
    pub fn new(mmap_dir: impl Into<PathBuf>) -> Self {
        Self {
            mmap_dir: mmap_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_query_node_budget(mut self, budget: usize) -> Self {
        self.query_node_budget = budget;
        self
    }

    pub fn mmap_dir(&self) -> &Path {
        &self.mmap_dir
    }

    pub fn params_path(&self, map_id: u32) -> PathBuf {
        self.mmap_dir.join(params_file_name(map_id))
    }

    pub fn tile_path(&self, map_id: u32, coord: TileCoord) -> PathBuf {
        self.mmap_dir.join(tile_file_name(map_id, coord))
    }

    pub fn model_path(&self, display_id: u32) -> PathBuf {
        self.mmap_dir.join(model_file_name(display_id))
    }
}
