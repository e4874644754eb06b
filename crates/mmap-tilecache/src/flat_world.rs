//! Flat demonstration maps
//!
//! Writes parameter and tile files for a map made of flat square cells, laid
//! out exactly like extracted map meshes. Used by the command line tool and
//! by tests that need real files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use detour::{GridTile, NavMeshParams, PolyFlags};
use glam::Vec3;

use crate::coords::{nav_to_world, TileCoord, MMAP_GRID_COUNT, MMAP_GRID_SIZE};
use crate::error::TileError;
use crate::file_format::{
    model_file_name, params_file_name, tile_file_name, write_params_file, write_tile_file,
    NavTerrain,
};

/// Tile slots of a map mesh
pub const MAP_MAX_TILES: i32 = 4096;

/// Polygon capacity of a map tile
pub const MAP_MAX_POLYS_PER_TILE: i32 = 256;

/// Flat map generator
#[derive(Debug, Clone)]
pub struct FlatWorld {
    map_id: u32,
    cells_per_tile: usize,
    height: f32,
    holes: HashSet<(TileCoord, usize, usize)>,
}

impl FlatWorld {
    /// Flat map at height zero with 4 x 4 cells per tile
    pub fn new(map_id: u32) -> Self {
        Self {
            map_id,
            cells_per_tile: 4,
            height: 0.0,
            holes: HashSet::new(),
        }
    }

    pub fn with_cells_per_tile(mut self, cells: usize) -> Self {
        self.cells_per_tile = cells.max(1);
        self
    }

    /// Ground height (world z)
    pub fn with_height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    /// Leaves one cell of a tile unwalkable
    ///
    /// Cells are indexed along the navigation axes: `cx` follows world y,
    /// `cz` follows world x, both counted from the tile's minimum corner.
    pub fn with_hole(mut self, coord: TileCoord, cx: usize, cz: usize) -> Self {
        self.holes.insert((coord, cx, cz));
        self
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn cells_per_tile(&self) -> usize {
        self.cells_per_tile
    }

    /// Mesh parameters shared by every tile of the map
    pub fn params(&self) -> NavMeshParams {
        let half = f32::from(MMAP_GRID_COUNT / 2) * MMAP_GRID_SIZE;
        NavMeshParams {
            origin: [-half, 0.0, -half],
            tile_width: MMAP_GRID_SIZE,
            tile_height: MMAP_GRID_SIZE,
            max_tiles: MAP_MAX_TILES,
            max_polys_per_tile: MAP_MAX_POLYS_PER_TILE,
        }
    }

    fn grid_tile(&self, coord: TileCoord) -> GridTile {
        let (x, y) = coord.mesh_tile_location();
        let ground = PolyFlags::from_bits_retain(NavTerrain::GROUND.bits());
        let mut tile = GridTile::new(&self.params(), x, y, self.cells_per_tile, self.height)
            .with_flags(ground, 0);
        for &(_, cx, cz) in self.holes.iter().filter(|(c, _, _)| *c == coord) {
            tile = tile.with_hole(cx, cz);
        }
        tile
    }

    /// World position at the center of a cell
    pub fn cell_center(&self, coord: TileCoord, cx: usize, cz: usize) -> Vec3 {
        nav_to_world(&self.grid_tile(coord).cell_center(cx, cz))
    }

    /// Writes the map's parameter file
    pub fn write_params(&self, dir: &Path) -> Result<PathBuf, TileError> {
        let path = dir.join(params_file_name(self.map_id));
        write_params_file(&path, &self.params())?;
        Ok(path)
    }

    fn build_tile(&self, coord: TileCoord) -> Result<Vec<u8>, TileError> {
        self.grid_tile(coord)
            .build()
            .map_err(|status| TileError::LibraryOp {
                mesh_id: self.map_id,
                coord,
                status,
            })
    }

    /// Writes one tile file
    pub fn write_tile(&self, dir: &Path, coord: TileCoord) -> Result<PathBuf, TileError> {
        let path = dir.join(tile_file_name(self.map_id, coord));
        write_tile_file(&path, &self.build_tile(coord)?, false)?;
        Ok(path)
    }

    /// Writes the parameter file and every tile within `radius` of `center`
    pub fn write_area(
        &self,
        dir: &Path,
        center: TileCoord,
        radius: u16,
    ) -> Result<Vec<TileCoord>, TileError> {
        self.write_params(dir)?;
        let r = i32::from(radius);
        let mut written = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if let Some(coord) = center.offset(dx, dy) {
                    self.write_tile(dir, coord)?;
                    written.push(coord);
                }
            }
        }
        log::info!(
            "Wrote {} tiles of map {:03} to {}",
            written.len(),
            self.map_id,
            dir.display()
        );
        Ok(written)
    }

    /// Writes the tile at `coord` as a game object model file
    pub fn write_model(
        &self,
        dir: &Path,
        display_id: u32,
        coord: TileCoord,
    ) -> Result<PathBuf, TileError> {
        let path = dir.join(model_file_name(display_id));
        write_tile_file(&path, &self.build_tile(coord)?, false)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_format::{read_params_file, read_tile_file};

    #[test]
    fn test_cell_center_maps_back_to_tile() {
        let world = FlatWorld::new(0);
        let coord = TileCoord::new(32, 32);
        for (cx, cz) in [(0, 0), (3, 0), (1, 2), (3, 3)] {
            let center = world.cell_center(coord, cx, cz);
            assert_eq!(TileCoord::from_world(center), Some(coord));
            assert_eq!(center.z, 0.0);
        }
    }

    #[test]
    fn test_write_area() {
        let dir = tempfile::tempdir().unwrap();
        let world = FlatWorld::new(7).with_height(5.0);
        let written = world.write_area(dir.path(), TileCoord::new(0, 10), 1).unwrap();
        assert_eq!(written.len(), 6);

        let params = read_params_file(&dir.path().join("007.mmap")).unwrap();
        assert_eq!(params, world.params());

        let (header, payload) = read_tile_file(&dir.path().join("0071000.mmtile")).unwrap();
        assert!(!header.uses_liquids);
        assert_eq!(header.size as usize, payload.len());
    }
}
