//! Test mesh creation helpers
//!
//! Small hand-made worlds used across the query and mesh tests.

use crate::nav_mesh_builder::{GridTile, TileBuilder};
use crate::{NavMesh, NavMeshParams, NodePool, PolyFlags};

/// Tile size used by the helper worlds
pub const TILE_SIZE: f32 = 8.0;

pub fn grid_params(max_tiles: i32) -> NavMeshParams {
    NavMeshParams {
        origin: [0.0, 0.0, 0.0],
        tile_width: TILE_SIZE,
        tile_height: TILE_SIZE,
        max_tiles,
        max_polys_per_tile: 64,
    }
}

/// One tile holding a single square polygon
pub fn single_quad_tile(x: i32, y: i32) -> Vec<u8> {
    let x0 = x as f32 * TILE_SIZE;
    let z0 = y as f32 * TILE_SIZE;
    let (x1, z1) = (x0 + TILE_SIZE, z0 + TILE_SIZE);
    let mut builder = TileBuilder::new(x, y, [x0, -1.0, z0], [x1, 1.0, z1]);
    builder
        .add_polygon(
            &[[x0, 0.0, z0], [x0, 0.0, z1], [x1, 0.0, z1], [x1, 0.0, z0]],
            PolyFlags::WALK,
            0,
        )
        .expect("valid polygon");
    builder.to_bytes().expect("serializable tile")
}

/// Mesh with `w` x `h` flat tiles of 4 x 4 cells each
pub fn create_grid_mesh(w: i32, h: i32) -> NavMesh {
    let params = grid_params(w * h);
    let mut mesh = NavMesh::new(params).expect("valid params");
    for y in 0..h {
        for x in 0..w {
            let data = GridTile::new(&params, x, y, 4, 0.0).build().expect("tile");
            mesh.add_tile(data).expect("tile added");
        }
    }
    mesh
}

/// Single tile of 4 x 4 cells where column 2 is missing, splitting the tile in two
pub fn create_split_mesh() -> NavMesh {
    let params = grid_params(1);
    let mut tile = GridTile::new(&params, 0, 0, 4, 0.0);
    for cz in 0..4 {
        tile = tile.with_hole(2, cz);
    }
    let mut mesh = NavMesh::new(params).expect("valid params");
    mesh.add_tile(tile.build().expect("tile")).expect("tile added");
    mesh
}

/// L-shaped corridor of 2 x 2 unit cells: (0,0) -> (1,0) -> (1,1)
pub fn create_corner_mesh() -> NavMesh {
    let params = grid_params(1);
    let mut tile = GridTile::new(&params, 0, 0, 4, 0.0);
    for cz in 0..4 {
        for cx in 0..4 {
            if !matches!((cx, cz), (0, 0) | (1, 0) | (1, 1)) {
                tile = tile.with_hole(cx, cz);
            }
        }
    }
    let mut mesh = NavMesh::new(params).expect("valid params");
    mesh.add_tile(tile.build().expect("tile")).expect("tile added");
    mesh
}

pub fn node_pool() -> NodePool {
    NodePool::new(2048).expect("valid budget")
}
