//! Navigation mesh builder for creating properly formatted tile data
//!
//! [`TileBuilder`] assembles polygons given in world coordinates into a tile
//! payload: it derives neighbour codes from shared edges, marks edges lying
//! on the tile border as portals and adds fan detail triangles. [`GridTile`]
//! builds on it to produce flat grids of square cells, which is enough to
//! author test worlds without a voxel pipeline.

use std::collections::{HashMap, HashSet};

use super::binary_format::save_tile_to_binary;
use super::detour_common::{dt_tri_area_2d, dt_visfinite};
use super::nav_mesh::{MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use super::{
    NavMeshParams, PolyFlags, PolyType, Result, Status, DT_EXT_LINK, DT_LINK_INTERNAL,
    DT_OFFMESH_CON_BIDIR, MAX_VERTS_PER_POLY,
};

/// Distance under which a vertex counts as lying on the tile border
const BORDER_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone)]
struct OffMeshDesc {
    start: [f32; 3],
    end: [f32; 3],
    radius: f32,
    bidirectional: bool,
    flags: PolyFlags,
    area: u8,
    user_id: u32,
}

/// Builder for one navigation mesh tile
#[derive(Debug, Clone)]
pub struct TileBuilder {
    header: TileHeader,
    verts: Vec<[f32; 3]>,
    vert_lookup: HashMap<[u32; 3], u16>,
    polys: Vec<Poly>,
    off_mesh: Vec<OffMeshDesc>,
}

impl TileBuilder {
    /// Starts a tile at grid location (`x`, `y`) covering the given bounds
    pub fn new(x: i32, y: i32, bmin: [f32; 3], bmax: [f32; 3]) -> Self {
        Self {
            header: TileHeader {
                x,
                y,
                layer: 0,
                user_id: 0,
                data_size: 0,
                bmin,
                bmax,
                walkable_height: 2.0,
                walkable_radius: 0.6,
                walkable_climb: 0.9,
                off_mesh_base: 0,
                bv_quant_factor: 1.0,
            },
            verts: Vec::new(),
            vert_lookup: HashMap::new(),
            polys: Vec::new(),
            off_mesh: Vec::new(),
        }
    }

    /// Sets the agent dimensions the tile was built for
    pub fn walkable(mut self, height: f32, radius: f32, climb: f32) -> Self {
        self.header.walkable_height = height;
        self.header.walkable_radius = radius;
        self.header.walkable_climb = climb;
        self
    }

    pub fn layer(mut self, layer: i32) -> Self {
        self.header.layer = layer;
        self
    }

    fn add_vertex(&mut self, pos: [f32; 3]) -> Result<u16> {
        let key = pos.map(f32::to_bits);
        if let Some(&idx) = self.vert_lookup.get(&key) {
            return Ok(idx);
        }
        let idx = u16::try_from(self.verts.len()).map_err(|_| Status::InvalidParam)?;
        self.verts.push(pos);
        self.vert_lookup.insert(key, idx);
        Ok(idx)
    }

    /// Adds a convex ground polygon and returns its index
    ///
    /// The winding is normalized, so vertices may be given in either order.
    pub fn add_polygon(&mut self, verts: &[[f32; 3]], flags: PolyFlags, area: u8) -> Result<usize> {
        if verts.len() < 3 || verts.len() > MAX_VERTS_PER_POLY || !verts.iter().all(dt_visfinite) {
            return Err(Status::InvalidParam);
        }

        let mut ordered = verts.to_vec();
        let area2: f32 = (1..ordered.len() - 1)
            .map(|k| dt_tri_area_2d(&ordered[0], &ordered[k], &ordered[k + 1]))
            .sum();
        if area2 < 0.0 {
            ordered.reverse();
        }

        let mut poly = Poly::new(area & 0x3f, PolyType::Ground, flags);
        for (j, v) in ordered.iter().enumerate() {
            poly.verts[j] = self.add_vertex(*v)?;
        }
        poly.vert_count = ordered.len() as u8;
        self.polys.push(poly);
        Ok(self.polys.len() - 1)
    }

    /// Adds an off-mesh connection starting inside this tile
    pub fn add_off_mesh_connection(
        &mut self,
        start: [f32; 3],
        end: [f32; 3],
        radius: f32,
        bidirectional: bool,
        flags: PolyFlags,
        area: u8,
    ) -> Result<()> {
        if !dt_visfinite(&start) || !dt_visfinite(&end) || !(radius >= 0.0) {
            return Err(Status::InvalidParam);
        }
        if classify_off_mesh_point(&start, &self.header.bmin, &self.header.bmax) != DT_LINK_INTERNAL
        {
            return Err(Status::InvalidParam);
        }
        self.off_mesh.push(OffMeshDesc {
            start,
            end,
            radius,
            bidirectional,
            flags,
            area,
            user_id: self.off_mesh.len() as u32,
        });
        Ok(())
    }

    /// Assembles the tile
    pub fn build(mut self) -> Result<MeshTile> {
        if self.polys.is_empty() && self.off_mesh.is_empty() {
            return Err(Status::InvalidParam);
        }

        self.connect_edges();

        let mut detail_meshes = Vec::with_capacity(self.polys.len());
        let mut detail_tris = Vec::new();
        for poly in &self.polys {
            let tri_base = (detail_tris.len() / 4) as u32;
            for k in 1..poly.vert_count() - 1 {
                detail_tris.extend_from_slice(&[0, k as u8, (k + 1) as u8, 0]);
            }
            detail_meshes.push(PolyDetail {
                vert_base: 0,
                tri_base,
                vert_count: 0,
                tri_count: (poly.vert_count() - 2) as u8,
            });
        }

        let off_mesh_base = self.polys.len();
        let mut verts = self.verts;
        let mut polys = self.polys;
        let mut off_mesh_connections = Vec::with_capacity(self.off_mesh.len());
        for desc in &self.off_mesh {
            // Endpoints are never shared, linking snaps them in place.
            let v0 = u16::try_from(verts.len()).map_err(|_| Status::InvalidParam)?;
            verts.push(desc.start);
            verts.push(desc.end);

            let mut poly = Poly::new(desc.area & 0x3f, PolyType::OffMeshConnection, desc.flags);
            poly.verts[0] = v0;
            poly.verts[1] = v0 + 1;
            poly.vert_count = 2;
            let poly_index = u16::try_from(polys.len()).map_err(|_| Status::InvalidParam)?;
            polys.push(poly);

            let mut pos = [0.0; 6];
            pos[..3].copy_from_slice(&desc.start);
            pos[3..].copy_from_slice(&desc.end);
            off_mesh_connections.push(OffMeshConnection {
                pos,
                radius: desc.radius,
                poly: poly_index,
                flags: if desc.bidirectional {
                    DT_OFFMESH_CON_BIDIR
                } else {
                    0
                },
                side: classify_off_mesh_point(&desc.end, &self.header.bmin, &self.header.bmax),
                user_id: desc.user_id,
            });
        }

        let mut header = self.header;
        header.off_mesh_base = off_mesh_base;

        Ok(MeshTile {
            salt: 0,
            header,
            polys,
            verts: verts.into_iter().flatten().collect(),
            links: Vec::new(),
            detail_meshes,
            detail_verts: Vec::new(),
            detail_tris,
            off_mesh_connections,
            data: Vec::new(),
        })
    }

    /// Assembles the tile and serializes it
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        save_tile_to_binary(&self.build()?)
    }

    /// Fills in neighbour codes: shared edges become internal links,
    /// edges on the tile border become portals
    fn connect_edges(&mut self) {
        let mut edges: HashMap<(u16, u16), usize> = HashMap::new();
        for (i, poly) in self.polys.iter().enumerate() {
            let nv = poly.vert_count();
            for j in 0..nv {
                edges.insert((poly.verts[j], poly.verts[(j + 1) % nv]), i);
            }
        }

        let (bmin, bmax) = (self.header.bmin, self.header.bmax);
        for i in 0..self.polys.len() {
            let nv = self.polys[i].vert_count();
            for j in 0..nv {
                let a = self.polys[i].verts[j];
                let b = self.polys[i].verts[(j + 1) % nv];
                let code = if let Some(&other) = edges.get(&(b, a)) {
                    other as u16 + 1
                } else {
                    let va = self.verts[a as usize];
                    let vb = self.verts[b as usize];
                    border_side(&va, &vb, &bmin, &bmax)
                        .map(|side| DT_EXT_LINK | side as u16)
                        .unwrap_or(0)
                };
                self.polys[i].neighbors[j] = code;
            }
        }
    }
}

fn border_side(va: &[f32; 3], vb: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> Option<u8> {
    let on = |a: f32, b: f32, bound: f32| {
        (a - bound).abs() <= BORDER_EPSILON && (b - bound).abs() <= BORDER_EPSILON
    };
    if on(va[0], vb[0], bmax[0]) {
        Some(0)
    } else if on(va[2], vb[2], bmax[2]) {
        Some(2)
    } else if on(va[0], vb[0], bmin[0]) {
        Some(4)
    } else if on(va[2], vb[2], bmin[2]) {
        Some(6)
    } else {
        None
    }
}

/// Tile side a point lies beyond, or [`DT_LINK_INTERNAL`] when inside the tile
fn classify_off_mesh_point(pt: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if pt[0] >= bmax[0] {
        outcode |= XP;
    }
    if pt[2] >= bmax[2] {
        outcode |= ZP;
    }
    if pt[0] < bmin[0] {
        outcode |= XM;
    }
    if pt[2] < bmin[2] {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => DT_LINK_INTERNAL,
    }
}

/// Tile bounds on the xz-plane for a grid location
///
/// Both bounds are computed from the grid origin, so neighbouring tiles
/// agree bit for bit on their shared border.
pub fn tile_bounds_2d(params: &NavMeshParams, x: i32, y: i32) -> ([f32; 2], [f32; 2]) {
    let at = |ix: i32, iy: i32| {
        [
            params.origin[0] + ix as f32 * params.tile_width,
            params.origin[2] + iy as f32 * params.tile_height,
        ]
    };
    (at(x, y), at(x + 1, y + 1))
}

/// Flat tile made of square cells, some of which may be left out
#[derive(Debug, Clone)]
pub struct GridTile {
    x: i32,
    y: i32,
    min: [f32; 2],
    max: [f32; 2],
    cells: usize,
    height: f32,
    flags: PolyFlags,
    area: u8,
    holes: HashSet<(usize, usize)>,
}

impl GridTile {
    /// Grid of `cells` x `cells` walkable squares at the given height
    pub fn new(params: &NavMeshParams, x: i32, y: i32, cells: usize, height: f32) -> Self {
        let (min, max) = tile_bounds_2d(params, x, y);
        Self {
            x,
            y,
            min,
            max,
            cells: cells.max(1),
            height,
            flags: PolyFlags::WALK,
            area: 0,
            holes: HashSet::new(),
        }
    }

    /// Leaves the cell at column `cx`, row `cz` unwalkable
    pub fn with_hole(mut self, cx: usize, cz: usize) -> Self {
        self.holes.insert((cx, cz));
        self
    }

    /// Sets the flags and area of every cell
    pub fn with_flags(mut self, flags: PolyFlags, area: u8) -> Self {
        self.flags = flags;
        self.area = area;
        self
    }

    /// Number of cells along each side
    pub fn cells(&self) -> usize {
        self.cells
    }

    fn coord(&self, axis: usize, i: usize) -> f32 {
        if i == 0 {
            self.min[axis]
        } else if i == self.cells {
            self.max[axis]
        } else {
            self.min[axis] + (self.max[axis] - self.min[axis]) * i as f32 / self.cells as f32
        }
    }

    /// Center of a cell, on the surface
    pub fn cell_center(&self, cx: usize, cz: usize) -> [f32; 3] {
        [
            (self.coord(0, cx) + self.coord(0, cx + 1)) * 0.5,
            self.height,
            (self.coord(1, cz) + self.coord(1, cz + 1)) * 0.5,
        ]
    }

    /// Builds the tile payload
    pub fn build(&self) -> Result<Vec<u8>> {
        let bmin = [self.min[0], self.height - 1.0, self.min[1]];
        let bmax = [self.max[0], self.height + 1.0, self.max[1]];
        let mut builder = TileBuilder::new(self.x, self.y, bmin, bmax);

        for cz in 0..self.cells {
            for cx in 0..self.cells {
                if self.holes.contains(&(cx, cz)) {
                    continue;
                }
                let (x0, x1) = (self.coord(0, cx), self.coord(0, cx + 1));
                let (z0, z1) = (self.coord(1, cz), self.coord(1, cz + 1));
                let h = self.height;
                builder.add_polygon(
                    &[[x0, h, z0], [x0, h, z1], [x1, h, z1], [x1, h, z0]],
                    self.flags,
                    self.area,
                )?;
            }
        }

        builder.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_format::load_tile_from_binary;

    fn params() -> NavMeshParams {
        NavMeshParams {
            origin: [0.0, 0.0, 0.0],
            tile_width: 8.0,
            tile_height: 8.0,
            max_tiles: 16,
            max_polys_per_tile: 64,
        }
    }

    #[test]
    fn test_grid_tile_neighbour_codes() {
        let tile = load_tile_from_binary(&GridTile::new(&params(), 0, 0, 2, 0.0).build().unwrap())
            .unwrap();
        assert_eq!(tile.polys.len(), 4);
        assert_eq!(tile.verts.len() / 3, 9);

        // Cell (0, 0): x-min and z-min edges are portals, the others internal.
        let poly = &tile.polys[0];
        assert_eq!(poly.neighbors[0], DT_EXT_LINK | 4);
        assert_eq!(poly.neighbors[1], 3);
        assert_eq!(poly.neighbors[2], 2);
        assert_eq!(poly.neighbors[3], DT_EXT_LINK | 6);
        assert_eq!(tile.detail_meshes[0].tri_count, 2);
    }

    #[test]
    fn test_grid_tile_hole_leaves_walls() {
        let data = GridTile::new(&params(), 0, 0, 2, 0.0)
            .with_hole(1, 0)
            .build()
            .unwrap();
        let tile = load_tile_from_binary(&data).unwrap();
        assert_eq!(tile.polys.len(), 3);
        // The x-max edge of cell (0, 0) now faces the hole.
        assert_eq!(tile.polys[0].neighbors[2], 0);
    }

    #[test]
    fn test_add_polygon_normalizes_winding() {
        let mut builder = TileBuilder::new(0, 0, [0.0, -1.0, 0.0], [4.0, 1.0, 4.0]);
        builder
            .add_polygon(
                &[[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [4.0, 0.0, 4.0], [0.0, 0.0, 4.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        let tile = builder.build().unwrap();
        let v: Vec<[f32; 3]> = tile.poly_vertices(&tile.polys[0]);
        assert!(dt_tri_area_2d(&v[0], &v[1], &v[2]) > 0.0);
    }

    #[test]
    fn test_off_mesh_connection_layout() {
        let mut builder = TileBuilder::new(0, 0, [0.0, -1.0, 0.0], [4.0, 1.0, 4.0]);
        builder
            .add_polygon(
                &[[0.0, 0.0, 0.0], [0.0, 0.0, 4.0], [4.0, 0.0, 4.0], [4.0, 0.0, 0.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        builder
            .add_off_mesh_connection(
                [1.0, 0.0, 1.0],
                [3.0, 0.0, 3.0],
                0.5,
                true,
                PolyFlags::JUMP,
                1,
            )
            .unwrap();
        assert_eq!(
            builder
                .add_off_mesh_connection([9.0, 0.0, 1.0], [3.0, 0.0, 3.0], 0.5, false, PolyFlags::JUMP, 1)
                .unwrap_err(),
            Status::InvalidParam
        );

        let tile = builder.build().unwrap();
        assert_eq!(tile.header.off_mesh_base, 1);
        assert_eq!(tile.polys[1].poly_type, PolyType::OffMeshConnection);
        assert_eq!(tile.off_mesh_connections[0].side, DT_LINK_INTERNAL);
        assert!(tile.off_mesh_connections[0].is_bidirectional());
    }

    #[test]
    fn test_classify_off_mesh_point() {
        let bmin = [0.0, 0.0, 0.0];
        let bmax = [4.0, 1.0, 4.0];
        assert_eq!(classify_off_mesh_point(&[2.0, 0.0, 2.0], &bmin, &bmax), 0xff);
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, 2.0], &bmin, &bmax), 0);
        assert_eq!(classify_off_mesh_point(&[2.0, 0.0, 5.0], &bmin, &bmax), 2);
        assert_eq!(classify_off_mesh_point(&[-1.0, 0.0, -1.0], &bmin, &bmax), 5);
    }
}
