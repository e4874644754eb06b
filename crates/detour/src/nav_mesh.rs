//! Tiled navigation mesh
//!
//! A [`NavMesh`] owns a fixed number of tile slots. Tiles are added from
//! serialized payloads, linked to their neighbours and addressed through
//! salted [`PolyRef`]s, so references into a removed tile stop resolving
//! even after the slot is reused.

use std::collections::HashMap;

use crate::binary_format::load_tile_from_binary;
use crate::detour_common::{
    dt_closest_height_point_triangle, dt_dist_pt_seg_sqr_2d, dt_distance_pt_poly_edges_sqr,
    dt_ilog2, dt_next_pow2, dt_opposite_tile, dt_overlap_bounds, dt_point_in_polygon, dt_sqr,
    dt_visfinite, dt_vlen, dt_vlerp, dt_vmax, dt_vmin, dt_vsub,
};
use crate::{
    NavMeshParams, PolyFlags, PolyRef, PolyType, QueryFilter, Result, Status, DT_EXT_LINK,
    DT_LINK_INTERNAL, DT_OFFMESH_CON_BIDIR, MAX_VERTS_PER_POLY,
};

/// Portal sides in neighbour order: +x, +z, -x, -z
const PORTAL_SIDES: [u8; 4] = [0, 2, 4, 6];

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Reference to the connected polygon
    pub reference: PolyRef,
    /// Index of the next link of the same polygon
    pub next: Option<usize>,
    /// Edge of the polygon the link leaves through (0xff for off-mesh back links)
    pub edge: u8,
    /// Tile side for portal links, 0xff inside a tile
    pub side: u8,
    /// Start of the shared portal span along the edge, 0..=255
    pub bmin: u8,
    /// End of the shared portal span along the edge, 0..=255
    pub bmax: u8,
}

/// Polygon in the navigation mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Poly {
    /// First link index
    pub first_link: Option<usize>,
    /// Vertex indices into the tile vertex array
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Neighbour code per edge (see [`DT_EXT_LINK`])
    pub neighbors: [u16; MAX_VERTS_PER_POLY],
    /// Flags for the polygon
    pub flags: PolyFlags,
    /// Number of vertices in the polygon
    pub vert_count: u8,
    /// Area ID of the polygon
    pub area: u8,
    /// Polygon type
    pub poly_type: PolyType,
}

impl Poly {
    /// Creates an empty polygon
    pub fn new(area: u8, poly_type: PolyType, flags: PolyFlags) -> Self {
        Self {
            first_link: None,
            verts: [0; MAX_VERTS_PER_POLY],
            neighbors: [0; MAX_VERTS_PER_POLY],
            flags,
            vert_count: 0,
            area,
            poly_type,
        }
    }

    #[inline]
    pub fn vert_count(&self) -> usize {
        self.vert_count as usize
    }

    #[inline]
    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }
}

/// Detail sub-mesh of a polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolyDetail {
    /// Offset of the first detail vertex
    pub vert_base: u32,
    /// Offset of the first detail triangle
    pub tri_base: u32,
    /// Number of extra detail vertices
    pub vert_count: u8,
    /// Number of detail triangles
    pub tri_count: u8,
}

/// Off-mesh connection between two points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshConnection {
    /// Start and end positions
    pub pos: [f32; 6],
    /// Snap radius of the endpoints
    pub radius: f32,
    /// Polygon index of the connection inside the tile
    pub poly: u16,
    /// Connection flags (see [`DT_OFFMESH_CON_BIDIR`])
    pub flags: u8,
    /// Tile side of the end point, 0xff when it lies inside the tile
    pub side: u8,
    /// User id
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn start_pos(&self) -> [f32; 3] {
        [self.pos[0], self.pos[1], self.pos[2]]
    }

    pub fn end_pos(&self) -> [f32; 3] {
        [self.pos[3], self.pos[4], self.pos[5]]
    }

    pub fn is_bidirectional(&self) -> bool {
        self.flags & DT_OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    /// Tile grid location
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    /// Size of the serialized payload
    pub data_size: usize,
    /// Tile bounds
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: usize,
    pub bv_quant_factor: f32,
}

/// Mesh tile in the navigation mesh
#[derive(Debug, Clone)]
pub struct MeshTile {
    /// Salt of the slot the tile lives in
    pub salt: u32,
    pub header: TileHeader,
    pub polys: Vec<Poly>,
    /// Flat vertex array (x, y, z)
    pub verts: Vec<f32>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    /// Flat detail vertex array (x, y, z)
    pub detail_verts: Vec<f32>,
    /// Detail triangles, 4 bytes each (3 vertex indices and edge flags)
    pub detail_tris: Vec<u8>,
    pub off_mesh_connections: Vec<OffMeshConnection>,
    /// Serialized payload the tile was created from, owned by the mesh
    pub(crate) data: Vec<u8>,
}

/// Iterator over the links of one polygon
pub struct LinkIter<'a> {
    links: &'a [Link],
    next: Option<usize>,
}

impl<'a> Iterator for LinkIter<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<Self::Item> {
        let link = self.links.get(self.next?)?;
        self.next = link.next;
        Some(link)
    }
}

impl MeshTile {
    /// Vertex position
    #[inline]
    pub fn vertex(&self, index: u16) -> [f32; 3] {
        let b = index as usize * 3;
        [self.verts[b], self.verts[b + 1], self.verts[b + 2]]
    }

    /// Positions of the polygon's vertices
    pub fn poly_vertices(&self, poly: &Poly) -> Vec<[f32; 3]> {
        poly.verts[..poly.vert_count()]
            .iter()
            .map(|&v| self.vertex(v))
            .collect()
    }

    /// Links leaving the polygon
    pub fn links(&self, poly: &Poly) -> LinkIter<'_> {
        LinkIter {
            links: &self.links,
            next: poly.first_link,
        }
    }

    /// Serialized payload backing this tile
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn poly_bounds(&self, poly: &Poly) -> ([f32; 3], [f32; 3]) {
        let first = self.vertex(poly.verts[0]);
        let (mut bmin, mut bmax) = (first, first);
        for &v in &poly.verts[1..poly.vert_count()] {
            let p = self.vertex(v);
            dt_vmin(&mut bmin, &p);
            dt_vmax(&mut bmax, &p);
        }
        (bmin, bmax)
    }

    fn detail_vertex(&self, poly: &Poly, detail: &PolyDetail, index: u8) -> [f32; 3] {
        let index = index as usize;
        if index < poly.vert_count() {
            self.vertex(poly.verts[index])
        } else {
            let b = (detail.vert_base as usize + index - poly.vert_count()) * 3;
            [
                self.detail_verts[b],
                self.detail_verts[b + 1],
                self.detail_verts[b + 2],
            ]
        }
    }

    /// Height of the polygon surface under `pos`, `None` when `pos` is outside the polygon
    pub(crate) fn poly_height(&self, poly_index: usize, pos: &[f32; 3]) -> Option<f32> {
        let poly = &self.polys[poly_index];
        if poly.is_off_mesh_connection() {
            return None;
        }

        let verts = self.poly_vertices(poly);
        if !dt_point_in_polygon(pos, &verts) {
            return None;
        }

        match self.detail_meshes.get(poly_index).filter(|d| d.tri_count > 0) {
            Some(detail) => {
                for t in 0..detail.tri_count as usize {
                    let b = (detail.tri_base as usize + t) * 4;
                    let tri = &self.detail_tris[b..b + 3];
                    let a = self.detail_vertex(poly, detail, tri[0]);
                    let bv = self.detail_vertex(poly, detail, tri[1]);
                    let c = self.detail_vertex(poly, detail, tri[2]);
                    if let Some(h) = dt_closest_height_point_triangle(pos, &a, &bv, &c) {
                        return Some(h);
                    }
                }
            }
            None => {
                for k in 1..verts.len() - 1 {
                    if let Some(h) =
                        dt_closest_height_point_triangle(pos, &verts[0], &verts[k], &verts[k + 1])
                    {
                        return Some(h);
                    }
                }
            }
        }

        // Point sits on the polygon outline within float noise.
        Some(closest_on_edges(pos, &verts)[1])
    }

    /// Closest point on the polygon and whether `pos` lies over it
    pub(crate) fn closest_point_on_poly(
        &self,
        poly_index: usize,
        pos: &[f32; 3],
    ) -> ([f32; 3], bool) {
        let poly = &self.polys[poly_index];
        if poly.is_off_mesh_connection() {
            let v0 = self.vertex(poly.verts[0]);
            let v1 = self.vertex(poly.verts[1]);
            let (_, t) = dt_dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return (dt_vlerp(&v0, &v1, t), false);
        }

        if let Some(h) = self.poly_height(poly_index, pos) {
            return ([pos[0], h, pos[2]], true);
        }

        (closest_on_edges(pos, &self.poly_vertices(poly)), false)
    }

    /// Nearest ground polygon of this tile within the search box
    pub(crate) fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
    ) -> Option<(usize, [f32; 3])> {
        let bmin = dt_vsub(center, half_extents);
        let bmax = crate::detour_common::dt_vadd(center, half_extents);
        let climb = self.header.walkable_climb;

        let mut best: Option<(usize, [f32; 3], f32)> = None;
        for (i, poly) in self.polys.iter().enumerate() {
            if poly.is_off_mesh_connection() {
                continue;
            }
            let (pmin, pmax) = self.poly_bounds(poly);
            if !dt_overlap_bounds(&bmin, &bmax, &pmin, &pmax) {
                continue;
            }
            let (closest, over) = self.closest_point_on_poly(i, center);
            let d = nearest_score(center, &closest, over, climb);
            if best.map_or(true, |(_, _, bd)| d < bd) {
                best = Some((i, closest, d));
            }
        }
        best.map(|(i, p, _)| (i, p))
    }

    /// Polygons of this tile whose portal edges on `side` overlap the segment
    fn find_connecting_polys(
        &self,
        va: &[f32; 3],
        vb: &[f32; 3],
        side: u8,
    ) -> Vec<(usize, f32, f32)> {
        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = slab_coord(va, side);
        let code = DT_EXT_LINK | side as u16;

        let mut result = Vec::new();
        for (i, poly) in self.polys.iter().enumerate() {
            let nv = poly.vert_count();
            for j in 0..nv {
                if poly.neighbors[j] != code {
                    continue;
                }
                let vc = self.vertex(poly.verts[j]);
                let vd = self.vertex(poly.verts[(j + 1) % nv]);
                if (apos - slab_coord(&vc, side)).abs() > 0.01 {
                    continue;
                }
                let (bmin, bmax) = calc_slab_end_points(&vc, &vd, side);
                if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, self.header.walkable_climb) {
                    continue;
                }
                result.push((i, amin[0].max(bmin[0]), amax[0].min(bmax[0])));
                break;
            }
        }
        result
    }

    /// Prepends a link to the polygon's link list
    fn push_link(&mut self, poly_index: usize, mut link: Link) {
        link.next = self.polys[poly_index].first_link;
        self.polys[poly_index].first_link = Some(self.links.len());
        self.links.push(link);
    }

    /// Rebuilds the link lists keeping only the links accepted by `keep`
    fn retain_links(&mut self, keep: impl Fn(&Link) -> bool) {
        let old = std::mem::take(&mut self.links);
        for i in 0..self.polys.len() {
            let mut chain = Vec::new();
            let mut next = self.polys[i].first_link;
            while let Some(l) = next {
                let link = old[l];
                next = link.next;
                if keep(&link) {
                    chain.push(link);
                }
            }
            self.polys[i].first_link = None;
            for link in chain.into_iter().rev() {
                self.push_link(i, link);
            }
        }
    }
}

/// Score used to rank nearest-polygon candidates
///
/// Points standing over a polygon only pay for the height difference beyond
/// the climb allowance.
pub(crate) fn nearest_score(center: &[f32; 3], closest: &[f32; 3], over: bool, climb: f32) -> f32 {
    let diff = dt_vsub(center, closest);
    if over {
        let d = diff[1].abs() - climb;
        if d > 0.0 {
            d * d
        } else {
            0.0
        }
    } else {
        dt_sqr(dt_vlen(&diff))
    }
}

fn closest_on_edges(pos: &[f32; 3], verts: &[[f32; 3]]) -> [f32; 3] {
    let (_, ed, et) = dt_distance_pt_poly_edges_sqr(pos, verts);
    let mut imin = 0;
    for i in 1..ed.len() {
        if ed[i] < ed[imin] {
            imin = i;
        }
    }
    dt_vlerp(&verts[imin], &verts[(imin + 1) % verts.len()], et[imin])
}

fn slab_coord(v: &[f32; 3], side: u8) -> f32 {
    if side == 0 || side == 4 {
        v[0]
    } else {
        v[2]
    }
}

/// End points of a portal edge projected on (tangent axis, height)
fn calc_slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: u8) -> ([f32; 2], [f32; 2]) {
    let axis = if side == 0 || side == 4 { 2 } else { 0 };
    if va[axis] < vb[axis] {
        ([va[axis], va[1]], [vb[axis], vb[1]])
    } else {
        ([vb[axis], vb[1]], [va[axis], va[1]])
    }
}

fn overlap_slabs(
    amin: &[f32; 2],
    amax: &[f32; 2],
    bmin: &[f32; 2],
    bmax: &[f32; 2],
    px: f32,
    py: f32,
) -> bool {
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let dmin = (bd * minx + bk) - (ad * minx + ak);
    let dmax = (bd * maxx + bk) - (ad * maxx + ak);

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = dt_sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

fn side_offset(side: u8) -> (i32, i32) {
    match side {
        0 => (1, 0),
        2 => (0, 1),
        4 => (-1, 0),
        _ => (0, -1),
    }
}

/// Portal span of the overlap `[cmin, cmax]` along the edge `va -> vb`
fn portal_span(side: u8, va: &[f32; 3], vb: &[f32; 3], cmin: f32, cmax: f32) -> (u8, u8) {
    let axis = if side == 0 || side == 4 { 2 } else { 0 };
    let d = vb[axis] - va[axis];
    if d.abs() < 1e-6 {
        return (0, 255);
    }
    let mut tmin = (cmin - va[axis]) / d;
    let mut tmax = (cmax - va[axis]) / d;
    if tmin > tmax {
        std::mem::swap(&mut tmin, &mut tmax);
    }
    let quantize = |t: f32| (t.clamp(0.0, 1.0) * 255.0).round() as u8;
    (quantize(tmin), quantize(tmax))
}

/// Navigation mesh structure
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<Option<MeshTile>>,
    /// Current salt of every slot
    salts: Vec<u32>,
    /// Free slots, next to allocate last
    free_list: Vec<usize>,
    /// Tile slots by grid location (one entry per layer)
    pos_lookup: HashMap<(i32, i32), Vec<usize>>,
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

impl NavMesh {
    /// Creates an empty navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if !dt_visfinite(&params.origin)
            || !(params.tile_width.is_finite() && params.tile_width > 0.0)
            || !(params.tile_height.is_finite() && params.tile_height > 0.0)
            || params.max_tiles <= 0
            || params.max_polys_per_tile <= 0
        {
            return Err(Status::InvalidParam);
        }

        let tile_bits = dt_ilog2(dt_next_pow2(params.max_tiles as u32));
        let poly_bits = dt_ilog2(dt_next_pow2(params.max_polys_per_tile as u32));
        // At least 10 bits of salt keep stale references detectable.
        let salt_bits = 32u32
            .checked_sub(tile_bits + poly_bits)
            .ok_or(Status::InvalidParam)?
            .min(31);
        if salt_bits < 10 {
            return Err(Status::InvalidParam);
        }

        let max_tiles = params.max_tiles as usize;
        Ok(Self {
            params,
            tiles: (0..max_tiles).map(|_| None).collect(),
            salts: vec![1; max_tiles],
            free_list: (0..max_tiles).rev().collect(),
            pos_lookup: HashMap::new(),
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Creates a mesh holding exactly one tile, sized after the tile bounds
    pub fn from_single_tile(data: Vec<u8>) -> Result<(Self, PolyRef)> {
        let tile = load_tile_from_binary(&data)?;
        let h = &tile.header;
        let tile_width = h.bmax[0] - h.bmin[0];
        let tile_height = h.bmax[2] - h.bmin[2];
        // The grid is shifted so the tile's own location maps onto its bounds.
        let params = NavMeshParams {
            origin: [
                h.bmin[0] - h.x as f32 * tile_width,
                h.bmin[1],
                h.bmin[2] - h.y as f32 * tile_height,
            ],
            tile_width,
            tile_height,
            max_tiles: 1,
            max_polys_per_tile: i32::try_from(tile.polys.len().max(1))
                .map_err(|_| Status::InvalidParam)?,
        };
        let mut mesh = Self::new(params)?;
        let tile_ref = mesh.insert_tile(tile, data)?;
        Ok((mesh, tile_ref))
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Number of tiles currently in the mesh
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    /// All tiles currently in the mesh
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().flatten()
    }

    pub fn encode_poly_ref(&self, salt: u32, tile_index: u32, poly_index: u32) -> PolyRef {
        PolyRef::new(
            (salt << (self.poly_bits + self.tile_bits)) | (tile_index << self.poly_bits) | poly_index,
        )
    }

    /// Splits a reference into (salt, tile index, polygon index)
    pub fn decode_poly_ref(&self, reference: PolyRef) -> (u32, u32, u32) {
        let r = reference.id();
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        (
            (r >> (self.poly_bits + self.tile_bits)) & salt_mask,
            (r >> self.poly_bits) & tile_mask,
            r & poly_mask,
        )
    }

    /// Reference of polygon 0 in the given slot, which doubles as the tile reference
    fn poly_ref_base(&self, tile_index: usize) -> PolyRef {
        self.encode_poly_ref(self.salts[tile_index], tile_index as u32, 0)
    }

    /// Tile grid location containing the position
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        let tx = ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> Vec<usize> {
        self.pos_lookup.get(&(x, y)).cloned().unwrap_or_default()
    }

    /// Tiles of every layer at the grid location
    pub fn tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y)
            .into_iter()
            .filter_map(|i| self.tiles[i].as_ref())
            .collect()
    }

    /// Tile at the grid location and layer
    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tiles_at(x, y).into_iter().find(|t| t.header.layer == layer)
    }

    /// Reference of the tile at the grid location and layer
    pub fn tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<PolyRef> {
        self.tile_indices_at(x, y).into_iter().find_map(|i| {
            self.tiles[i]
                .as_ref()
                .filter(|t| t.header.layer == layer)
                .map(|_| self.poly_ref_base(i))
        })
    }

    /// Adds a tile, taking ownership of its serialized payload
    ///
    /// Returns the tile reference to hand back to [`NavMesh::remove_tile`].
    pub fn add_tile(&mut self, data: Vec<u8>) -> Result<PolyRef> {
        let tile = load_tile_from_binary(&data)?;
        self.insert_tile(tile, data)
    }

    fn insert_tile(&mut self, mut tile: MeshTile, data: Vec<u8>) -> Result<PolyRef> {
        let (x, y, layer) = (tile.header.x, tile.header.y, tile.header.layer);
        if self.tile_at(x, y, layer).is_some() {
            return Err(Status::AlreadyExists);
        }
        if tile.polys.len() > self.params.max_polys_per_tile as usize {
            return Err(Status::InvalidParam);
        }
        let idx = self.free_list.pop().ok_or(Status::OutOfMemory)?;

        tile.salt = self.salts[idx];
        tile.data = data;
        tile.links.clear();
        for poly in &mut tile.polys {
            poly.first_link = None;
        }
        let poly_count = tile.polys.len();
        self.tiles[idx] = Some(tile);
        self.pos_lookup.entry((x, y)).or_default().push(idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        for side in PORTAL_SIDES {
            let (dx, dy) = side_offset(side);
            for nidx in self.tile_indices_at(x + dx, y + dy) {
                self.connect_ext_links(idx, nidx, side);
                self.connect_ext_links(nidx, idx, dt_opposite_tile(side));
            }
        }

        log::debug!(
            "Added tile ({}, {}, {}) with {} polygons to slot {}",
            x,
            y,
            layer,
            poly_count,
            idx
        );
        Ok(self.poly_ref_base(idx))
    }

    /// Removes a tile and frees its payload
    pub fn remove_tile(&mut self, tile_ref: PolyRef) -> Result<()> {
        let (salt, idx, _) = self.decode_poly_ref(tile_ref);
        let idx = idx as usize;
        let (x, y, layer) = match self.tiles.get(idx) {
            Some(Some(tile)) if tile.salt == salt => {
                (tile.header.x, tile.header.y, tile.header.layer)
            }
            _ => return Err(Status::InvalidParam),
        };

        for side in PORTAL_SIDES {
            let (dx, dy) = side_offset(side);
            for nidx in self.tile_indices_at(x + dx, y + dy) {
                self.unconnect_links(nidx, idx);
            }
        }

        if let Some(slots) = self.pos_lookup.get_mut(&(x, y)) {
            slots.retain(|&i| i != idx);
            if slots.is_empty() {
                self.pos_lookup.remove(&(x, y));
            }
        }

        self.tiles[idx] = None;
        let salt_mask = (1u32 << self.salt_bits) - 1;
        self.salts[idx] = (self.salts[idx] + 1) & salt_mask;
        if self.salts[idx] == 0 {
            self.salts[idx] = 1;
        }
        self.free_list.push(idx);

        log::debug!("Removed tile ({}, {}, {}) from slot {}", x, y, layer, idx);
        Ok(())
    }

    fn connect_int_links(&mut self, idx: usize) {
        let base = self.poly_ref_base(idx).id();
        let Some(tile) = self.tiles[idx].as_mut() else {
            return;
        };

        for i in 0..tile.polys.len() {
            let poly = tile.polys[i];
            if poly.is_off_mesh_connection() {
                continue;
            }
            for j in (0..poly.vert_count()).rev() {
                let nei = poly.neighbors[j];
                if nei == 0 || nei & DT_EXT_LINK != 0 {
                    continue;
                }
                tile.push_link(
                    i,
                    Link {
                        reference: PolyRef::new(base | (nei - 1) as u32),
                        next: None,
                        edge: j as u8,
                        side: DT_LINK_INTERNAL,
                        bmin: 0,
                        bmax: 0,
                    },
                );
            }
        }
    }

    /// Links off-mesh connections whose endpoints land inside the same tile
    fn base_off_mesh_links(&mut self, idx: usize) {
        let base = self.poly_ref_base(idx).id();
        let Some(tile) = self.tiles[idx].as_ref() else {
            return;
        };

        let climb = tile.header.walkable_climb;
        let mut landings = Vec::new();
        for con in &tile.off_mesh_connections {
            let ext = [con.radius, climb, con.radius];
            for (slot, p) in [(0usize, con.start_pos()), (1, con.end_pos())] {
                if slot == 1 && con.side != DT_LINK_INTERNAL {
                    continue;
                }
                let Some((land, nearest)) = tile.find_nearest_poly(&p, &ext) else {
                    continue;
                };
                if dt_sqr(nearest[0] - p[0]) + dt_sqr(nearest[2] - p[2]) > dt_sqr(con.radius) {
                    continue;
                }
                // The start always links back; the end only for two-way connections.
                let back = slot == 0 || con.is_bidirectional();
                landings.push((con.poly as usize, slot, land, nearest, back));
            }
        }

        let Some(tile) = self.tiles[idx].as_mut() else {
            return;
        };
        for (con_poly, slot, land, nearest, back) in landings {
            let v = tile.polys[con_poly].verts[slot] as usize * 3;
            tile.verts[v..v + 3].copy_from_slice(&nearest);
            tile.push_link(
                con_poly,
                Link {
                    reference: PolyRef::new(base | land as u32),
                    next: None,
                    edge: slot as u8,
                    side: DT_LINK_INTERNAL,
                    bmin: 0,
                    bmax: 0,
                },
            );
            if back {
                tile.push_link(
                    land,
                    Link {
                        reference: PolyRef::new(base | con_poly as u32),
                        next: None,
                        edge: 0xff,
                        side: DT_LINK_INTERNAL,
                        bmin: 0,
                        bmax: 0,
                    },
                );
            }
        }
    }

    /// Adds portal links from `from_idx` polygons on `side` into `to_idx`
    fn connect_ext_links(&mut self, from_idx: usize, to_idx: usize, side: u8) {
        if from_idx == to_idx {
            return;
        }
        let to_base = self.poly_ref_base(to_idx).id();
        let (Some(from), Some(to)) = (self.tiles[from_idx].as_ref(), self.tiles[to_idx].as_ref())
        else {
            return;
        };

        let opposite = dt_opposite_tile(side);
        let mut new_links = Vec::new();
        for (i, poly) in from.polys.iter().enumerate() {
            let nv = poly.vert_count();
            for j in 0..nv {
                let nei = poly.neighbors[j];
                if nei & DT_EXT_LINK == 0 || (nei & 0xff) as u8 != side {
                    continue;
                }
                let va = from.vertex(poly.verts[j]);
                let vb = from.vertex(poly.verts[(j + 1) % nv]);
                for (k, cmin, cmax) in to.find_connecting_polys(&va, &vb, opposite) {
                    let (bmin, bmax) = portal_span(side, &va, &vb, cmin, cmax);
                    new_links.push((
                        i,
                        Link {
                            reference: PolyRef::new(to_base | k as u32),
                            next: None,
                            edge: j as u8,
                            side,
                            bmin,
                            bmax,
                        },
                    ));
                }
            }
        }

        if let Some(from) = self.tiles[from_idx].as_mut() {
            for (i, link) in new_links {
                from.push_link(i, link);
            }
        }
    }

    /// Drops every link of `tile_idx` that points into `target_idx`
    fn unconnect_links(&mut self, tile_idx: usize, target_idx: usize) {
        let poly_bits = self.poly_bits;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        if let Some(tile) = self.tiles[tile_idx].as_mut() {
            tile.retain_links(|l| ((l.reference.id() >> poly_bits) & tile_mask) as usize != target_idx);
        }
    }

    /// Resolves a reference to its tile and polygon index
    pub(crate) fn tile_and_poly_index(&self, reference: PolyRef) -> Result<(&MeshTile, usize)> {
        if !reference.is_valid() {
            return Err(Status::InvalidParam);
        }
        let (salt, it, ip) = self.decode_poly_ref(reference);
        let tile = self
            .tiles
            .get(it as usize)
            .and_then(|t| t.as_ref())
            .ok_or(Status::InvalidParam)?;
        if tile.salt != salt || ip as usize >= tile.polys.len() {
            return Err(Status::InvalidParam);
        }
        Ok((tile, ip as usize))
    }

    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (tile, ip) = self.tile_and_poly_index(reference)?;
        Ok((tile, &tile.polys[ip]))
    }

    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.tile_and_poly_index(reference).is_ok()
    }

    /// Ground polygons overlapping the box that pass the filter
    pub fn query_polygons(
        &self,
        bmin: &[f32; 3],
        bmax: &[f32; 3],
        filter: &QueryFilter,
    ) -> Vec<PolyRef> {
        let (minx, miny) = self.calc_tile_loc(bmin);
        let (maxx, maxy) = self.calc_tile_loc(bmax);

        let mut result = Vec::new();
        for y in miny..=maxy {
            for x in minx..=maxx {
                for idx in self.tile_indices_at(x, y) {
                    let Some(tile) = self.tiles[idx].as_ref() else {
                        continue;
                    };
                    let base = self.poly_ref_base(idx).id();
                    for (i, poly) in tile.polys.iter().enumerate() {
                        if poly.is_off_mesh_connection() || !filter.pass_filter(poly) {
                            continue;
                        }
                        let (pmin, pmax) = tile.poly_bounds(poly);
                        if dt_overlap_bounds(bmin, bmax, &pmin, &pmax) {
                            result.push(PolyRef::new(base | i as u32));
                        }
                    }
                }
            }
        }
        result
    }

    /// Closest point on the polygon and whether `pos` lies over it
    pub fn closest_point_on_poly(
        &self,
        reference: PolyRef,
        pos: &[f32; 3],
    ) -> Result<([f32; 3], bool)> {
        let (tile, ip) = self.tile_and_poly_index(reference)?;
        Ok(tile.closest_point_on_poly(ip, pos))
    }

    /// Surface height of the polygon under `pos`
    ///
    /// Off-mesh connections report the height along their segment; ground
    /// polygons return `None` when `pos` is outside them.
    pub fn get_poly_height(&self, reference: PolyRef, pos: &[f32; 3]) -> Option<f32> {
        let (tile, ip) = self.tile_and_poly_index(reference).ok()?;
        let poly = &tile.polys[ip];
        if poly.is_off_mesh_connection() {
            let v0 = tile.vertex(poly.verts[0]);
            let v1 = tile.vertex(poly.verts[1]);
            let (_, t) = dt_dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return Some(v0[1] + (v1[1] - v0[1]) * t);
        }
        tile.poly_height(ip, pos)
    }

    /// Entry and exit points of an off-mesh connection when arriving from `prev_ref`
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::InvalidParam);
        }

        let (mut idx0, mut idx1) = (0, 1);
        if let Some(link) = tile.links(poly).find(|l| l.edge == 0) {
            if link.reference != prev_ref {
                std::mem::swap(&mut idx0, &mut idx1);
            }
        }
        Ok((tile.vertex(poly.verts[idx0]), tile.vertex(poly.verts[idx1])))
    }

    /// Polygons linked to the given polygon, at most `max`
    pub fn poly_neighbours(&self, reference: PolyRef, max: usize) -> Vec<PolyRef> {
        match self.get_tile_and_poly_by_ref(reference) {
            Ok((tile, poly)) => tile
                .links(poly)
                .map(|l| l.reference)
                .filter(|r| r.is_valid())
                .take(max)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
