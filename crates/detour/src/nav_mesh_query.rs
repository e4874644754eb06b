//! Navigation mesh query implementation for Detour
//!
//! A [`NavMeshQuery`] borrows an immutable [`NavMesh`] and a [`NodePool`];
//! the pool carries all per-search state, so one query object must never be
//! used by two threads at once.

use std::collections::VecDeque;

use super::detour_common::{
    dt_dist_pt_seg_sqr_2d, dt_distance_pt_poly_edges_sqr, dt_point_in_polygon, dt_sqr,
    dt_tri_area_2d, dt_vadd, dt_vdist, dt_vequal, dt_visfinite, dt_vlerp, dt_vsub,
};
use super::nav_mesh::nearest_score;
use super::node_pool::{NodeFlags, NodeIndex, NodePool, NodeQueue};
use super::{
    NavMesh, PolyRef, PolyType, QueryFilter, Result, Status, StraightPathFlags, StraightPathPoint,
    DT_EXT_LINK, DT_LINK_INTERNAL,
};

/// Heuristic scale, keeps the search admissible with float noise
const H_SCALE: f32 = 0.999;

/// Nodes kept by the local search of [`NavMeshQuery::move_along_surface`]
const MOVE_POOL_SIZE: usize = 64;

/// Breadth-first frontier limit of [`NavMeshQuery::move_along_surface`]
const MAX_MOVE_STACK: usize = 48;

/// Neighbours collected per polygon edge
const MAX_EDGE_NEIS: usize = 8;

/// Navigation mesh query structure
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    /// Reference to the navigation mesh
    nav_mesh: &'a NavMesh,
    /// Node pool for the graph search
    node_pool: &'a mut NodePool,
    /// Open list for the graph search
    open_list: NodeQueue,
}

impl<'a> NavMeshQuery<'a> {
    /// Binds a query to a mesh and a node pool
    pub fn new(nav_mesh: &'a NavMesh, node_pool: &'a mut NodePool) -> Self {
        Self {
            nav_mesh,
            node_pool,
            open_list: NodeQueue::new(),
        }
    }

    /// Gets the navigation mesh
    pub fn nav_mesh(&self) -> &NavMesh {
        self.nav_mesh
    }

    /// Node budget of the underlying pool
    pub fn max_nodes(&self) -> usize {
        self.node_pool.max_nodes()
    }

    /// Checks that the reference resolves and passes the filter
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &QueryFilter) -> bool {
        self.nav_mesh
            .get_tile_and_poly_by_ref(poly_ref)
            .map(|(_, poly)| filter.pass_filter(poly))
            .unwrap_or(false)
    }

    /// Finds the polygon nearest to `center` inside the search box
    ///
    /// Polygons the point stands over win as long as the height difference
    /// stays within the tile's climb allowance.
    pub fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Option<(PolyRef, [f32; 3])>> {
        if !dt_visfinite(center) || !dt_visfinite(half_extents) {
            return Err(Status::InvalidParam);
        }

        let bmin = dt_vsub(center, half_extents);
        let bmax = dt_vadd(center, half_extents);

        let mut nearest: Option<(PolyRef, [f32; 3], f32)> = None;
        for poly_ref in self.nav_mesh.query_polygons(&bmin, &bmax, filter) {
            let (tile, ip) = self.nav_mesh.tile_and_poly_index(poly_ref)?;
            let (closest, over) = tile.closest_point_on_poly(ip, center);
            let d = nearest_score(center, &closest, over, tile.header.walkable_climb);
            if nearest.map_or(true, |(_, _, best)| d < best) {
                nearest = Some((poly_ref, closest, d));
            }
        }

        Ok(nearest.map(|(r, p, _)| (r, p)))
    }

    /// Finds a polygon corridor from the start to the end polygon
    ///
    /// When the end polygon cannot be reached, or the node pool runs out, the
    /// corridor leads to the explored polygon closest to the end position.
    /// The corridor is truncated to `max_path` polygons.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<Vec<PolyRef>> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !dt_visfinite(start_pos)
            || !dt_visfinite(end_pos)
            || max_path == 0
        {
            return Err(Status::InvalidParam);
        }

        if start_ref == end_ref {
            return Ok(vec![start_ref]);
        }

        let pool = &mut *self.node_pool;
        let open = &mut self.open_list;
        pool.clear();
        open.clear();

        let start_idx = pool.get_node(start_ref).ok_or(Status::OutOfMemory)?;
        let start_h = dt_vdist(start_pos, end_pos) * H_SCALE;
        {
            let start = pool.node_mut(start_idx);
            start.pos = *start_pos;
            start.parent = None;
            start.cost = 0.0;
            start.total = start_h;
            start.flags = NodeFlags::OPEN;
        }
        open.push(pool, start_idx);

        let mut last_best = start_idx;
        let mut last_best_cost = start_h;
        let mut out_of_nodes = false;

        while let Some(best_idx) = open.pop(pool) {
            let (best_ref, best_pos, best_cost, parent) = {
                let best = pool.node_mut(best_idx);
                best.flags.remove(NodeFlags::OPEN);
                best.flags.insert(NodeFlags::CLOSED);
                (best.id, best.pos, best.cost, best.parent)
            };

            if best_ref == end_ref {
                last_best = best_idx;
                break;
            }

            let parent_ref = parent.map(|p| pool.node(p).id);
            let Ok((best_tile, best_poly)) = nav.get_tile_and_poly_by_ref(best_ref) else {
                continue;
            };

            for link in best_tile.links(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbour_poly)) = nav.get_tile_and_poly_by_ref(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_poly) {
                    continue;
                }

                let Some(neighbour_idx) = pool.get_node(neighbour_ref) else {
                    out_of_nodes = true;
                    continue;
                };

                // First visit: place the node on the shared edge.
                if pool.node(neighbour_idx).flags == NodeFlags::default() {
                    let Ok((left, right, _)) = portal_points(nav, best_ref, neighbour_ref) else {
                        continue;
                    };
                    pool.node_mut(neighbour_idx).pos = dt_vlerp(&left, &right, 0.5);
                }
                let neighbour_pos = pool.node(neighbour_idx).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost = filter.get_cost(&best_pos, &neighbour_pos, best_poly);
                    let end_cost = filter.get_cost(&neighbour_pos, end_pos, neighbour_poly);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.get_cost(&best_pos, &neighbour_pos, best_poly);
                    (
                        best_cost + cur_cost,
                        dt_vdist(&neighbour_pos, end_pos) * H_SCALE,
                    )
                };
                let total = cost + heuristic;

                let neighbour = pool.node_mut(neighbour_idx);
                if neighbour.flags.contains(NodeFlags::OPEN) && total >= neighbour.total {
                    continue;
                }
                if neighbour.flags.contains(NodeFlags::CLOSED) && total >= neighbour.total {
                    continue;
                }

                neighbour.parent = Some(best_idx);
                neighbour.flags.remove(NodeFlags::CLOSED);
                neighbour.flags.insert(NodeFlags::OPEN);
                neighbour.cost = cost;
                neighbour.total = total;
                open.push(pool, neighbour_idx);

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbour_idx;
                }
            }
        }

        let mut path = pool.path_to(last_best);
        if path.last() != Some(&end_ref) {
            log::trace!(
                "Partial corridor from {} towards {} ({} polygons, out of nodes: {})",
                start_ref,
                end_ref,
                path.len(),
                out_of_nodes
            );
        }
        path.truncate(max_path);
        Ok(path)
    }

    /// Finds the corners of the shortest line through a polygon corridor
    ///
    /// The first point is the start position clamped to the first polygon,
    /// the last one carries [`StraightPathFlags::END`] unless the point
    /// budget ran out first. Corners entering an off-mesh connection carry
    /// [`StraightPathFlags::OFFMESH_CONNECTION`].
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(Status::InvalidParam);
        };
        if max_points == 0 || !dt_visfinite(start_pos) || !dt_visfinite(end_pos) {
            return Err(Status::InvalidParam);
        }

        let closest_start = self.closest_point_on_poly_boundary(first, start_pos)?;
        let closest_end = self.closest_point_on_poly_boundary(last, end_pos)?;

        let mut points = Vec::with_capacity(max_points.min(path.len() + 2));
        if !append_vertex(
            &mut points,
            closest_start,
            StraightPathFlags::START,
            first,
            max_points,
        ) {
            return Ok(points);
        }

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut portal_left = apex;
            let mut portal_right = apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_type = PolyType::Ground;
            let mut right_type = PolyType::Ground;
            let mut left_ref = first;
            let mut right_ref = first;

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match portal_points(self.nav_mesh, path[i], path[i + 1]) {
                        Ok(portal) => portal,
                        Err(_) => {
                            // The corridor is broken here, end at the last reachable polygon.
                            let partial_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            append_vertex(
                                &mut points,
                                partial_end,
                                StraightPathFlags::empty(),
                                path[i],
                                max_points,
                            );
                            return Ok(points);
                        }
                    }
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };

                if i == 0 {
                    let (d, _) = dt_dist_pt_seg_sqr_2d(&apex, &left, &right);
                    if d < dt_sqr(0.001) {
                        i += 1;
                        continue;
                    }
                }

                let next_ref = path.get(i + 1).copied().unwrap_or_default();

                // Right vertex
                if dt_tri_area_2d(&apex, &portal_right, &right) <= 0.0 {
                    if dt_vequal(&apex, &portal_right)
                        || dt_tri_area_2d(&apex, &portal_left, &right) > 0.0
                    {
                        portal_right = right;
                        right_ref = next_ref;
                        right_type = to_type;
                        right_index = i;
                    } else {
                        apex = portal_left;
                        apex_index = left_index;
                        if !append_vertex(
                            &mut points,
                            apex,
                            corner_flags(left_type),
                            left_ref,
                            max_points,
                        ) {
                            return Ok(points);
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex
                if dt_tri_area_2d(&apex, &portal_left, &left) >= 0.0 {
                    if dt_vequal(&apex, &portal_left)
                        || dt_tri_area_2d(&apex, &portal_right, &left) < 0.0
                    {
                        portal_left = left;
                        left_ref = next_ref;
                        left_type = to_type;
                        left_index = i;
                    } else {
                        apex = portal_right;
                        apex_index = right_index;
                        if !append_vertex(
                            &mut points,
                            apex,
                            corner_flags(right_type),
                            right_ref,
                            max_points,
                        ) {
                            return Ok(points);
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }
        }

        append_vertex(
            &mut points,
            closest_end,
            StraightPathFlags::END,
            PolyRef::default(),
            max_points,
        );
        Ok(points)
    }

    /// Moves from `start_pos` towards `end_pos` while staying on the mesh surface
    ///
    /// Returns the reached position and the polygons crossed on the way,
    /// start polygon first, at most `max_visited` of them. The returned
    /// height is not adjusted to the surface.
    pub fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<([f32; 3], Vec<PolyRef>)> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !dt_visfinite(start_pos)
            || !dt_visfinite(end_pos)
            || max_visited == 0
        {
            return Err(Status::InvalidParam);
        }

        let mut pool = NodePool::new(MOVE_POOL_SIZE)?;
        let mut stack: VecDeque<NodeIndex> = VecDeque::with_capacity(MAX_MOVE_STACK);

        let start_idx = pool.get_node(start_ref).ok_or(Status::OutOfMemory)?;
        pool.node_mut(start_idx).flags = NodeFlags::CLOSED;
        stack.push_back(start_idx);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_idx = start_idx;

        // Only polygons touching the circle spanned by the move are explored.
        let search_pos = dt_vlerp(start_pos, end_pos, 0.5);
        let search_rad_sqr = dt_sqr(dt_vdist(start_pos, end_pos) / 2.0 + 0.001);

        while let Some(cur_idx) = stack.pop_front() {
            let cur_ref = pool.node(cur_idx).id;
            let (tile, poly) = nav.get_tile_and_poly_by_ref(cur_ref)?;
            let verts = tile.poly_vertices(poly);

            if dt_point_in_polygon(end_pos, &verts) {
                best_idx = cur_idx;
                best_pos = *end_pos;
                break;
            }

            let (salt, tile_index, _) = nav.decode_poly_ref(cur_ref);
            let nv = verts.len();
            let mut j = nv - 1;
            for i in 0..nv {
                let mut neis = Vec::with_capacity(MAX_EDGE_NEIS);
                let code = poly.neighbors[j];
                if code & DT_EXT_LINK != 0 {
                    for link in tile.links(poly) {
                        if link.edge as usize != j || !link.reference.is_valid() {
                            continue;
                        }
                        if let Ok((_, nei_poly)) = nav.get_tile_and_poly_by_ref(link.reference) {
                            if filter.pass_filter(nei_poly) && neis.len() < MAX_EDGE_NEIS {
                                neis.push(link.reference);
                            }
                        }
                    }
                } else if code != 0 {
                    let index = (code - 1) as u32;
                    if filter.pass_filter(&tile.polys[index as usize]) {
                        neis.push(nav.encode_poly_ref(salt, tile_index, index));
                    }
                }

                if neis.is_empty() {
                    // Wall edge, keep the closest point on it.
                    let (d, t) = dt_dist_pt_seg_sqr_2d(end_pos, &verts[j], &verts[i]);
                    if d < best_dist {
                        best_pos = dt_vlerp(&verts[j], &verts[i], t);
                        best_dist = d;
                        best_idx = cur_idx;
                    }
                } else {
                    for nei in neis {
                        let Some(nei_idx) = pool.get_node(nei) else {
                            continue;
                        };
                        if pool.node(nei_idx).flags.contains(NodeFlags::CLOSED) {
                            continue;
                        }
                        let (d, _) = dt_dist_pt_seg_sqr_2d(&search_pos, &verts[j], &verts[i]);
                        if d > search_rad_sqr {
                            continue;
                        }
                        if stack.len() < MAX_MOVE_STACK {
                            let node = pool.node_mut(nei_idx);
                            node.parent = Some(cur_idx);
                            node.flags.insert(NodeFlags::CLOSED);
                            stack.push_back(nei_idx);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = pool.path_to(best_idx);
        visited.truncate(max_visited);
        Ok((best_pos, visited))
    }

    /// Surface height of the polygon at `pos`
    ///
    /// Fails with [`Status::Failure`] when `pos` is not over the polygon.
    pub fn get_poly_height(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<f32> {
        if !self.nav_mesh.is_valid_poly_ref(poly_ref) || !dt_visfinite(pos) {
            return Err(Status::InvalidParam);
        }
        self.nav_mesh
            .get_poly_height(poly_ref, pos)
            .ok_or(Status::Failure)
    }

    /// Closest point on the polygon, with the surface height when `pos` is over it
    pub fn closest_point_on_poly(
        &self,
        poly_ref: PolyRef,
        pos: &[f32; 3],
    ) -> Result<([f32; 3], bool)> {
        if !dt_visfinite(pos) {
            return Err(Status::InvalidParam);
        }
        self.nav_mesh.closest_point_on_poly(poly_ref, pos)
    }

    /// Clamps a point to the polygon outline on the xz-plane
    ///
    /// Points inside the polygon are returned unchanged.
    pub fn closest_point_on_poly_boundary(
        &self,
        poly_ref: PolyRef,
        pos: &[f32; 3],
    ) -> Result<[f32; 3]> {
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        if !dt_visfinite(pos) {
            return Err(Status::InvalidParam);
        }

        let verts = tile.poly_vertices(poly);
        let (inside, ed, et) = dt_distance_pt_poly_edges_sqr(pos, &verts);
        if inside {
            return Ok(*pos);
        }

        let mut imin = 0;
        for i in 1..ed.len() {
            if ed[i] < ed[imin] {
                imin = i;
            }
        }
        Ok(dt_vlerp(
            &verts[imin],
            &verts[(imin + 1) % verts.len()],
            et[imin],
        ))
    }

    /// Entry and exit points of an off-mesh connection when arriving from `prev_ref`
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        self.nav_mesh
            .get_off_mesh_connection_poly_end_points(prev_ref, poly_ref)
    }

    /// Polygons linked to the given polygon, at most `max`
    pub fn poly_neighbours(&self, poly_ref: PolyRef, max: usize) -> Vec<PolyRef> {
        self.nav_mesh.poly_neighbours(poly_ref, max)
    }
}

/// Portal between two linked polygons and the type of the polygon entered
fn portal_points(
    nav: &NavMesh,
    from_ref: PolyRef,
    to_ref: PolyRef,
) -> Result<([f32; 3], [f32; 3], PolyType)> {
    let (from_tile, from_poly) = nav.get_tile_and_poly_by_ref(from_ref)?;
    let (to_tile, to_poly) = nav.get_tile_and_poly_by_ref(to_ref)?;

    let link = from_tile
        .links(from_poly)
        .find(|l| l.reference == to_ref)
        .ok_or(Status::InvalidParam)?;

    if from_poly.is_off_mesh_connection() {
        let v = from_tile.vertex(from_poly.verts[link.edge as usize]);
        return Ok((v, v, to_poly.poly_type));
    }

    if to_poly.is_off_mesh_connection() {
        let back = to_tile
            .links(to_poly)
            .find(|l| l.reference == from_ref)
            .ok_or(Status::InvalidParam)?;
        let v = to_tile.vertex(to_poly.verts[back.edge as usize]);
        return Ok((v, v, to_poly.poly_type));
    }

    let nv = from_poly.vert_count();
    let edge = link.edge as usize;
    if edge >= nv {
        return Err(Status::InvalidParam);
    }
    let v0 = from_tile.vertex(from_poly.verts[edge]);
    let v1 = from_tile.vertex(from_poly.verts[(edge + 1) % nv]);

    // Portal links may only share part of the edge.
    if link.side != DT_LINK_INTERNAL && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        let left = dt_vlerp(&v0, &v1, link.bmin as f32 * s);
        let right = dt_vlerp(&v0, &v1, link.bmax as f32 * s);
        return Ok((left, right, to_poly.poly_type));
    }

    Ok((v0, v1, to_poly.poly_type))
}

fn corner_flags(poly_type: PolyType) -> StraightPathFlags {
    if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}

/// Appends a corner, merging it into the previous one when both coincide
///
/// Returns false once the path is complete or the point budget is used up.
fn append_vertex(
    points: &mut Vec<StraightPathPoint>,
    pos: [f32; 3],
    flags: StraightPathFlags,
    poly: PolyRef,
    max_points: usize,
) -> bool {
    if let Some(last) = points.last_mut() {
        if dt_vequal(&last.pos, &pos) {
            last.flags = flags;
            last.poly = poly;
            return true;
        }
    }

    points.push(StraightPathPoint { pos, flags, poly });
    points.len() < max_points && flags != StraightPathFlags::END
}
