//! Query primitives the planner runs on
//!
//! All positions are in navigation mesh space (y-up).

use detour::{NavMeshQuery, PolyRef, QueryFilter, Result, StraightPathPoint};

/// Navigation mesh queries used by the planner
pub trait NavQueryEngine {
    /// Whether a tile covers the position's grid location
    fn has_tile_at(&self, pos: &[f32; 3]) -> bool;

    fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool;

    fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Option<(PolyRef, [f32; 3])>>;

    fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<Vec<PolyRef>>;

    fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>>;

    fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<([f32; 3], Vec<PolyRef>)>;

    fn get_poly_height(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<f32>;

    fn closest_point_on_poly_boundary(&self, poly_ref: PolyRef, pos: &[f32; 3])
        -> Result<[f32; 3]>;

    /// Start and end of an off-mesh connection entered from `prev_ref`
    fn off_mesh_connection_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])>;

    /// Polygons linked to `poly_ref`, at most `max`
    fn poly_neighbours(&self, poly_ref: PolyRef, max: usize) -> Vec<PolyRef>;
}

impl NavQueryEngine for NavMeshQuery<'_> {
    fn has_tile_at(&self, pos: &[f32; 3]) -> bool {
        let nav_mesh = self.nav_mesh();
        let (x, y) = nav_mesh.calc_tile_loc(pos);
        nav_mesh.tile_at(x, y, 0).is_some()
    }

    fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool {
        self.nav_mesh().is_valid_poly_ref(poly_ref)
    }

    fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Option<(PolyRef, [f32; 3])>> {
        NavMeshQuery::find_nearest_poly(self, center, half_extents, filter)
    }

    fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<Vec<PolyRef>> {
        NavMeshQuery::find_path(self, start_ref, end_ref, start_pos, end_pos, filter, max_path)
    }

    fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>> {
        NavMeshQuery::find_straight_path(self, start_pos, end_pos, path, max_points)
    }

    fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<([f32; 3], Vec<PolyRef>)> {
        NavMeshQuery::move_along_surface(self, start_ref, start_pos, end_pos, filter, max_visited)
    }

    fn get_poly_height(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<f32> {
        NavMeshQuery::get_poly_height(self, poly_ref, pos)
    }

    fn closest_point_on_poly_boundary(
        &self,
        poly_ref: PolyRef,
        pos: &[f32; 3],
    ) -> Result<[f32; 3]> {
        NavMeshQuery::closest_point_on_poly_boundary(self, poly_ref, pos)
    }

    fn off_mesh_connection_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        self.get_off_mesh_connection_poly_end_points(prev_ref, poly_ref)
    }

    fn poly_neighbours(&self, poly_ref: PolyRef, max: usize) -> Vec<PolyRef> {
        NavMeshQuery::poly_neighbours(self, poly_ref, max)
    }
}
