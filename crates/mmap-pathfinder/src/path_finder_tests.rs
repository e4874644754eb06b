//! End-to-end planner tests on generated flat maps

#[cfg(test)]
mod tests {
    use crate::{
        plan, NavQueryEngine, PathPlanner, PathRequest, PathSmoothing, PathType, PlannerConfig,
        PlannerError,
    };
    use detour::{PolyRef, QueryFilter, Status, StraightPathFlags, StraightPathPoint};
    use glam::Vec3;
    use mmap_tilecache::{
        nav_to_world, FlatWorld, TileCache, TileCacheConfig, TileCoord, MMAP_GRID_SIZE,
    };

    const MAP: u32 = 0;
    const CENTER: TileCoord = TileCoord::new(32, 32);
    const CELL: f32 = MMAP_GRID_SIZE / 4.0;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn setup(world: &FlatWorld) -> (tempfile::TempDir, TileCache) {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        world.write_area(dir.path(), CENTER, 1).unwrap();
        let cache = TileCache::new(TileCacheConfig::new(dir.path()));
        (dir, cache)
    }

    /// Flat map with cell (1, 1) of the center tile missing
    fn holed_world() -> FlatWorld {
        FlatWorld::new(MAP).with_hole(CENTER, 1, 1)
    }

    fn assert_endpoints(result: &crate::PathResult) {
        assert_eq!(result.points.first(), Some(&result.start));
        assert_eq!(result.points.last(), Some(&result.actual_end));
    }

    #[test]
    fn test_path_across_tiles() {
        let world = FlatWorld::new(MAP);
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let start = world.cell_center(CENTER, 1, 1);
        let end = world.cell_center(TileCoord::new(31, 31), 2, 2);
        let result = planner.calculate(&PathRequest::new(MAP, start, end)).unwrap();

        assert_eq!(result.path_type, PathType::NORMAL);
        assert_endpoints(&result);
        assert_eq!(result.start, start);
        assert!(result.points.len() <= 256);
        assert!(!result.corridor.is_empty());

        let straight = start.distance(end);
        let length = result.length();
        assert!(length > 0.0);
        assert!(length < 3.0 * straight, "{} vs {}", length, straight);
        assert!(result.actual_end.truncate().distance(end.truncate()) < 1.0);

        // The start neighbourhood was loaded on demand.
        assert_eq!(cache.loaded_tile_count(), 9);
    }

    #[test]
    fn test_straight_path() {
        let world = FlatWorld::new(MAP);
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let start = world.cell_center(CENTER, 0, 0);
        let end = world.cell_center(CENTER, 3, 3);
        let request = PathRequest::new(MAP, start, end).with_smoothing(PathSmoothing::Straight);
        let result = planner.calculate(&request).unwrap();

        assert_eq!(result.path_type, PathType::NORMAL);
        assert_endpoints(&result);
        assert_eq!(result.start, start);
        assert_eq!(result.actual_end, end);
    }

    #[test]
    fn test_straight_path_turns_around_hole() {
        let world = holed_world();
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let start = world.cell_center(CENTER, 0, 0);
        let end = world.cell_center(CENTER, 2, 2);
        let request = PathRequest::new(MAP, start, end).with_smoothing(PathSmoothing::Straight);
        let result = planner.calculate(&request).unwrap();

        assert_eq!(result.path_type, PathType::NORMAL);
        assert_endpoints(&result);
        // The direct line crosses the hole, so at least one corner is needed.
        assert!(result.points.len() >= 3);
        assert!(result.length() > start.distance(end));
    }

    #[test]
    fn test_forced_destination_snaps_last_point() {
        let world = holed_world();
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let hole = world.cell_center(CENTER, 1, 1);
        let start = world.cell_center(CENTER, 3, 1);
        // Three units into the hole, next to cell (2, 1).
        let end = hole + Vec3::new(0.0, CELL / 2.0 - 3.0, 0.0);

        let unforced = planner.calculate(&PathRequest::new(MAP, start, end)).unwrap();
        assert_eq!(unforced.path_type, PathType::NORMAL);
        assert_ne!(unforced.actual_end, end);

        let request = PathRequest::new(MAP, start, end).with_force_destination(true);
        let result = planner.calculate(&request).unwrap();
        assert_eq!(result.path_type, PathType::NORMAL | PathType::DEST_FORCED);
        assert!(result.is_dest_forced() && !result.is_shortcut());
        assert_eq!(result.points.last(), Some(&end));
        assert_eq!(result.actual_end, end);
        assert_eq!(result.points.len(), unforced.points.len());
        assert_endpoints(&result);
    }

    #[test]
    fn test_forced_destination_far_off_mesh_is_shortcut() {
        let world = holed_world();
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let hole = world.cell_center(CENTER, 1, 1);
        let edge = hole + Vec3::new(0.0, CELL / 2.0, 0.0);
        let start = edge + Vec3::new(0.0, 2.0, 0.0);
        let end = edge - Vec3::new(0.0, 4.0, 0.0);

        let request = PathRequest::new(MAP, start, end).with_force_destination(true);
        let result = planner.calculate(&request).unwrap();
        assert_eq!(
            result.path_type,
            PathType::NORMAL | PathType::NOT_USING_PATH | PathType::SHORTCUT | PathType::DEST_FORCED
        );
        assert_eq!(result.points, vec![start, end]);
        assert!(result.corridor.is_empty());
    }

    #[test]
    fn test_hole_in_mesh_is_no_path() {
        let world = holed_world();
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let start = world.cell_center(CENTER, 3, 3);
        let end = world.cell_center(CENTER, 1, 1);
        let result = planner.calculate(&PathRequest::new(MAP, start, end)).unwrap();

        assert_eq!(result.path_type, PathType::NOPATH | PathType::SHORTCUT);
        assert!(result.is_no_path() && result.is_shortcut());
        assert_eq!(result.points, vec![start, end]);
        assert_eq!(result.actual_end, end);
    }

    #[test]
    fn test_unreachable_end_is_incomplete() {
        // Cell (2, 2) is cut off by a ring of holes.
        let mut world = FlatWorld::new(MAP);
        for (cx, cz) in [(1, 1), (2, 1), (3, 1), (1, 2), (3, 2), (1, 3), (2, 3), (3, 3)] {
            world = world.with_hole(CENTER, cx, cz);
        }
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let start = world.cell_center(CENTER, 0, 0);
        let end = world.cell_center(CENTER, 2, 2);
        let result = planner.calculate(&PathRequest::new(MAP, start, end)).unwrap();

        assert_eq!(result.path_type, PathType::INCOMPLETE);
        assert!(result.is_incomplete() && !result.is_normal());
        assert!(result.points.len() >= 2);
        assert_endpoints(&result);
        assert!(result.actual_end.distance(end) > 1.0);
    }

    #[test]
    fn test_no_tiles_near_endpoints_is_shortcut() {
        let world = FlatWorld::new(MAP);
        let (_dir, cache) = setup(&world);
        cache.ensure_map_loaded(MAP).unwrap();
        let config = PlannerConfig::default().with_load_tiles_on_demand(false);
        let planner = PathPlanner::with_config(&cache, config);

        let start = world.cell_center(CENTER, 0, 0);
        let end = world.cell_center(CENTER, 3, 3);
        let result = planner.calculate(&PathRequest::new(MAP, start, end)).unwrap();

        assert_eq!(
            result.path_type,
            PathType::NORMAL | PathType::NOT_USING_PATH | PathType::SHORTCUT
        );
        assert_eq!(result.points, vec![start, end]);
        assert_eq!(cache.loaded_tile_count(), 0);
    }

    #[test]
    fn test_unknown_map_has_no_query_handle() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(TileCacheConfig::new(dir.path()));
        let planner = PathPlanner::new(&cache);

        let request = PathRequest::new(42, Vec3::ZERO, Vec3::ONE);
        assert_eq!(
            planner.calculate(&request).unwrap_err(),
            PlannerError::NoQueryHandle { map_id: 42 }
        );
    }

    #[test]
    fn test_point_path_cap() {
        let world = FlatWorld::new(MAP);
        let (_dir, cache) = setup(&world);
        let config = PlannerConfig::default().with_simplify(false);
        let planner = PathPlanner::with_config(&cache, config);

        let start = world.cell_center(CENTER, 0, 0);
        let end = world.cell_center(TileCoord::new(31, 31), 3, 3);
        for cap in [2, 3, 10] {
            let request = PathRequest::new(MAP, start, end).with_point_path_cap(cap);
            let result = planner.calculate(&request).unwrap();
            assert!(result.points.len() <= cap);
            assert!(!result.is_no_path());
            assert_endpoints(&result);
        }
    }

    #[test]
    fn test_smallest_point_path_cap_holds_for_fallbacks() {
        let world = holed_world();
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);

        let start = world.cell_center(CENTER, 3, 3);
        let end = world.cell_center(CENTER, 1, 1);
        let request = PathRequest::new(MAP, start, end).with_point_path_cap(1);
        assert_eq!(request.point_path_cap(), 2);

        let result = planner.calculate(&request).unwrap();
        assert!(result.is_no_path());
        assert!(result.points.len() <= request.point_path_cap());
    }

    #[test]
    fn test_planning_from_many_threads() {
        let world = FlatWorld::new(MAP);
        let (_dir, cache) = setup(&world);
        let planner = PathPlanner::new(&cache);
        let start = world.cell_center(CENTER, 1, 2);

        std::thread::scope(|s| {
            for i in 0..4 {
                let planner = &planner;
                let end = world.cell_center(TileCoord::new(31, 32), i, 3 - i);
                s.spawn(move || {
                    let result = planner.calculate(&PathRequest::new(MAP, start, end)).unwrap();
                    assert_eq!(result.path_type, PathType::NORMAL);
                });
            }
        });
        assert_eq!(cache.query_handle_count(MAP), 4);
    }

    /// Flat strip along the nav x axis, between `min_x` and `max_x`
    ///
    /// Positions left of `split_x` resolve to the first corridor polygon,
    /// the rest to the last one.
    struct StripEngine {
        corridor: Vec<PolyRef>,
        min_x: f32,
        max_x: f32,
        split_x: f32,
        /// Connection polygon with its start and end
        off_mesh: Option<(PolyRef, [f32; 3], [f32; 3])>,
        /// Steering corners keep moving ahead and never reach the end
        endless: bool,
    }

    impl StripEngine {
        fn new(ids: &[u32], min_x: f32, max_x: f32, split_x: f32) -> Self {
            Self {
                corridor: ids.iter().copied().map(PolyRef::new).collect(),
                min_x,
                max_x,
                split_x,
                off_mesh: None,
                endless: false,
            }
        }

        fn clamp(&self, pos: &[f32; 3]) -> [f32; 3] {
            [pos[0].clamp(self.min_x, self.max_x), 0.0, pos[2]]
        }
    }

    fn corner(pos: [f32; 3], flags: StraightPathFlags, poly: PolyRef) -> StraightPathPoint {
        StraightPathPoint { pos, flags, poly }
    }

    impl NavQueryEngine for StripEngine {
        fn has_tile_at(&self, _pos: &[f32; 3]) -> bool {
            true
        }

        fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool {
            poly_ref.is_valid()
        }

        fn find_nearest_poly(
            &self,
            center: &[f32; 3],
            _half_extents: &[f32; 3],
            _filter: &QueryFilter,
        ) -> detour::Result<Option<(PolyRef, [f32; 3])>> {
            let poly = if center[0] < self.split_x {
                self.corridor.first()
            } else {
                self.corridor.last()
            };
            Ok(poly.map(|&p| (p, self.clamp(center))))
        }

        fn find_path(
            &mut self,
            _start_ref: PolyRef,
            _end_ref: PolyRef,
            _start_pos: &[f32; 3],
            _end_pos: &[f32; 3],
            _filter: &QueryFilter,
            _max_path: usize,
        ) -> detour::Result<Vec<PolyRef>> {
            Ok(self.corridor.clone())
        }

        fn find_straight_path(
            &self,
            start_pos: &[f32; 3],
            end_pos: &[f32; 3],
            path: &[PolyRef],
            max_points: usize,
        ) -> detour::Result<Vec<StraightPathPoint>> {
            let first = *path.first().ok_or(Status::InvalidParam)?;
            let mut corners = vec![corner(self.clamp(start_pos), StraightPathFlags::START, first)];
            let connection = self.off_mesh.filter(|(con, _, _)| path.contains(con));
            if self.endless {
                let ahead = [start_pos[0] + 10.0, start_pos[1], start_pos[2]];
                corners.push(corner(ahead, StraightPathFlags::empty(), first));
            } else if let Some((con, entry, _)) = connection {
                corners.push(corner(entry, StraightPathFlags::OFFMESH_CONNECTION, con));
            } else {
                corners.push(corner(self.clamp(end_pos), StraightPathFlags::END, PolyRef::default()));
            }
            corners.truncate(max_points);
            Ok(corners)
        }

        fn move_along_surface(
            &self,
            start_ref: PolyRef,
            _start_pos: &[f32; 3],
            end_pos: &[f32; 3],
            _filter: &QueryFilter,
            _max_visited: usize,
        ) -> detour::Result<([f32; 3], Vec<PolyRef>)> {
            Ok((self.clamp(end_pos), vec![start_ref]))
        }

        fn get_poly_height(&self, _poly_ref: PolyRef, _pos: &[f32; 3]) -> detour::Result<f32> {
            Ok(0.0)
        }

        fn closest_point_on_poly_boundary(
            &self,
            _poly_ref: PolyRef,
            pos: &[f32; 3],
        ) -> detour::Result<[f32; 3]> {
            Ok(self.clamp(pos))
        }

        fn off_mesh_connection_end_points(
            &self,
            _prev_ref: PolyRef,
            poly_ref: PolyRef,
        ) -> detour::Result<([f32; 3], [f32; 3])> {
            match self.off_mesh {
                Some((con, entry, exit)) if con == poly_ref => Ok((entry, exit)),
                _ => Err(Status::InvalidParam),
            }
        }

        fn poly_neighbours(&self, _poly_ref: PolyRef, _max: usize) -> Vec<PolyRef> {
            Vec::new()
        }
    }

    fn strip_request(start_x: f32, end_x: f32) -> PathRequest {
        PathRequest::new(
            MAP,
            nav_to_world(&[start_x, 0.0, 0.0]),
            nav_to_world(&[end_x, 0.0, 0.0]),
        )
    }

    #[test]
    fn test_smoothing_crosses_off_mesh_connection() {
        let mut engine = StripEngine::new(&[1, 9, 3], -100.0, 100.0, 20.0);
        let entry = [10.0, 0.0, 0.0];
        let exit = [30.0, 0.0, 0.0];
        engine.off_mesh = Some((PolyRef::new(9), entry, exit));
        let config = PlannerConfig::default().with_simplify(false);

        let result = plan(&mut engine, &config, &strip_request(0.0, 40.0));
        assert_eq!(result.path_type, PathType::NORMAL);
        assert_endpoints(&result);

        // The connection is taken as one jump and the walk lands slightly
        // above the far side.
        let entry = nav_to_world(&entry);
        let landing = nav_to_world(&[30.0, 0.2, 0.0]);
        let i = result.points.iter().position(|&p| p == entry).unwrap();
        assert_eq!(result.points[i + 1], landing);
        assert_eq!(result.points.last(), Some(&nav_to_world(&[40.0, 0.5, 0.0])));
    }

    #[test]
    fn test_smoothing_hitting_point_limit_is_no_path() {
        let mut engine = StripEngine::new(&[1, 3], -1.0e6, 1.0e6, 20.0);
        engine.endless = true;
        let config = PlannerConfig::default().with_simplify(false);
        let request = strip_request(0.0, 40.0);

        let result = plan(&mut engine, &config, &request);
        assert_eq!(result.path_type, PathType::NOPATH | PathType::SHORTCUT);
        assert_eq!(result.points, vec![request.start, request.end]);
    }

    #[test]
    fn test_smoothing_hitting_iteration_ceiling_is_no_path() {
        // Collinear steps are merged, so the walk runs out of iterations
        // long before it fills the point path.
        let mut engine = StripEngine::new(&[1, 3], -1.0e6, 1.0e6, 20.0);
        engine.endless = true;
        let request = strip_request(0.0, 40.0);

        let result = plan(&mut engine, &PlannerConfig::default(), &request);
        assert_eq!(result.path_type, PathType::NOPATH | PathType::SHORTCUT);
        assert_eq!(result.points, vec![request.start, request.end]);
    }

    #[test]
    fn test_forced_destination_measures_from_requested_start() {
        // The start lies 5 units off the strip. Measured from the snapped
        // start the miss would be too large to keep the path.
        let mut engine = StripEngine::new(&[1, 3], 0.0, 10.0, 5.0);
        let request = strip_request(-5.0, 25.0)
            .with_smoothing(PathSmoothing::Straight)
            .with_force_destination(true);

        let result = plan(&mut engine, &PlannerConfig::default(), &request);
        assert_eq!(result.path_type, PathType::NORMAL | PathType::DEST_FORCED);
        assert_eq!(
            result.points,
            vec![nav_to_world(&[0.0, 0.0, 0.0]), request.end]
        );
    }
}
