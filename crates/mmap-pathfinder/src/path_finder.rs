//! Path planning over a tile cache
//!
//! A plan resolves the polygons under start and end, searches a polygon
//! corridor between them and turns the corridor into waypoints. Failures
//! along the way degrade the result to a straight line and are reported
//! through [`PathType`] rather than as errors.

use detour::{PolyRef, QueryFilter};
use glam::Vec3;
use mmap_tilecache::{nav_to_world, world_to_nav, TileCache, TileCoord};

use crate::config::PlannerConfig;
use crate::engine::NavQueryEngine;
use crate::error::PlannerError;
use crate::path_type::PathType;
use crate::request::{PathRequest, PathResult, PathSmoothing};
use crate::smoothing::find_smooth_path;

/// Plans paths on the maps of a [`TileCache`]
pub struct PathPlanner<'a> {
    cache: &'a TileCache,
    config: PlannerConfig,
}

impl<'a> PathPlanner<'a> {
    pub fn new(cache: &'a TileCache) -> Self {
        Self::with_config(cache, PlannerConfig::default())
    }

    pub fn with_config(cache: &'a TileCache, config: PlannerConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Computes a path for `request`
    ///
    /// Fails only when the map has no navigation mesh at all.
    pub fn calculate(&self, request: &PathRequest) -> Result<PathResult, PlannerError> {
        if self.config.load_tiles_on_demand {
            self.load_tiles_around(request);
        }

        let lease = self
            .cache
            .query_handle(request.map_id)
            .ok_or(PlannerError::NoQueryHandle {
                map_id: request.map_id,
            })?;
        Ok(lease.with(|query| plan(query, &self.config, request)))
    }

    /// Loads the tiles around the start and the tile under the end
    fn load_tiles_around(&self, request: &PathRequest) {
        let mut coords: Vec<TileCoord> = TileCoord::from_world(request.start)
            .map(|c| c.neighbourhood().collect())
            .unwrap_or_default();
        if let Some(end) = TileCoord::from_world(request.end) {
            if !coords.contains(&end) {
                coords.push(end);
            }
        }

        for coord in coords {
            match self.cache.load_tile(request.map_id, coord) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    log::debug!("No tile {:03}{}: {}", request.map_id, coord, e);
                }
                Err(e) => {
                    log::warn!("Skipping tile {:03}{}: {}", request.map_id, coord, e);
                }
            }
        }
    }
}

/// Plans a path with the given query engine
pub fn plan<E: NavQueryEngine + ?Sized>(
    engine: &mut E,
    config: &PlannerConfig,
    request: &PathRequest,
) -> PathResult {
    let mut planner = Plan {
        engine,
        config,
        filter: config.filter(),
        request,
        result: PathResult::blank(request),
    };
    planner.run();
    planner.result
}

struct Plan<'p, E: ?Sized> {
    engine: &'p mut E,
    config: &'p PlannerConfig,
    filter: QueryFilter,
    request: &'p PathRequest,
    result: PathResult,
}

impl<E: NavQueryEngine + ?Sized> Plan<'_, E> {
    fn run(&mut self) {
        let start = world_to_nav(self.request.start);
        let end = world_to_nav(self.request.end);

        // Maps without mesh around either end are walked in a straight line.
        if !self.engine.has_tile_at(&start) || !self.engine.has_tile_at(&end) {
            self.build_shortcut();
            self.result.path_type |= PathType::NORMAL | PathType::NOT_USING_PATH;
            return;
        }

        self.build_poly_path(start, end);
    }

    /// Nearest walkable polygon, skipping surfaces well above the point
    fn find_walk_poly(&self, point: &[f32; 3]) -> Option<(PolyRef, [f32; 3])> {
        let (poly_ref, closest) = self
            .engine
            .find_nearest_poly(point, &self.config.search_extents, &self.filter)
            .ok()??;
        if closest[1] > point[1] + self.config.max_height_above {
            return None;
        }
        self.engine
            .is_valid_poly_ref(poly_ref)
            .then_some((poly_ref, closest))
    }

    fn build_poly_path(&mut self, start: [f32; 3], end: [f32; 3]) {
        let start_poly = self.find_walk_poly(&start);
        let end_poly = self.find_walk_poly(&end);

        let (Some((start_ref, _)), Some((end_ref, _))) = (start_poly, end_poly) else {
            for (poly, point) in [(start_poly, self.request.start), (end_poly, self.request.end)] {
                if poly.is_none() {
                    log::debug!(
                        "Hole in navmesh around {{{:.3}, {:.3}, {:.3}}}",
                        point.x,
                        point.y,
                        point.z
                    );
                }
            }
            self.build_no_path();
            return;
        };

        let corridor = match self.engine.find_path(
            start_ref,
            end_ref,
            &start,
            &end,
            &self.filter,
            self.config.max_corridor_polys,
        ) {
            Ok(corridor) if !corridor.is_empty() => corridor,
            Ok(_) => {
                log::warn!("find_path returned an empty corridor");
                self.build_no_path();
                return;
            }
            Err(status) => {
                log::warn!("find_path failed: {}", status);
                self.build_no_path();
                return;
            }
        };

        self.result.path_type = if corridor.last() == Some(&end_ref) {
            PathType::NORMAL
        } else {
            PathType::INCOMPLETE
        };
        self.result.corridor = corridor;
        self.build_point_path(start, end);
    }

    fn build_point_path(&mut self, start: [f32; 3], end: [f32; 3]) {
        let max_points = self.request.point_path_cap();
        let corridor = &self.result.corridor;
        let points: Option<Vec<Vec3>> = match self.request.smoothing {
            PathSmoothing::Straight => self
                .engine
                .find_straight_path(&start, &end, corridor, max_points)
                .map(|corners| corners.iter().map(|c| nav_to_world(&c.pos)).collect())
                .map_err(|status| log::debug!("find_straight_path failed: {}", status))
                .ok(),
            PathSmoothing::Smooth => find_smooth_path(
                &*self.engine,
                self.config,
                &self.filter,
                Vec3::from(start),
                Vec3::from(end),
                corridor,
                max_points,
            )
            .map(|points| points.iter().map(|p| nav_to_world(&p.to_array())).collect())
            .map_err(|e| log::debug!("Smoothing failed: {:?}", e))
            .ok(),
        };

        let points = match points {
            Some(points) if points.len() >= 2 => points,
            _ => {
                log::debug!("Point path too short, falling back to a straight line");
                self.build_no_path();
                return;
            }
        };

        self.result.start = points[0];
        self.result.actual_end = points[points.len() - 1];
        self.result.points = points;

        if self.request.force_destination && self.needs_forced_destination() {
            self.force_destination();
        }
    }

    fn needs_forced_destination(&self) -> bool {
        let r = &self.result;
        if !r.path_type.contains(PathType::NORMAL) {
            return true;
        }
        let d = r.end - r.actual_end;
        let range = self.config.force_destination_range;
        d.truncate().length_squared() >= range * range
            || d.z.abs() >= self.config.force_destination_height
    }

    fn force_destination(&mut self) {
        let span = self.request.start.distance_squared(self.request.end);
        let r = &mut self.result;
        let miss = r.actual_end.distance_squared(r.end);

        if miss < self.config.force_destination_ratio * span {
            // Close enough: keep the path and move its last point.
            r.actual_end = r.end;
            if let Some(last) = r.points.last_mut() {
                *last = r.end;
            }
            r.path_type = PathType::NORMAL | PathType::DEST_FORCED;
        } else {
            r.actual_end = r.end;
            self.build_shortcut();
            self.result.path_type |=
                PathType::NORMAL | PathType::NOT_USING_PATH | PathType::DEST_FORCED;
        }
    }

    /// Straight line from the requested start to the actual end
    fn build_shortcut(&mut self) {
        let r = &mut self.result;
        r.corridor.clear();
        r.start = self.request.start;
        r.points = vec![r.start, r.actual_end];
        r.path_type = PathType::SHORTCUT;
    }

    fn build_no_path(&mut self) {
        self.result.actual_end = self.request.end;
        self.build_shortcut();
        self.result.path_type |= PathType::NOPATH;
    }
}
