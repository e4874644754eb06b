//! Smoothed point paths
//!
//! Walks the corridor in short steps along the mesh surface, which yields
//! points that follow terrain height instead of cutting through it.

use detour::{PolyRef, QueryFilter, StraightPathFlags};
use glam::Vec3;

use crate::config::{PlannerConfig, MAX_POINT_PATH_LENGTH};
use crate::corridor::{fixup_corridor, fixup_shortcuts, MAX_SHORTCUT_NEIGHBOURS};
use crate::engine::NavQueryEngine;

/// Height added to surface samples
const SURFACE_OFFSET: f32 = 0.5;

/// Height added after landing from an off-mesh connection
const OFF_MESH_LANDING_OFFSET: f32 = 0.2;

/// Iterations after which a smoothing run is considered stuck
const MAX_SMOOTH_ITERATIONS: usize = MAX_POINT_PATH_LENGTH * 16;

/// Why no smoothed path could be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothError {
    /// Start or end could not be placed on the corridor ends
    Endpoints,
    /// A surface move was rejected by the mesh
    Move,
    /// The walk kept going without reaching the end
    Looping,
}

#[derive(Debug, Clone, Copy)]
struct SteerTarget {
    pos: Vec3,
    flags: StraightPathFlags,
    poly: PolyRef,
}

/// Horizontal distance under `radius` and vertical distance under `height`
pub(crate) fn in_range_nav(a: Vec3, b: Vec3, radius: f32, height: f32) -> bool {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz < radius * radius && (b.y - a.y).abs() < height
}

/// Horizontal distance from `point` to the line through `a` and `b`
pub(crate) fn distance_2d_point_to_line(a: Vec3, b: Vec3, point: Vec3) -> f32 {
    let ab = (b.x - a.x, b.z - a.z);
    let ap = (point.x - a.x, point.z - a.z);
    let len = (ab.0 * ab.0 + ab.1 * ab.1).sqrt();
    if len <= f32::EPSILON {
        return (ap.0 * ap.0 + ap.1 * ap.1).sqrt();
    }
    (ab.0 * ap.1 - ab.1 * ap.0).abs() / len
}

fn steer_target<E: NavQueryEngine + ?Sized>(
    engine: &E,
    config: &PlannerConfig,
    start: Vec3,
    end: Vec3,
    path: &[PolyRef],
) -> Option<SteerTarget> {
    let corners = engine
        .find_straight_path(&start.to_array(), &end.to_array(), path, config.steer_lookahead)
        .ok()?;

    // Stop at an off-mesh connection or the first corner out of reach.
    let corner = corners.iter().find(|c| {
        c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
            || !in_range_nav(Vec3::from(c.pos), start, config.smooth_slop, 1000.0)
    })?;

    Some(SteerTarget {
        pos: Vec3::new(corner.pos[0], start.y, corner.pos[2]),
        flags: corner.flags,
        poly: corner.poly,
    })
}

/// Smoothed point path along `corridor`, at most `max_points` long
///
/// Points are in navigation mesh space.
pub fn find_smooth_path<E: NavQueryEngine + ?Sized>(
    engine: &E,
    config: &PlannerConfig,
    filter: &QueryFilter,
    start: Vec3,
    end: Vec3,
    corridor: &[PolyRef],
    max_points: usize,
) -> Result<Vec<Vec3>, SmoothError> {
    let (Some(&first), Some(&last)) = (corridor.first(), corridor.last()) else {
        return Err(SmoothError::Endpoints);
    };
    let mut iter_pos = engine
        .closest_point_on_poly_boundary(first, &start.to_array())
        .map(Vec3::from)
        .map_err(|_| SmoothError::Endpoints)?;
    let mut target_pos = engine
        .closest_point_on_poly_boundary(last, &end.to_array())
        .map(Vec3::from)
        .map_err(|_| SmoothError::Endpoints)?;

    let mut polys = corridor.to_vec();
    let mut points = vec![iter_pos];
    // Latest point merged into the segment ending at the last stored point.
    let mut pending: Option<Vec3> = None;
    let mut merged = 0u32;
    let mut iterations = 0usize;

    while !polys.is_empty() && points.len() < max_points {
        iterations += 1;
        if iterations > MAX_SMOOTH_ITERATIONS {
            return Err(SmoothError::Looping);
        }

        let Some(steer) = steer_target(engine, config, iter_pos, target_pos, &polys) else {
            break;
        };
        let end_of_path = steer.flags.contains(StraightPathFlags::END);
        let off_mesh = steer.flags.contains(StraightPathFlags::OFFMESH_CONNECTION);

        // Never step past the end or an off-mesh connection.
        let step = config.smooth_step_size;
        let delta = steer.pos - iter_pos;
        let len = delta.length();
        let scale = if (end_of_path || off_mesh) && len < step {
            1.0
        } else if len < step * 4.0 {
            step / len
        } else {
            step * 4.0 / len
        };
        let move_target = iter_pos + delta * scale;

        let (moved, visited) = engine
            .move_along_surface(
                polys[0],
                &iter_pos.to_array(),
                &move_target.to_array(),
                filter,
                config.max_visited_polys,
            )
            .map_err(|_| SmoothError::Move)?;
        fixup_corridor(&mut polys, config.max_corridor_polys, &visited);
        let neighbours = engine.poly_neighbours(polys[0], MAX_SHORTCUT_NEIGHBOURS);
        fixup_shortcuts(&mut polys, &neighbours);

        let mut moved = Vec3::from(moved);
        if let Ok(h) = engine.get_poly_height(polys[0], &moved.to_array()) {
            moved.y = h + SURFACE_OFFSET;
        }
        iter_pos = moved;

        if end_of_path && in_range_nav(iter_pos, steer.pos, config.smooth_slop, 1.0) {
            if let Ok(h) = engine.get_poly_height(polys[0], &target_pos.to_array()) {
                target_pos.y = h + SURFACE_OFFSET;
                iter_pos = target_pos;
            }
            if points.len() < max_points {
                if let (Some(p), Some(tail)) = (pending.take(), points.last_mut()) {
                    *tail = p;
                }
                points.push(iter_pos);
            }
            break;
        } else if off_mesh && in_range_nav(iter_pos, steer.pos, config.smooth_slop, 1.0) {
            // Advance the corridor up to and over the connection.
            let mut prev_ref = PolyRef::default();
            let mut poly_ref = polys[0];
            let mut npos = 0;
            while npos < polys.len() && poly_ref != steer.poly {
                prev_ref = poly_ref;
                poly_ref = polys[npos];
                npos += 1;
            }
            polys.drain(..npos);

            if let Ok((con_start, con_end)) =
                engine.off_mesh_connection_end_points(prev_ref, poly_ref)
            {
                if points.len() < max_points {
                    points.push(Vec3::from(con_start));
                }
                iter_pos = Vec3::from(con_end);
                if let Some(&landing) = polys.first() {
                    if let Ok(h) = engine.get_poly_height(landing, &iter_pos.to_array()) {
                        iter_pos.y = h;
                    }
                }
                iter_pos.y += OFF_MESH_LANDING_OFFSET;
            }
        }

        if points.len() < max_points {
            if config.simplify && points.len() >= 2 {
                let n = points.len();
                if merged < config.max_merged_points
                    && distance_2d_point_to_line(points[n - 2], points[n - 1], iter_pos)
                        < config.simplify_tolerance
                {
                    pending = Some(iter_pos);
                    merged += 1;
                    continue;
                } else if let Some(p) = pending.take() {
                    points[n - 1] = p;
                }
            }
            merged = 0;
            pending = None;
            points.push(iter_pos);
        }
    }

    // Hitting the hard limit means the walk went in circles.
    if points.len() >= MAX_POINT_PATH_LENGTH {
        return Err(SmoothError::Looping);
    }
    Ok(points)
}
