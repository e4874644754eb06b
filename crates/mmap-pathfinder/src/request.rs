use detour::PolyRef;
use glam::Vec3;

use crate::config::{DEFAULT_SMOOTH_STEP_SIZE, MAX_POINT_PATH_LENGTH};
use crate::path_type::PathType;

/// How the point path is derived from the polygon corridor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PathSmoothing {
    /// Corners of the corridor only
    Straight,
    /// Small steps along the surface, following its height
    #[default]
    Smooth,
}

/// A single path query in world coordinates
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PathRequest {
    pub map_id: u32,
    pub start: Vec3,
    pub end: Vec3,
    /// Always end the path on `end`, even off the mesh
    pub force_destination: bool,
    /// Maximum number of points in the result, see [`Self::point_path_cap`]
    point_path_cap: usize,
    pub smoothing: PathSmoothing,
}

impl PathRequest {
    pub fn new(map_id: u32, start: Vec3, end: Vec3) -> Self {
        Self {
            map_id,
            start,
            end,
            force_destination: false,
            point_path_cap: MAX_POINT_PATH_LENGTH,
            smoothing: PathSmoothing::default(),
        }
    }

    pub fn with_force_destination(mut self, force: bool) -> Self {
        self.force_destination = force;
        self
    }

    /// Caps the number of points, within `2..=256`
    pub fn with_point_path_cap(mut self, cap: usize) -> Self {
        self.point_path_cap = cap.clamp(2, MAX_POINT_PATH_LENGTH);
        self
    }

    /// Caps the number of points so a smoothed path covers about `distance`
    pub fn with_path_length_limit(self, distance: f32) -> Self {
        let steps = (distance.max(0.0) / DEFAULT_SMOOTH_STEP_SIZE) as usize;
        self.with_point_path_cap(steps)
    }

    /// Maximum number of points in the result, never below two
    pub fn point_path_cap(&self) -> usize {
        // Deserialized requests skip the builder.
        self.point_path_cap.clamp(2, MAX_POINT_PATH_LENGTH)
    }

    pub fn with_smoothing(mut self, smoothing: PathSmoothing) -> Self {
        self.smoothing = smoothing;
        self
    }
}

/// Outcome of a path query
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PathResult {
    pub path_type: PathType,
    /// Waypoints in world coordinates, first is `start`, last is `actual_end`
    pub points: Vec<Vec3>,
    /// Start of the path, projected onto the mesh when a path was computed
    pub start: Vec3,
    /// Requested end
    pub end: Vec3,
    /// Where the path really ends
    pub actual_end: Vec3,
    /// Polygon corridor the points were derived from
    pub corridor: Vec<PolyRef>,
}

impl PathResult {
    pub(crate) fn blank(request: &PathRequest) -> Self {
        Self {
            path_type: PathType::BLANK,
            points: Vec::new(),
            start: request.start,
            end: request.end,
            actual_end: request.end,
            corridor: Vec::new(),
        }
    }

    /// Summed length of the path segments
    pub fn length(&self) -> f32 {
        self.points.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    pub fn is_normal(&self) -> bool {
        self.path_type.contains(PathType::NORMAL)
    }

    pub fn is_incomplete(&self) -> bool {
        self.path_type.contains(PathType::INCOMPLETE)
    }

    pub fn is_shortcut(&self) -> bool {
        self.path_type.contains(PathType::SHORTCUT)
    }

    pub fn is_no_path(&self) -> bool {
        self.path_type.contains(PathType::NOPATH)
    }

    pub fn is_dest_forced(&self) -> bool {
        self.path_type.contains(PathType::DEST_FORCED)
    }
}
