use detour::{PolyFlags, QueryFilter};
use mmap_tilecache::NavTerrain;

/// Distance covered by one smoothing step
pub const DEFAULT_SMOOTH_STEP_SIZE: f32 = 4.0;

/// Polygon corridor capacity
pub const MAX_PATH_LENGTH: usize = 256;

/// Point path capacity
pub const MAX_POINT_PATH_LENGTH: usize = 256;

/// Path planner tuning
///
/// Distances are in world units. `search_extents` is given in navigation
/// mesh axes: horizontal, vertical, horizontal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PlannerConfig {
    /// Half extents of the nearest polygon search box
    pub search_extents: [f32; 3],
    /// Candidates whose surface lies further above the query point are ignored
    pub max_height_above: f32,
    /// Maximum polygons in a corridor
    pub max_corridor_polys: usize,
    pub smooth_step_size: f32,
    /// Distance at which a steering point counts as reached
    pub smooth_slop: f32,
    /// Corners looked at when picking a steering point
    pub steer_lookahead: usize,
    /// Polygons a single surface move may visit
    pub max_visited_polys: usize,
    /// Merge smoothed points lying on the line through the previous two
    pub simplify: bool,
    pub simplify_tolerance: f32,
    /// Consecutive points merged before one is kept regardless
    pub max_merged_points: u32,
    /// Terrain the searched polygons must carry
    pub include_terrain: NavTerrain,
    /// A forced end within this share of the squared start-to-end distance
    /// keeps the computed path
    pub force_destination_ratio: f32,
    /// Horizontal distance under which the reached end counts as the requested one
    pub force_destination_range: f32,
    /// Vertical distance under which the reached end counts as the requested one
    pub force_destination_height: f32,
    /// Load the tiles around start and end before planning
    pub load_tiles_on_demand: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            search_extents: [5.0, 10.0, 5.0],
            max_height_above: 3.0,
            max_corridor_polys: MAX_PATH_LENGTH,
            smooth_step_size: DEFAULT_SMOOTH_STEP_SIZE,
            smooth_slop: 0.3,
            steer_lookahead: 3,
            max_visited_polys: 16,
            simplify: true,
            simplify_tolerance: 0.8,
            max_merged_points: 20,
            include_terrain: NavTerrain::GROUND | NavTerrain::WATER,
            force_destination_ratio: 0.3,
            force_destination_range: 1.0,
            force_destination_height: 1.0,
            load_tiles_on_demand: true,
        }
    }
}

impl PlannerConfig {
    pub fn with_simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    pub fn with_include_terrain(mut self, terrain: NavTerrain) -> Self {
        self.include_terrain = terrain;
        self
    }

    pub fn with_load_tiles_on_demand(mut self, enabled: bool) -> Self {
        self.load_tiles_on_demand = enabled;
        self
    }

    /// Query filter over the configured terrain
    pub fn filter(&self) -> QueryFilter {
        QueryFilter::new(
            PolyFlags::from_bits_retain(self.include_terrain.bits()),
            PolyFlags::empty(),
        )
    }
}
