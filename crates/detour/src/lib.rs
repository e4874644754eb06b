//! Tiled navigation mesh and path queries
//!
//! Detour-compatible runtime: tiles are added and removed independently,
//! polygons are addressed through salted [`PolyRef`]s and queries run through
//! a [`NavMeshQuery`] bound to a per-thread [`NodePool`].

pub mod binary_format;
pub mod detour_common;
pub mod nav_mesh;
pub mod nav_mesh_builder;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod status;

#[cfg(test)]
mod nav_mesh_tests;
#[cfg(test)]
mod test_mesh_helpers;

pub use binary_format::{
    load_tile_from_binary, read_nav_mesh_params, save_tile_to_binary, write_nav_mesh_params,
    NAV_MESH_PARAMS_SIZE,
};
pub use nav_mesh::{
    Link, MeshTile, NavMesh, OffMeshConnection, Poly, PolyDetail, TileHeader,
};
pub use nav_mesh_builder::{GridTile, TileBuilder};
pub use nav_mesh_query::NavMeshQuery;
pub use node_pool::NodePool;
pub use status::{Result, Status};

use bitflags::bitflags;

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Magic number of a serialized tile ('DNAV')
pub const DT_NAVMESH_MAGIC: u32 = 0x444E_4156;

/// Version of the serialized tile layout
pub const DT_NAVMESH_VERSION: u32 = 7;

/// Neighbour code flag marking a portal edge to an adjacent tile
pub const DT_EXT_LINK: u16 = 0x8000;

/// Link side value for links that stay inside a tile
pub const DT_LINK_INTERNAL: u8 = 0xff;

/// Off-mesh connection flag: traversable in both directions
pub const DT_OFFMESH_CON_BIDIR: u8 = 0x01;

/// Number of polygon area ids a filter can price
pub const DT_MAX_AREAS: usize = 64;

/// Polygon reference
///
/// Packs the tile slot salt, the tile slot index and the polygon index. The
/// bit widths depend on the owning [`NavMesh`], so references are only
/// meaningful for the mesh that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(u32);

impl PolyRef {
    /// Creates a reference from its raw value
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// A zero reference never names a polygon
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// Polygon ability flags
    ///
    /// Unknown bits are kept as-is, callers are free to give bits their own
    /// meaning (terrain types, for instance).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        const WALK = 0x01;
        const SWIM = 0x02;
        const DOOR = 0x04;
        const JUMP = 0x08;
        const DISABLED = 0x10;
        const _ = !0;
    }
}

bitflags! {
    /// Flags attached to each corner returned by a straight path query
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathFlags: u8 {
        /// The corner is the start position
        const START = 0x01;
        /// The corner is the end position
        const END = 0x02;
        /// The corner is the entry of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

/// Polygon type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PolyType {
    /// Regular walkable polygon
    #[default]
    Ground = 0,
    /// Two-vertex polygon standing for an off-mesh connection
    OffMeshConnection = 1,
}

impl PolyType {
    pub(crate) fn from_bits(bits: u8) -> Self {
        if bits == 1 {
            PolyType::OffMeshConnection
        } else {
            PolyType::Ground
        }
    }
}

/// Parameters shared by every tile of a navigation mesh
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub origin: [f32; 3],
    /// Tile extent along x
    pub tile_width: f32,
    /// Tile extent along z
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: i32,
    /// Maximum number of polygons per tile
    pub max_polys_per_tile: i32,
}

/// Polygon filter used by every query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    /// Polygons must carry at least one of these flags
    pub include_flags: PolyFlags,
    /// Polygons carrying any of these flags are skipped
    pub exclude_flags: PolyFlags,
    /// Traversal cost multiplier per area id
    pub area_cost: [f32; DT_MAX_AREAS],
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::empty(),
            area_cost: [1.0; DT_MAX_AREAS],
        }
    }
}

impl QueryFilter {
    /// Creates a filter accepting polygons with any of `include` flags
    pub fn new(include: PolyFlags, exclude: PolyFlags) -> Self {
        Self {
            include_flags: include,
            exclude_flags: exclude,
            ..Default::default()
        }
    }

    /// Checks whether a polygon can be visited
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    /// Cost of moving between two points inside the given polygon
    pub fn get_cost(&self, pa: &[f32; 3], pb: &[f32; 3], poly: &Poly) -> f32 {
        let area = (poly.area as usize).min(DT_MAX_AREAS - 1);
        detour_common::dt_vdist(pa, pb) * self.area_cost[area]
    }

    /// Sets the traversal cost of an area
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(slot) = self.area_cost.get_mut(area as usize) {
            *slot = cost;
        }
    }
}

/// One corner of a straight path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    /// Corner position
    pub pos: [f32; 3],
    /// Corner classification
    pub flags: StraightPathFlags,
    /// Polygon entered at this corner (zero at the end point)
    pub poly: PolyRef,
}
